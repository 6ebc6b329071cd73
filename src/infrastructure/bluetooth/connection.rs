//! Cube Connection Module
//!
//! Turns a discovered device into a running session: MAC resolution,
//! generation detection from the GATT services, cipher keying and finally
//! the session task. Fails before touching GATT when the MAC is unknown.

use crate::domain::models::CubeEvent;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::cipher::GanCipher;
use crate::infrastructure::bluetooth::driver::ProtocolDriver;
use crate::infrastructure::bluetooth::protocol::{cipher_key_for_name, CubeGeneration, MacAddress};
use crate::infrastructure::bluetooth::scanner::{resolve_mac, AdvertisementSource, MacResolver};
use crate::infrastructure::bluetooth::session::{
    spawn_session, CubeTransport, SessionConfig, SessionHandle, TransportError, TransportEvent,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not resolve MAC address of {0}")]
    MacUnresolved(String),
    #[error("no supported cube service among {0:?}")]
    UnsupportedService(Vec<Uuid>),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// An open GATT link to the cube's state and command characteristics
pub struct GattLink {
    pub transport: Arc<dyn CubeTransport>,
    /// Notifications from the state characteristic, already subscribed
    pub events: mpsc::Receiver<TransportEvent>,
}

/// A discovered cube, as seen through the platform BLE stack.
#[async_trait]
pub trait CubeDevice: AdvertisementSource {
    fn name(&self) -> Option<String>;

    /// Connect GATT and list the primary service UUIDs
    async fn primary_services(&self) -> Result<Vec<Uuid>, TransportError>;

    /// Subscribe to [`CubeGeneration::state_char_uuid`] and return a link
    /// whose transport writes to [`CubeGeneration::command_char_uuid`]
    async fn open(&self, generation: CubeGeneration) -> Result<GattLink, TransportError>;
}

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long to watch advertisements for the MAC
    pub mac_advertisement_timeout: Duration,
    pub session: SessionConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ConnectionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            mac_advertisement_timeout: Duration::from_millis(settings.mac_advertisement_timeout_ms),
            session: SessionConfig::from(settings),
        }
    }
}

/// A connected cube
pub struct CubeConnection {
    pub mac: MacAddress,
    pub generation: CubeGeneration,
    pub events: mpsc::Receiver<CubeEvent>,
    pub handle: SessionHandle,
}

pub struct GanCubeConnector {
    config: ConnectionConfig,
    resolver: Option<Arc<dyn MacResolver>>,
}

impl GanCubeConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            resolver: None,
        }
    }

    /// Last-resort MAC source, used when advertisements carry none
    pub fn with_mac_resolver(mut self, resolver: Arc<dyn MacResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub async fn connect<D: CubeDevice>(&self, device: &D) -> Result<CubeConnection, ConnectionError> {
        let name = device.name();
        let display_name = name.clone().unwrap_or_else(|| "unnamed cube".to_string());
        info!(name = %display_name, "Connecting to cube");

        // Step 1: MAC, before any GATT traffic
        let mac = resolve_mac(
            device,
            name.as_deref(),
            self.config.mac_advertisement_timeout,
            self.resolver.as_deref(),
        )
        .await
        .ok_or_else(|| {
            error!(name = %display_name, "MAC address unresolved");
            ConnectionError::MacUnresolved(display_name.clone())
        })?;

        // Step 2: Generation from the advertised GATT services
        let services = device.primary_services().await?;
        let generation = CubeGeneration::from_services(&services)
            .ok_or_else(|| ConnectionError::UnsupportedService(services.clone()))?;
        info!(%generation, %mac, "Cube protocol detected");

        // Step 3: Keying and protocol state
        let cipher = GanCipher::for_device(cipher_key_for_name(name.as_deref()), &mac);
        let driver = ProtocolDriver::for_generation(generation, self.config.session.sequencer.clone());

        // Step 4: Subscribe and start the session
        let link = device.open(generation).await?;
        let (events, handle) = spawn_session(
            link.transport,
            link.events,
            cipher,
            driver,
            self.config.session.clone(),
        );

        Ok(CubeConnection {
            mac,
            generation,
            events,
            handle,
        })
    }
}
