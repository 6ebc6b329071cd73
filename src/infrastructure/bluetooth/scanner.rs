//! Cube Discovery
//!
//! Filters scan results down to supported cubes and resolves the device
//! MAC address the cipher key is salted with. Platforms rarely expose the
//! real address of a BLE peripheral, so the cube's own manufacturer data
//! is the preferred source.

use crate::infrastructure::bluetooth::protocol::{MacAddress, DEVICE_NAME_PREFIXES};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Manufacturer data keyed by company identifier
pub type ManufacturerData = HashMap<u16, Vec<u8>>;

/// Bytes of the manufacturer payload that carry the address
const MAC_PAYLOAD_LENGTH: usize = 9;

/// True when the advertised name belongs to a supported cube
pub fn is_supported_device_name(name: &str) -> bool {
    DEVICE_NAME_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Company identifiers cubes advertise under: `0x0001`, `0x0101`, ... `0xFF01`
fn cube_company_ids() -> impl Iterator<Item = u16> {
    (0u16..256).map(|i| (i << 8) | 0x01)
}

/// Pull the MAC out of cube manufacturer data.
///
/// The address is the last six bytes of the first nine payload bytes,
/// stored least significant byte first.
pub fn extract_mac(manufacturer_data: &ManufacturerData) -> Option<MacAddress> {
    cube_company_ids().find_map(|cic| {
        let payload = manufacturer_data.get(&cic)?;
        if payload.len() < MAC_PAYLOAD_LENGTH {
            return None;
        }
        let mut mac = [0u8; 6];
        for (i, byte) in mac.iter_mut().enumerate() {
            *byte = payload[MAC_PAYLOAD_LENGTH - 1 - i];
        }
        Some(MacAddress(mac))
    })
}

/// Fallback MAC lookup supplied by the caller (e.g. asking the user).
#[async_trait]
pub trait MacResolver: Send + Sync {
    async fn resolve_mac(&self, device_name: Option<&str>) -> Option<MacAddress>;
}

/// Advertisement access needed for MAC resolution.
#[async_trait]
pub trait AdvertisementSource: Send + Sync {
    /// Manufacturer data already seen for this device
    fn manufacturer_data(&self) -> Option<ManufacturerData>;

    /// Start watching advertisements; the stream ends when watching stops
    async fn watch_advertisements(&self) -> Option<mpsc::Receiver<ManufacturerData>>;
}

/// Resolve a cube MAC: cached advertisement, then live advertisements for
/// at most `watch_timeout`, then the caller's resolver.
pub async fn resolve_mac(
    device: &dyn AdvertisementSource,
    device_name: Option<&str>,
    watch_timeout: Duration,
    resolver: Option<&dyn MacResolver>,
) -> Option<MacAddress> {
    if let Some(mac) = device.manufacturer_data().as_ref().and_then(extract_mac) {
        debug!(%mac, "MAC taken from advertisement");
        return Some(mac);
    }

    if let Some(mut adverts) = device.watch_advertisements().await {
        debug!(timeout_ms = watch_timeout.as_millis() as u64, "Watching advertisements for MAC");
        let watched = tokio::time::timeout(watch_timeout, async {
            while let Some(data) = adverts.recv().await {
                if let Some(mac) = extract_mac(&data) {
                    return Some(mac);
                }
            }
            None
        })
        .await;
        match watched {
            Ok(Some(mac)) => {
                info!(%mac, "MAC resolved from advertisement watch");
                return Some(mac);
            }
            Ok(None) => debug!("Advertisement watch ended without a MAC"),
            Err(_) => warn!("Timed out waiting for cube advertisement"),
        }
    }

    match resolver {
        Some(resolver) => resolver.resolve_mac(device_name).await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn advert(cic: u16) -> ManufacturerData {
        // MAC AB:12:CD:34:56:78 stored backwards after three leading bytes
        let payload = vec![0x00, 0x11, 0x22, 0x78, 0x56, 0x34, 0xCD, 0x12, 0xAB, 0xFF];
        HashMap::from([(cic, payload)])
    }

    struct FakeDevice {
        cached: Option<ManufacturerData>,
        watched: Vec<ManufacturerData>,
        keep_open: bool,
    }

    #[async_trait]
    impl AdvertisementSource for FakeDevice {
        fn manufacturer_data(&self) -> Option<ManufacturerData> {
            self.cached.clone()
        }

        async fn watch_advertisements(&self) -> Option<mpsc::Receiver<ManufacturerData>> {
            let (tx, rx) = mpsc::channel(8);
            for data in self.watched.clone() {
                tx.send(data).await.ok()?;
            }
            if self.keep_open {
                // Never completes on its own
                tokio::spawn(async move {
                    tx.closed().await;
                });
            }
            Some(rx)
        }
    }

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MacResolver for CountingResolver {
        async fn resolve_mac(&self, _device_name: Option<&str>) -> Option<MacAddress> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            "01:02:03:04:05:06".parse().ok()
        }
    }

    fn expected() -> MacAddress {
        "AB:12:CD:34:56:78".parse().unwrap()
    }

    #[test]
    fn test_device_name_filter() {
        assert!(is_supported_device_name("GAN12uiM_A1B2"));
        assert!(is_supported_device_name("MG3-Magnetic"));
        assert!(is_supported_device_name("AiCube-1234"));
        assert!(!is_supported_device_name("Gear VR Controller"));
        assert!(!is_supported_device_name("gan"));
    }

    #[test]
    fn test_extract_mac_from_manufacturer_data() {
        assert_eq!(extract_mac(&advert(0x0001)), Some(expected()));
        assert_eq!(extract_mac(&advert(0xA501)), Some(expected()));
        // Not a cube company identifier
        assert_eq!(extract_mac(&advert(0x004C)), None);

        let short = HashMap::from([(0x0001u16, vec![0u8; 8])]);
        assert_eq!(extract_mac(&short), None);
    }

    #[tokio::test]
    async fn test_resolve_prefers_cached_advertisement() {
        let device = FakeDevice {
            cached: Some(advert(0x0101)),
            watched: Vec::new(),
            keep_open: false,
        };
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
        };
        let resolver_ref: &dyn MacResolver = &resolver;
        let mac = resolve_mac(&device, None, Duration::from_millis(50), Some(resolver_ref)).await;
        assert_eq!(mac, Some(expected()));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_from_watch() {
        let device = FakeDevice {
            cached: None,
            watched: vec![HashMap::new(), advert(0x0201)],
            keep_open: false,
        };
        let mac = resolve_mac(&device, None, Duration::from_millis(50), None).await;
        assert_eq!(mac, Some(expected()));
    }

    #[tokio::test]
    async fn test_watch_timeout_falls_back_to_resolver() {
        let device = FakeDevice {
            cached: None,
            watched: Vec::new(),
            keep_open: true,
        };
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
        };
        let resolver_ref: &dyn MacResolver = &resolver;
        let mac = resolve_mac(&device, Some("GAN"), Duration::from_millis(20), Some(resolver_ref)).await;
        assert_eq!(mac, "01:02:03:04:05:06".parse().ok());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unresolved_without_resolver() {
        let device = FakeDevice {
            cached: None,
            watched: Vec::new(),
            keep_open: false,
        };
        assert_eq!(resolve_mac(&device, None, Duration::from_millis(20), None).await, None);
    }
}
