//! Protocol Driver
//!
//! Glues one [`ProtocolVariant`] to one [`MoveSequencer`]. The driver is
//! synchronous and owns no I/O: it takes decrypted notifications and hands
//! back the events to publish plus any plaintext commands (history
//! requests) the session should write.

use crate::domain::models::{CubeCommand, CubeEvent};
use crate::domain::sequencer::{MoveSequencer, SequencerConfig, SequencerOutput};
use crate::infrastructure::bluetooth::protocol::CubeGeneration;
use crate::infrastructure::bluetooth::variants::{DecodedMessage, ProtocolError, ProtocolVariant};
use tracing::{debug, info};

/// Result of processing one state notification
#[derive(Debug, Default, PartialEq)]
pub struct StateOutcome {
    /// Events to publish, in order
    pub events: Vec<CubeEvent>,
    /// Plaintext commands to encrypt and write
    pub commands: Vec<Vec<u8>>,
    /// The session must be torn down
    pub disconnect: bool,
}

pub struct ProtocolDriver {
    variant: Box<dyn ProtocolVariant>,
    sequencer: MoveSequencer,
}

impl ProtocolDriver {
    pub fn new(variant: Box<dyn ProtocolVariant>, mut config: SequencerConfig) -> Self {
        config.history_supported = variant.supports_move_history();
        Self {
            variant,
            sequencer: MoveSequencer::new(config),
        }
    }

    pub fn for_generation(generation: CubeGeneration, config: SequencerConfig) -> Self {
        Self::new(generation.create_variant(), config)
    }

    pub fn generation(&self) -> CubeGeneration {
        self.variant.generation()
    }

    pub fn sequencer(&self) -> &MoveSequencer {
        &self.sequencer
    }

    pub fn create_command_message(&mut self, command: CubeCommand) -> Option<Vec<u8>> {
        self.variant.create_command_message(command)
    }

    /// Decode one decrypted notification and run it through the sequencer.
    ///
    /// Processing stops at the first message that requires a disconnect;
    /// anything after it in the same notification is discarded.
    pub fn handle_state_event(
        &mut self,
        message: &[u8],
        now: i64,
    ) -> Result<StateOutcome, ProtocolError> {
        let mut outcome = StateOutcome::default();

        for decoded in self.variant.decode(message, now)? {
            match decoded {
                DecodedMessage::Move(mv) => {
                    let output = self.sequencer.push_move(mv);
                    self.apply(output, &mut outcome);
                }
                DecodedMessage::MoveHistory(moves) => {
                    debug!(count = moves.len(), "Move history received");
                    let output = self.sequencer.inject_history(moves);
                    self.apply(output, &mut outcome);
                }
                DecodedMessage::Facelets(facelets) => {
                    let output = self.sequencer.observe_facelets(facelets.serial, now);
                    self.apply(output, &mut outcome);
                    if !outcome.disconnect {
                        outcome.events.push(CubeEvent::Facelets(facelets));
                    }
                }
                DecodedMessage::Gyro(gyro) => outcome.events.push(CubeEvent::Gyro(gyro)),
                DecodedMessage::Battery(battery) => {
                    outcome.events.push(CubeEvent::Battery(battery))
                }
                DecodedMessage::Hardware(hardware) => {
                    info!(
                        name = %hardware.name,
                        hw = %hardware.hardware_version,
                        sw = %hardware.software_version,
                        "Cube hardware identified"
                    );
                    outcome.events.push(CubeEvent::Hardware(hardware));
                }
                DecodedMessage::Disconnect => {
                    info!("Cube requested disconnect");
                    outcome.disconnect = true;
                }
            }

            if outcome.disconnect {
                break;
            }
        }

        Ok(outcome)
    }

    fn apply(&self, output: SequencerOutput, outcome: &mut StateOutcome) {
        outcome
            .events
            .extend(output.moves.into_iter().map(CubeEvent::Move));
        for request in output.history_requests {
            if let Some(command) = self
                .variant
                .request_move_history(request.start_serial, request.count)
            {
                outcome.commands.push(command);
            }
        }
        outcome.disconnect |= output.disconnect;
    }
}
