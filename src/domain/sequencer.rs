//! Move Sequencer
//!
//! Turns the lossy, possibly reordered stream of move notifications into a
//! gap-free, serial-ordered sequence. Moves that arrive ahead of the next
//! expected serial are parked in a buffer until the missing ones show up,
//! either live or through a history replay requested from the cube.
//!
//! ```text
//! AwaitingFirstSerial ──first move / facelets──▶ Streaming
//!        Streaming ──move ahead of next serial──▶ GapRecovery
//!      GapRecovery ──gap closed──▶ Streaming
//!      GapRecovery ──buffer over limit──▶ Disconnected
//! ```

use crate::domain::models::MoveEvent;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// Serials further ahead than this are treated as stale retransmissions.
const MAX_FORWARD_DISTANCE: u8 = 0x7F;

/// Circular (mod 256) containment test of `serial` in the range `start..end`.
pub fn is_serial_in_range(
    start: u8,
    end: u8,
    serial: u8,
    start_inclusive: bool,
    end_inclusive: bool,
) -> bool {
    end.wrapping_sub(start) >= serial.wrapping_sub(start)
        && (start_inclusive || start != serial)
        && (end_inclusive || end != serial)
}

/// Tuning knobs. Neither value is mandated by the cube firmware.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Buffered moves tolerated before the session is considered desynchronized
    pub move_buffer_limit: usize,
    /// Quiet period after the last live move before a facelets snapshot may
    /// trigger a history request
    pub missed_move_window_ms: i64,
    /// Whether the protocol generation can replay move history
    pub history_supported: bool,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            move_buffer_limit: 16,
            missed_move_window_ms: 500,
            history_supported: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    AwaitingFirstSerial,
    Streaming,
    GapRecovery,
    Disconnected,
}

/// Request to replay `count` moves, newest first, starting at `start_serial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequest {
    pub start_serial: u8,
    pub count: u8,
}

/// What the sequencer wants the session to do after one input.
#[derive(Debug, Default, PartialEq)]
pub struct SequencerOutput {
    /// Moves released in serial order
    pub moves: Vec<MoveEvent>,
    pub history_requests: Vec<HistoryRequest>,
    /// Set once, when the buffer overflowed
    pub disconnect: bool,
}

impl SequencerOutput {
    fn merge(&mut self, other: SequencerOutput) {
        self.moves.extend(other.moves);
        self.history_requests.extend(other.history_requests);
        self.disconnect |= other.disconnect;
    }
}

pub struct MoveSequencer {
    config: SequencerConfig,
    last_serial: i16,
    serial: i16,
    move_buffer: VecDeque<MoveEvent>,
    last_local_timestamp: Option<i64>,
    disconnected: bool,
}

impl MoveSequencer {
    pub fn new(config: SequencerConfig) -> Self {
        Self {
            config,
            last_serial: -1,
            serial: -1,
            move_buffer: VecDeque::new(),
            last_local_timestamp: None,
            disconnected: false,
        }
    }

    pub fn state(&self) -> SequencerState {
        if self.disconnected {
            SequencerState::Disconnected
        } else if self.last_serial < 0 {
            SequencerState::AwaitingFirstSerial
        } else if self.move_buffer.is_empty() {
            SequencerState::Streaming
        } else {
            SequencerState::GapRecovery
        }
    }

    /// Serial of the last move released to the consumer
    pub fn last_serial(&self) -> Option<u8> {
        u8::try_from(self.last_serial).ok()
    }

    pub fn buffered(&self) -> usize {
        self.move_buffer.len()
    }

    /// Offer a live move notification.
    pub fn push_move(&mut self, mv: MoveEvent) -> SequencerOutput {
        if self.disconnected {
            return SequencerOutput::default();
        }

        let Some(last) = self.last_serial() else {
            debug!(serial = mv.serial, "First move since connect");
            self.note_live_serial(&mv);
            self.last_serial = i16::from(mv.serial);
            return SequencerOutput {
                moves: vec![mv],
                ..Default::default()
            };
        };

        if !is_serial_in_range(last, last.wrapping_add(MAX_FORWARD_DISTANCE), mv.serial, false, true) {
            trace!(serial = mv.serial, last, "Dropping stale move");
            return self.evict_move_buffer(true);
        }
        self.note_live_serial(&mv);

        let distance = mv.serial.wrapping_sub(last);
        let position = self
            .move_buffer
            .iter()
            .position(|buffered| buffered.serial.wrapping_sub(last) >= distance);
        match position {
            Some(index) if self.move_buffer[index].serial == mv.serial => {
                trace!(serial = mv.serial, "Dropping duplicate move");
            }
            Some(index) => self.move_buffer.insert(index, mv),
            None => self.move_buffer.push_back(mv),
        }

        self.evict_move_buffer(true)
    }

    fn note_live_serial(&mut self, mv: &MoveEvent) {
        self.serial = i16::from(mv.serial);
        self.last_local_timestamp = Some(mv.local_timestamp.unwrap_or(mv.timestamp));
    }

    /// Offer moves recovered from a history replay, in the order they were
    /// transmitted (newest first).
    pub fn inject_history(&mut self, moves: Vec<MoveEvent>) -> SequencerOutput {
        if self.disconnected {
            return SequencerOutput::default();
        }
        for mv in moves {
            self.inject_missed_move(mv);
        }
        // Replays never trigger another request; the next live move retries.
        self.evict_move_buffer(false)
    }

    /// Note a facelets snapshot serial, requesting history if moves were
    /// evidently missed while the cube was idle.
    pub fn observe_facelets(&mut self, serial: u8, now: i64) -> SequencerOutput {
        let mut output = SequencerOutput::default();
        if self.disconnected {
            return output;
        }

        self.serial = i16::from(serial);
        if self.last_serial < 0 {
            self.last_serial = i16::from(serial);
            return output;
        }

        let quiet = self
            .last_local_timestamp
            .is_some_and(|t| now - t > self.config.missed_move_window_ms);
        if quiet {
            output.merge(self.check_if_move_missed());
        }
        output
    }

    /// Release buffered moves that follow `last_serial` without a gap.
    pub fn evict_move_buffer(&mut self, allow_request: bool) -> SequencerOutput {
        let mut output = SequencerOutput::default();

        while let Some(head) = self.move_buffer.front() {
            let diff = match self.last_serial() {
                Some(last) => head.serial.wrapping_sub(last),
                None => 1,
            };
            if diff > 1 {
                if self.config.history_supported {
                    if allow_request {
                        debug!(start = head.serial, count = diff, "Requesting missed moves");
                        output.history_requests.push(HistoryRequest {
                            start_serial: head.serial,
                            count: diff,
                        });
                    }
                    break;
                }
                warn!(
                    missing = diff - 1,
                    serial = head.serial,
                    "Moves lost and not recoverable on this generation"
                );
            }
            if let Some(mv) = self.move_buffer.pop_front() {
                self.last_serial = i16::from(mv.serial);
                output.moves.push(mv);
            }
        }

        if self.move_buffer.len() > self.config.move_buffer_limit {
            warn!(
                buffered = self.move_buffer.len(),
                limit = self.config.move_buffer_limit,
                "Move buffer overflow, forcing disconnect"
            );
            self.move_buffer.clear();
            self.disconnected = true;
            output.disconnect = true;
        }

        output
    }

    /// Insert a replayed move only if it closes the gap directly in front
    /// of the buffer head (or of the live serial when the buffer is empty).
    pub fn inject_missed_move(&mut self, mv: MoveEvent) {
        let Some(last) = self.last_serial() else {
            return;
        };

        if let Some(head) = self.move_buffer.front() {
            if self.move_buffer.iter().any(|m| m.serial == mv.serial) {
                return;
            }
            if !is_serial_in_range(last, head.serial, mv.serial, false, false) {
                return;
            }
            if mv.serial == head.serial.wrapping_sub(1) {
                trace!(serial = mv.serial, "Recovered missed move");
                self.move_buffer.push_front(mv);
            }
        } else if let Ok(serial) = u8::try_from(self.serial) {
            if is_serial_in_range(last, serial, mv.serial, false, true) {
                trace!(serial = mv.serial, "Recovered missed move from snapshot gap");
                self.move_buffer.push_front(mv);
            }
        }
    }

    /// Request history when the live serial has run ahead of the last
    /// released move.
    pub fn check_if_move_missed(&mut self) -> SequencerOutput {
        let mut output = SequencerOutput::default();
        let (Some(last), Ok(serial)) = (self.last_serial(), u8::try_from(self.serial)) else {
            return output;
        };
        let diff = serial.wrapping_sub(last);
        // Snapshots at counter 0 are unreliable on some firmware
        if diff == 0 || serial == 0 || !self.config.history_supported {
            return output;
        }

        let start_serial = self
            .move_buffer
            .front()
            .map_or(serial.wrapping_add(1), |head| head.serial);
        debug!(start = start_serial, missed = diff, "Snapshot ahead of last move");
        output.history_requests.push(HistoryRequest {
            start_serial,
            count: diff.saturating_add(1),
        });
        output
    }
}
