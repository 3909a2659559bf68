//! The upward progress-event protocol: a typed channel from whichever
//! flasher is running to the UI shell. No global listeners — the sender is
//! passed in by the caller as a plain closure/channel.

use serde::{Deserialize, Serialize};

/// The state a flash operation is currently in. Events are emitted
/// monotonically in this order; a state may be skipped entirely (e.g. a
/// flash that skips `verifying` when `FlashOptions::verify` is false) but
/// never regresses to an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlashStage {
    Preparing,
    EnteringBootloader,
    Downloading,
    Erasing,
    Flashing,
    Verifying,
    Rebooting,
    Complete,
}

impl FlashStage {
    /// Declared order of the state machine; used only by tests to assert
    /// that emitted events never regress.
    fn ordinal(self) -> u8 {
        match self {
            FlashStage::Preparing => 0,
            FlashStage::EnteringBootloader => 1,
            FlashStage::Downloading => 2,
            FlashStage::Erasing => 3,
            FlashStage::Flashing => 4,
            FlashStage::Verifying => 5,
            FlashStage::Rebooting => 6,
            FlashStage::Complete => 7,
        }
    }
}

/// A single progress update, emitted to whatever channel the caller wired
/// up (a Tauri `Channel`, an mpsc sender, or a test `Vec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub state: FlashStage,
    /// 0..=100; may reset to 0 when `state` changes.
    pub progress: u8,
    pub message: String,
    pub bytes_written: Option<u64>,
    pub total_bytes: Option<u64>,
}

impl ProgressEvent {
    pub fn new(state: FlashStage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            state,
            progress: progress.min(100),
            message: message.into(),
            bytes_written: None,
            total_bytes: None,
        }
    }

    pub fn with_bytes(mut self, written: u64, total: u64) -> Self {
        self.bytes_written = Some(written);
        self.total_bytes = Some(total);
        self
    }
}

/// Sink a flasher reports progress through. Implemented for any `FnMut`
/// taking a [`ProgressEvent`], so callers can pass a closure, a channel's
/// `send`, or a `Vec::push` in tests without an extra adapter type.
pub trait ProgressSink {
    fn emit(&mut self, event: ProgressEvent);
}

impl<F: FnMut(ProgressEvent)> ProgressSink for F {
    fn emit(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// A sink that validates monotonic `progress` within a state as events
/// flow through it, and that states never regress.
/// Used in tests wrapping a real flasher run.
#[cfg(test)]
pub struct AssertingSink {
    pub events: Vec<ProgressEvent>,
    last_ordinal: u8,
    last_progress_in_state: u8,
}

#[cfg(test)]
impl Default for AssertingSink {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            last_ordinal: 0,
            last_progress_in_state: 0,
        }
    }
}

#[cfg(test)]
impl ProgressSink for AssertingSink {
    fn emit(&mut self, event: ProgressEvent) {
        let ordinal = event.state.ordinal();
        assert!(
            ordinal >= self.last_ordinal,
            "progress state regressed from ordinal {} to {}",
            self.last_ordinal,
            ordinal
        );
        if ordinal != self.last_ordinal {
            self.last_progress_in_state = 0;
        }
        assert!(
            event.progress >= self.last_progress_in_state,
            "progress regressed within state {:?}: {} -> {}",
            event.state,
            self.last_progress_in_state,
            event.progress
        );
        self.last_ordinal = ordinal;
        self.last_progress_in_state = event.progress;
        self.events.push(event);
    }
}
