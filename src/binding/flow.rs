//! Backpressure state for inbound bytes.
//!
//! Bytes from the device accumulate in `pending` whatever the state. While
//! `Flowing`, the whole buffer is handed to the consumer in one push; the
//! push's return value says whether the consumer wants more (`true`) or is
//! saturated (`false`, which pauses delivery until the next resume).
//!
//! The controller never schedules anything itself. The binding decides when
//! `deliver` runs, which is always from its own task and never inside the
//! call that made data available.

use bytes::{Bytes, BytesMut};

/// Whether the consumer currently accepts pushed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Paused,
    Flowing,
}

#[derive(Debug, Default)]
pub struct FlowController {
    state: FlowState,
    pending: BytesMut,
}

impl FlowController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn is_flowing(&self) -> bool {
        self.state == FlowState::Flowing
    }

    /// Bytes buffered and not yet pushed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Buffer bytes from the device. Returns whether a delivery is due.
    pub fn arrive(&mut self, data: &[u8]) -> bool {
        self.pending.extend_from_slice(data);
        self.wants_delivery()
    }

    /// The consumer signalled read intent. Returns whether a delivery is due.
    pub fn resume(&mut self) -> bool {
        self.state = FlowState::Flowing;
        self.wants_delivery()
    }

    pub fn wants_delivery(&self) -> bool {
        self.is_flowing() && !self.pending.is_empty()
    }

    /// Push everything pending while the consumer keeps accepting.
    ///
    /// The buffer is emptied before each push, so bytes buffered during the
    /// push are neither lost nor delivered twice. Returns the number of pushes.
    pub fn deliver<F>(&mut self, mut push: F) -> usize
    where
        F: FnMut(Bytes) -> bool,
    {
        let mut pushes = 0;
        while self.wants_delivery() {
            let chunk = self.pending.split().freeze();
            pushes += 1;
            if !push(chunk) {
                self.state = FlowState::Paused;
            }
        }
        pushes
    }

    /// Drop all pending bytes and stop flowing.
    pub fn reset(&mut self) {
        self.pending = BytesMut::new();
        self.state = FlowState::Paused;
    }
}
