//! Single-item hand-off cell between one producer and one consumer.
//!
//! The slot keeps only the most recent frame. `publish` swaps the stored
//! handle under a short lock and never waits for readers: a reader that
//! already acquired a frame keeps its own handle to the old buffer while the
//! writer installs the new one. `acquire` marks the slot stale so the
//! consumer can tell "nothing new since last read" without copying again.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::frame::Frame;

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    stale: bool,
    publishes: u64,
}

#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame. Last write wins; nothing is queued.
    pub fn publish(&self, frame: Frame) {
        let mut state = self.lock();
        state.frame = Some(frame);
        state.stale = false;
        state.publishes += 1;
    }

    /// Most recently published frame, or `None` before the first publish.
    pub fn acquire(&self) -> Option<Frame> {
        let mut state = self.lock();
        let frame = state.frame.clone()?;
        state.stale = true;
        Some(frame)
    }

    /// True once any frame has been published.
    pub fn is_ready(&self) -> bool {
        self.lock().frame.is_some()
    }

    /// True when no publish happened since the last `acquire`.
    pub fn is_stale(&self) -> bool {
        self.lock().stale
    }

    /// Number of publishes so far.
    pub fn publishes(&self) -> u64 {
        self.lock().publishes
    }

    // The guarded data stays consistent even if a holder panicked, since
    // every critical section is a handful of plain assignments.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
