//! Pointer input and move coalescing

use serde::{Deserialize, Serialize};

/// A pointer event in track coordinates
///
/// `time_ms` is any monotonic clock in milliseconds; only differences
/// between presses are used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointerEvent {
    Move { x: f32, y: f32 },
    Down { x: f32, y: f32, time_ms: u64 },
    Up { x: f32, y: f32, time_ms: u64 },
    Leave,
}

/// Queue that keeps at most one move between other events
///
/// Hosts push raw input as it arrives and drain once per frame. Consecutive
/// moves collapse into the latest one; presses, releases and leaves are
/// never dropped, so every transition stays reachable.
#[derive(Debug, Default)]
pub struct PointerQueue {
    pending: Vec<PointerEvent>,
}

impl PointerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: PointerEvent) {
        if let (PointerEvent::Move { .. }, Some(PointerEvent::Move { .. })) = (event, self.pending.last()) {
            if let Some(last) = self.pending.last_mut() {
                *last = event;
            }
            return;
        }
        self.pending.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take the queued events in arrival order
    pub fn drain(&mut self) -> Vec<PointerEvent> {
        std::mem::take(&mut self.pending)
    }
}
