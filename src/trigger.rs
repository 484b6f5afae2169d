//! Edge-triggered capture signal between the viewer and the polling device.
//!
//! The viewer fires a trigger to request a photo; the device polls and
//! consumes it. The flag is a level signal: repeated fires before a poll
//! collapse into one pending capture, never a queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::clock::Clock;

#[derive(Debug, Default)]
struct TriggerState {
    pending: bool,
    last_triggered_at: Option<DateTime<Utc>>,
}

/// Read-only view of the trigger state, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerSnapshot {
    pub pending: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Single-slot pending-capture flag with at-most-once delivery.
pub struct TriggerCoordinator {
    state: Mutex<TriggerState>,
    clock: Arc<dyn Clock>,
}

impl TriggerCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(TriggerState::default()),
            clock,
        }
    }

    /// Request a capture. Sets the pending flag and stamps the trigger time.
    /// Firing again before the device polls has no additional effect beyond
    /// refreshing the timestamp.
    pub async fn fire(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.pending = true;
        state.last_triggered_at = Some(now);
        now
    }

    /// Atomically read and clear the pending flag. Returns whether a capture
    /// was pending. A fire that lands after this returns is never lost; it
    /// stays pending for the next poll.
    pub async fn consume_if_pending(&self) -> bool {
        let mut state = self.state.lock().await;
        let was_pending = state.pending;
        state.pending = false;
        was_pending
    }

    /// Snapshot the current state without consuming anything.
    pub async fn peek(&self) -> TriggerSnapshot {
        let state = self.state.lock().await;
        TriggerSnapshot {
            pending: state.pending,
            last_triggered_at: state.last_triggered_at,
        }
    }
}
