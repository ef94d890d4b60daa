use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::InferenceCompletion;

/// Single-slot hand-off cell for engine completions
///
/// The engine worker writes, the coordinator takes. The lock is held only
/// for the swap itself, never while a model runs or a mask is composited
/// A newer completion replaces an unread older one
#[derive(Debug, Default)]
pub struct ResultSlot {
    latest: Mutex<Option<InferenceCompletion>>,
    ready: Condvar,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, completion: InferenceCompletion) {
        let replaced = self.latest.lock().replace(completion);
        if let Some(old) = replaced {
            tracing::debug!("Completion {} replaced before it was read", old.id);
        }
        self.ready.notify_all();
    }

    pub fn take(&self) -> Option<InferenceCompletion> {
        self.latest.lock().take()
    }

    pub fn is_ready(&self) -> bool {
        self.latest.lock().is_some()
    }

    /// Wait until a completion is present or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut latest = self.latest.lock();
        while latest.is_none() {
            if self.ready.wait_until(&mut latest, deadline).timed_out() {
                break;
            }
        }
        latest.is_some()
    }
}
