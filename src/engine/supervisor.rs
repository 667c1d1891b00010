// src/engine/supervisor.rs

use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::engine::dispatcher::Dispatcher;

/// Owns the task handle of every dispatcher spawned during a run, the fleet
/// dispatcher and each re-dispatch after a reboot alike.
#[derive(Debug, Default)]
pub struct DispatchSupervisor {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, dispatcher: Dispatcher) {
        debug!(target_hosts = %dispatcher.target(), "spawning dispatcher");
        let handle = tokio::spawn(dispatcher.run());
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Number of dispatchers spawned and not yet joined.
    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Join every dispatcher, including ones spawned while joining.
    pub async fn join_all(&self) {
        loop {
            let batch = std::mem::take(
                &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                if let Err(err) = handle.await {
                    error!(error = %err, "dispatcher task panicked");
                }
            }
        }
    }
}
