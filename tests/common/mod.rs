#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleetexec::model::{ExecutionModel, SharedModel};

pub use fleetexec_test_utils::{init_tracing, with_timeout};

/// Hands the model created inside a run to the test driving it.
#[derive(Clone, Default)]
pub struct ModelSlot {
    inner: Arc<Mutex<Option<SharedModel>>>,
}

impl ModelSlot {
    pub fn set(&self, model: SharedModel) {
        *self.inner.lock().unwrap() = Some(model);
    }

    pub async fn get(&self) -> SharedModel {
        loop {
            if let Some(model) = self.inner.lock().unwrap().clone() {
                return model;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until `cond` holds on the model.
    pub async fn wait_until<F>(&self, cond: F)
    where
        F: Fn(&ExecutionModel) -> bool,
    {
        let model = self.get().await;
        loop {
            if cond(&model.read()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
