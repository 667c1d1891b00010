// src/model/mod.rs

//! Hierarchical progress model of one job invocation.
//!
//! - [`execution`] holds the [`ExecutionModel`]: the fixed host set, the job
//!   and run-level timestamps, plus aggregate queries.
//! - [`host`] holds one [`HostExecution`] per target host: its ordered stage
//!   history and current-stage pointer.
//! - [`stage`] and [`step`] are the nested levels of that history.
//! - [`failure`] contains failure records, the enclosing lifecycle event a
//!   failure is attributed to, and the insertion-position helpers used when
//!   a failure is threaded back into history.
//!
//! The model is pure data plus transition logic; it performs no IO. It is
//! shared between threads as a [`SharedModel`], and every structural write
//! goes through the engine's controller.

pub mod execution;
pub mod failure;
pub mod host;
pub mod stage;
pub mod step;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use execution::{ExecutionModel, Summary};
pub use failure::{FailureData, FailureRecord, LifecycleEvent, LifecycleKind};
pub use host::{HostExecution, StageEntry};
pub use stage::{Stage, StepEntry};
pub use step::Step;

/// Thread-shared handle on the model.
///
/// Writers hold the lock for one short per-host transition; renderers hold a
/// read lock for one redraw pass, which gives them a consistent snapshot.
#[derive(Debug, Clone)]
pub struct SharedModel(Arc<RwLock<ExecutionModel>>);

impl SharedModel {
    pub fn new(model: ExecutionModel) -> Self {
        Self(Arc::new(RwLock::new(model)))
    }

    /// Acquire a read guard. Poisoned locks are recovered.
    pub fn read(&self) -> RwLockReadGuard<'_, ExecutionModel> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ExecutionModel> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}
