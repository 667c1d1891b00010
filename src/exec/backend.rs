// src/exec/backend.rs

//! Pluggable execution backend abstraction.
//!
//! The dispatcher never spawns anything itself. It asks the backend to run
//! the job against a [`Target`] and reads per-host returns from the stream
//! it gets back, which makes it easy to script returns in tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::errors::Result;
use crate::exec::result::HostReturn;
use crate::types::{HostId, JobSpec, Target};

/// Returns of one or more hosts delivered together.
pub type ReturnBatch = BTreeMap<HostId, HostReturn>;

/// Stream of return batches. The stream ends when the job is over on every
/// host; an `Err` item is a backend failure.
pub type ReturnStream = mpsc::Receiver<Result<ReturnBatch>>;

/// Trait abstracting how jobs reach the hosts.
pub trait ExecutionBackend: Send + Sync {
    /// Submit `job` to `target` and stream per-host returns.
    fn stream_job(
        &self,
        target: Target,
        job: JobSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ReturnStream>> + Send + '_>>;

    /// Set a boolean marker on every host of `target`.
    ///
    /// Resolves once all hosts answered, with the per-host outcome.
    fn set_marker(
        &self,
        target: Target,
        key: String,
        value: bool,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeMap<HostId, bool>>> + Send + '_>>;
}
