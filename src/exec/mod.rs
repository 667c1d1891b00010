// src/exec/mod.rs

//! Remote execution layer.
//!
//! The dispatcher talks to an [`ExecutionBackend`] to submit the job and to
//! stream per-host returns back. Production runs configured shell commands
//! through [`CommandBackend`]; tests substitute a scripted fake.
//!
//! - [`backend`] defines the trait and the stream types.
//! - [`result`] decodes per-host returns (`retcode` plus per-operation
//!   results or a list of errors).
//! - [`process`] spawns the backend commands with `tokio::process`.

pub mod backend;
pub mod process;
pub mod result;

pub use backend::{ExecutionBackend, ReturnBatch, ReturnStream};
pub use process::CommandBackend;
pub use result::{HostReturn, JobResult, OperationResult};
