// src/engine/mod.rs

//! Orchestration engine for fleetexec.
//!
//! This module ties together:
//! - the controller, the single writer of the progress model
//! - the bus listener that feeds decoded lifecycle events to it
//! - dispatchers that submit the job and stream per-host returns
//! - the failure reconciler that places failures in host histories
//! - pre-flight checks and the executor that runs everything in order
//!
//! The pure state machine lives in [`controller`]; the async/IO shell is
//! implemented in [`listener`], [`dispatcher`] and [`executor`].

pub mod controller;
pub mod dispatcher;
pub mod executor;
pub mod listener;
pub mod preflight;
pub mod reconciler;
pub mod supervisor;

pub use controller::{ControllerCommand, ControllerStep, ExecutionController};
pub use dispatcher::{DispatchContext, Dispatcher};
pub use executor::Executor;
pub use listener::BusListener;
pub use preflight::{CommandCheck, ExecutionContext, KnownHostCheck, PreflightCheck};
pub use reconciler::FailureReconciler;
pub use supervisor::DispatchSupervisor;
