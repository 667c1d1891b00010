// src/render/mod.rs

//! Progress renderers.
//!
//! The controller emits [`RenderSignal`]s whenever the model changed; a
//! [`Renderer`] consumes them on its own (blocking) thread and reads the
//! model through short read locks.
//!
//! - [`terminal`] prints one line per change, for non-interactive runs.
//! - [`dashboard`] is the full-screen view with navigation and live timers.
//! - [`format`] holds the text helpers both share.

pub mod dashboard;
pub mod format;
pub mod terminal;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::types::HostId;

pub use dashboard::DashboardRenderer;
pub use terminal::TerminalRenderer;

/// "Something changed" notification sent by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderSignal {
    ExecutionStarted,
    HostUpdated(HostId),
    HostFailure { host: HostId, failure: Value },
    ExecutionStopped,
}

/// Lifecycle shared by both renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPhase {
    #[default]
    NotStarted,
    Running,
    /// Redraw is suspended; events are still applied to the model.
    Paused,
    Finished,
}

/// A render loop. `run` blocks until the run is finished (and, for the
/// dashboard, until the operator quits).
pub trait Renderer: Send {
    fn run(&mut self, signals: &mut mpsc::UnboundedReceiver<RenderSignal>) -> Result<()>;
}
