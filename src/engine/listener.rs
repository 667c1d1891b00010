// src/engine/listener.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::bus::{EventDecoder, EventSource};
use crate::engine::controller::{ControllerCommand, ExecutionController};
use crate::engine::dispatcher::DispatchContext;
use crate::engine::supervisor::DispatchSupervisor;
use crate::errors::FleetError;
use crate::types::Target;

/// Consecutive bus read failures after which the listener stops.
pub const IO_ERROR_LIMIT: u32 = 5;
/// Pause after the first read failure; later ones wait proportionally longer.
const IO_BACKOFF: Duration = Duration::from_millis(100);

/// Feeds bus events into the controller and executes the commands it
/// returns.
///
/// This is the IO shell around [`ExecutionController::apply`]: it reads
/// envelopes, decodes them, and performs re-dispatches and marker updates.
pub struct BusListener<S: EventSource> {
    source: S,
    decoder: EventDecoder,
    dispatch: DispatchContext,
    supervisor: Arc<DispatchSupervisor>,
    failed_marker: String,
}

impl<S: EventSource> fmt::Debug for BusListener<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusListener")
            .field("decoder", &self.decoder)
            .field("failed_marker", &self.failed_marker)
            .finish_non_exhaustive()
    }
}

impl<S: EventSource> BusListener<S> {
    pub fn new(
        source: S,
        decoder: EventDecoder,
        dispatch: DispatchContext,
        supervisor: Arc<DispatchSupervisor>,
        failed_marker: impl Into<String>,
    ) -> Self {
        Self {
            source,
            decoder,
            dispatch,
            supervisor,
            failed_marker: failed_marker.into(),
        }
    }

    fn controller(&self) -> &ExecutionController {
        &self.dispatch.controller
    }

    /// Main event loop.
    ///
    /// Runs until `shutdown` fires or the source closes. Undecodable
    /// envelopes are logged and skipped. Read failures back off, and the
    /// listener gives up after [`IO_ERROR_LIMIT`] of them in a row.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!("bus listener started");
        let mut io_errors = 0u32;

        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    info!("bus listener shutdown requested");
                    break;
                }
                next = self.source.next_envelope() => next,
            };

            let envelope = match next {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    info!("event bus closed; exiting");
                    break;
                }
                Err(FleetError::IoError(err)) => {
                    io_errors += 1;
                    if io_errors >= IO_ERROR_LIMIT {
                        error!(error = %err, errors = io_errors, "event bus keeps failing; giving up");
                        break;
                    }
                    warn!(error = %err, errors = io_errors, "event bus read failed; backing off");
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("bus listener shutdown requested");
                            break;
                        }
                        _ = tokio::time::sleep(IO_BACKOFF * io_errors) => {}
                    }
                    continue;
                }
                Err(err) => {
                    io_errors = 0;
                    warn!(error = %err, "unreadable bus envelope");
                    continue;
                }
            };
            io_errors = 0;

            let event = match self.decoder.decode(&envelope) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    warn!(tag = %envelope.tag, error = %err, "undecodable bus envelope");
                    continue;
                }
            };

            debug!(?event, "listener received event");
            let step = self.controller().apply(event);
            for command in step.commands {
                Self::execute_command(
                    &self.dispatch,
                    &self.supervisor,
                    &self.failed_marker,
                    command,
                )
                .await;
            }
        }

        info!("bus listener exiting");
    }

    /// Must not borrow the listener: `run` has to stay `Send` for sources
    /// that are not `Sync`.
    async fn execute_command(
        dispatch: &DispatchContext,
        supervisor: &DispatchSupervisor,
        failed_marker: &str,
        command: ControllerCommand,
    ) {
        match command {
            ControllerCommand::Redispatch(host) => {
                info!(host = %host, "re-dispatching job after reboot");
                supervisor.spawn(dispatch.redispatcher(host));
            }
            ControllerCommand::MarkExecutionFailed(host) => {
                let result = dispatch
                    .backend
                    .set_marker(Target::Host(host.clone()), failed_marker.to_string(), true)
                    .await;
                match result {
                    Ok(outcome) if outcome.get(&host).copied().unwrap_or(false) => {
                        debug!(host = %host, marker = %failed_marker, "marker set");
                    }
                    Ok(_) => warn!(host = %host, marker = %failed_marker, "host did not set marker"),
                    Err(err) => warn!(host = %host, error = %err, "failed to set marker"),
                }
            }
        }
    }
}
