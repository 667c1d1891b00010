// src/engine/executor.rs

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::bus::{DecoderOptions, EventDecoder, EventSource};
use crate::engine::controller::ExecutionController;
use crate::engine::dispatcher::DispatchContext;
use crate::engine::listener::BusListener;
use crate::engine::preflight::{run_checks, ExecutionContext, KnownHostCheck, PreflightCheck};
use crate::engine::reconciler::FailureReconciler;
use crate::engine::supervisor::DispatchSupervisor;
use crate::errors::Result;
use crate::exec::ExecutionBackend;
use crate::model::{ExecutionModel, SharedModel};
use crate::render::{RenderSignal, Renderer};
use crate::types::Target;

/// One job run, from pre-flight checks to the final retcode.
pub struct Executor {
    context: ExecutionContext,
    backend: Arc<dyn ExecutionBackend>,
    decoder_options: DecoderOptions,
    operation_prefix: String,
    failed_marker: String,
    checks: Vec<Box<dyn PreflightCheck>>,
}

impl Executor {
    pub fn new(
        context: ExecutionContext,
        backend: Arc<dyn ExecutionBackend>,
        decoder_options: DecoderOptions,
        operation_prefix: impl Into<String>,
        failed_marker: impl Into<String>,
    ) -> Self {
        Self {
            context,
            backend,
            decoder_options,
            operation_prefix: operation_prefix.into(),
            failed_marker: failed_marker.into(),
            checks: vec![Box::new(KnownHostCheck)],
        }
    }

    /// Add a check run after the built-in ones.
    pub fn with_check(mut self, check: Box<dyn PreflightCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Run the job and return its retcode.
    ///
    /// `make_renderer` receives the shared model once it exists; the renderer
    /// it returns runs on a blocking thread until it returns.
    pub async fn run<S, F>(&self, source: S, make_renderer: F) -> Result<i32>
    where
        S: EventSource + 'static,
        F: FnOnce(SharedModel) -> Box<dyn Renderer>,
    {
        if let Err(failure) = run_checks(&self.checks, &self.context).await {
            error!(check = %failure.check, code = failure.code, "{}", failure.message);
            eprintln!("{failure}");
            return Ok(failure.code);
        }

        let target = self.context.dispatch_target();
        self.reset_markers(&target).await;

        let model = ExecutionModel::new(
            self.context.job.clone(),
            &self.context.fleet,
            self.context.target.as_deref(),
        )?;
        let hosts = model.host_ids();
        let model = SharedModel::new(model);

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<RenderSignal>();
        let controller = Arc::new(ExecutionController::new(model.clone(), signal_tx));
        let decoder = EventDecoder::new(self.decoder_options.clone(), &hosts)?;
        let dispatch = DispatchContext {
            controller: controller.clone(),
            backend: self.backend.clone(),
            reconciler: Arc::new(FailureReconciler::new(&self.operation_prefix)?),
            job: self.context.job.clone(),
        };
        let supervisor = Arc::new(DispatchSupervisor::new());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let listener = BusListener::new(
            source,
            decoder,
            dispatch.clone(),
            supervisor.clone(),
            self.failed_marker.clone(),
        );
        let listener_handle = tokio::spawn(listener.run(shutdown_rx));

        controller.enter_dispatch();
        supervisor.spawn(dispatch.dispatcher(target));

        let mut renderer = make_renderer(model);
        let rendered = tokio::task::spawn_blocking(move || renderer.run(&mut signal_rx)).await;
        match rendered {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "renderer failed");
                eprintln!("renderer failed, consult logs");
            }
            Err(err) => {
                error!(error = %err, "renderer panicked");
                eprintln!("renderer failed, consult logs");
            }
        }

        controller.wait_finished().await;

        let _ = shutdown_tx.send(());
        if let Err(err) = listener_handle.await {
            error!(error = %err, "bus listener panicked");
        }
        supervisor.join_all().await;

        let retcode = controller.retcode();
        info!(retcode, "execution finished");
        Ok(retcode)
    }

    /// Clear the failure marker left by a previous run.
    async fn reset_markers(&self, target: &Target) {
        match self
            .backend
            .set_marker(target.clone(), self.failed_marker.clone(), false)
            .await
        {
            Ok(outcome) => {
                for (host, ok) in outcome {
                    if !ok {
                        warn!(host = %host, marker = %self.failed_marker, "marker not reset");
                    }
                }
            }
            Err(err) => warn!(error = %err, marker = %self.failed_marker, "failed to reset markers"),
        }
    }
}
