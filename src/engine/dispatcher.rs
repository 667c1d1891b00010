// src/engine/dispatcher.rs

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::engine::controller::ExecutionController;
use crate::engine::reconciler::FailureReconciler;
use crate::errors::Result;
use crate::exec::{ExecutionBackend, HostReturn};
use crate::types::{now, HostId, JobSpec, Target, Transition, RETCODE_INTERNAL, RETCODE_JOB_FAILED};

/// Everything needed to build a dispatcher for some target.
#[derive(Clone)]
pub struct DispatchContext {
    pub controller: Arc<ExecutionController>,
    pub backend: Arc<dyn ExecutionBackend>,
    pub reconciler: Arc<FailureReconciler>,
    pub job: JobSpec,
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

impl DispatchContext {
    pub fn dispatcher(&self, target: Target) -> Dispatcher {
        Dispatcher {
            ctx: self.clone(),
            target,
            redispatch: false,
        }
    }

    /// Dispatcher for a host that reconnected after a reboot.
    pub fn redispatcher(&self, host: HostId) -> Dispatcher {
        Dispatcher {
            ctx: self.clone(),
            target: Target::Host(host),
            redispatch: true,
        }
    }
}

/// Submits the job to a target and feeds streamed returns to the controller.
///
/// The dispatcher must have been counted in with
/// [`ExecutionController::enter_dispatch`] (or by a reconnect) before
/// [`Dispatcher::run`] starts; `run` always counts it out.
///
/// Once the stream closes, cleanly or not, target hosts that never returned
/// are ended as failed.
#[derive(Debug)]
pub struct Dispatcher {
    ctx: DispatchContext,
    target: Target,
    redispatch: bool,
}

impl Dispatcher {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub async fn run(self) {
        info!(target_hosts = %self.target, job = %self.ctx.job.name, "dispatching job");
        if let Err(err) = self.stream_returns().await {
            error!(target_hosts = %self.target, error = %err, "dispatcher failed");
            self.ctx.controller.set_retcode(RETCODE_INTERNAL);
        }
        let unreturned = self
            .ctx
            .controller
            .end_unreturned(&self.target, self.redispatch, now());
        if !unreturned.is_empty() {
            warn!(
                target_hosts = %self.target,
                missing = unreturned.len(),
                "return stream closed without every host"
            );
        }
        self.ctx.controller.leave_dispatch();
    }

    async fn stream_returns(&self) -> Result<()> {
        let mut returns = self
            .ctx
            .backend
            .stream_job(self.target.clone(), self.ctx.job.clone())
            .await?;

        while let Some(batch) = returns.recv().await {
            for (host, ret) in batch? {
                self.handle_return(&host, ret);
            }
        }
        debug!(target_hosts = %self.target, "return stream closed");
        Ok(())
    }

    fn handle_return(&self, host: &str, ret: HostReturn) {
        let controller = &self.ctx.controller;
        let at = now();
        let success = ret.succeeded();
        info!(host = %host, retcode = ret.retcode, "host returned");

        if controller.host_finished(host, at, success) == Transition::OutOfContext {
            return;
        }
        for (event, data) in self.ctx.reconciler.reconcile(host, &ret.ret) {
            controller.host_failure(host, event.as_ref(), data, at);
        }
        if !success {
            controller.set_retcode(RETCODE_JOB_FAILED);
        }
    }
}
