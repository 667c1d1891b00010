// src/engine/controller.rs

//! The single mutation gate of the progress model.
//!
//! Every structural write to the model goes through [`ExecutionController`]:
//! bus events via [`ExecutionController::apply`], dispatcher results via
//! [`ExecutionController::host_finished`] and
//! [`ExecutionController::host_failure`]. Only transitions that changed the
//! model notify the renderer.
//!
//! `apply` is synchronous and performs no IO. Side effects it asks for
//! (re-dispatch after a reboot, setting the failure marker) come back as
//! [`ControllerCommand`]s for the bus listener to execute.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, EventKind};
use crate::model::{FailureData, HostExecution, LifecycleEvent, SharedModel};
use crate::render::RenderSignal;
use crate::types::{now, HostId, Target, Timestamp, Transition, RETCODE_JOB_FAILED, RETCODE_OK};

/// Side effect requested by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    /// Run the job again on a host that came back from a reboot.
    Redispatch(HostId),
    /// Flag the host's run as failed on the host itself.
    MarkExecutionFailed(HostId),
}

/// Commands produced by applying one bus event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStep {
    pub commands: Vec<ControllerCommand>,
}

#[derive(Debug, Default)]
struct DispatchBookkeeping {
    /// Dispatchers counted in and not yet left.
    active: usize,
    /// Re-dispatches per host whose stream has not closed yet.
    redispatched: HashMap<HostId, usize>,
}

#[derive(Debug)]
pub struct ExecutionController {
    model: SharedModel,
    signals: mpsc::UnboundedSender<RenderSignal>,
    dispatch: Mutex<DispatchBookkeeping>,
    retcode: AtomicI32,
    finished: watch::Sender<bool>,
}

impl ExecutionController {
    pub fn new(model: SharedModel, signals: mpsc::UnboundedSender<RenderSignal>) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            model,
            signals,
            dispatch: Mutex::new(DispatchBookkeeping::default()),
            retcode: AtomicI32::new(RETCODE_OK),
            finished,
        }
    }

    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    fn notify(&self, signal: RenderSignal) {
        // The renderer may already be gone; the run goes on without it.
        let _ = self.signals.send(signal);
    }

    /// Apply a bus event to the model.
    pub fn apply(&self, event: BusEvent) -> ControllerStep {
        let BusEvent { host, stamp, kind } = event;
        debug!(host = %host, kind = kind.label(), "applying bus event");
        let mut step = ControllerStep::default();

        let transition = match kind {
            EventKind::StageBegin { desc } => self.on_host(&host, |h| h.stage_begin(&desc, stamp)),
            EventKind::StageEnd { desc } => self.on_host(&host, |h| h.stage_end(&desc, stamp)),
            EventKind::StageWarning { desc } => self.on_host(&host, |h| h.stage_warning(&desc)),
            EventKind::StepBegin { desc } => self.on_host(&host, |h| h.step_begin(&desc, stamp)),
            EventKind::StepEnd { desc } => self.on_host(&host, |h| h.step_end(&desc, stamp)),
            EventKind::HostReboot { desc } => {
                info!(host = %host, desc = %desc, "host requested a reboot");
                self.on_host(&host, |h| h.reboot(stamp))
            }
            EventKind::HostReconnect => {
                let transition = self.reconnect(&host, stamp);
                match transition {
                    Some(Transition::Applied) => {
                        step.commands.push(ControllerCommand::Redispatch(host.clone()));
                    }
                    Some(_) => {
                        info!(host = %host, "reconnect from a host that was not rebooting; ignored");
                    }
                    None => {}
                }
                transition
            }
            EventKind::JobReturn { success } => {
                if !success {
                    info!(host = %host, "job return reported a failure");
                    step.commands
                        .push(ControllerCommand::MarkExecutionFailed(host.clone()));
                }
                None
            }
        };

        match transition {
            Some(Transition::Applied) => self.notify(RenderSignal::HostUpdated(host)),
            Some(Transition::Duplicate) => {
                warn!(host = %host, "duplicate event ignored");
            }
            Some(Transition::OutOfContext) | None => {}
        }
        step
    }

    fn on_host<F>(&self, host: &str, f: F) -> Option<Transition>
    where
        F: FnOnce(&mut HostExecution) -> Transition,
    {
        let mut model = self.model.write();
        match model.host_mut(host) {
            Some(h) => Some(f(h)),
            None => {
                warn!(host = %host, "event for a host outside the model");
                None
            }
        }
    }

    /// Leave the reboot state and count the re-dispatch it triggers, in one
    /// critical section with [`Self::leave_dispatch`].
    fn reconnect(&self, host: &str, at: Timestamp) -> Option<Transition> {
        let mut dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        let transition = self.on_host(host, |h| h.reconnect(at));
        if transition == Some(Transition::Applied) {
            dispatch.active += 1;
            *dispatch.redispatched.entry(host.to_string()).or_default() += 1;
        }
        transition
    }

    /// Count a dispatcher in before it is spawned. Starts the run when it is
    /// not running yet.
    pub fn enter_dispatch(&self) {
        let mut dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        dispatch.active += 1;
        if !self.model.read().is_running() {
            self.begin();
        }
    }

    /// Count a dispatcher out. The last one ends the run unless a host is
    /// still rebooting.
    pub fn leave_dispatch(&self) {
        let mut dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        let rebooting = self.model.read().rebooting_count();
        if dispatch.active <= 1 && rebooting == 0 {
            info!("last dispatcher finished; ending execution");
            self.end();
        } else {
            debug!(active = dispatch.active, rebooting, "dispatcher finished");
        }
        dispatch.active = dispatch.active.saturating_sub(1);
    }

    pub fn begin(&self) {
        self.model.write().begin(now());
        self.notify(RenderSignal::ExecutionStarted);
    }

    pub fn end(&self) {
        self.model.write().end(now());
        self.notify(RenderSignal::ExecutionStopped);
        self.finished.send_replace(true);
    }

    /// Wait until the run has been ended.
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Raise the accumulated retcode to at least `code`.
    pub fn set_retcode(&self, code: i32) {
        self.retcode.fetch_max(code, Ordering::SeqCst);
    }

    pub fn retcode(&self) -> i32 {
        self.retcode.load(Ordering::SeqCst)
    }

    /// A host's job run returned.
    ///
    /// A host that is rebooting is not ended: the re-dispatched run ends it.
    pub fn host_finished(&self, host: &str, at: Timestamp, success: bool) -> Transition {
        let transition = {
            let mut model = self.model.write();
            match model.host_mut(host) {
                Some(h) if h.is_rebooting() => {
                    info!(host = %host, "return from a rebooting host; waiting for reconnect");
                    Transition::OutOfContext
                }
                Some(h) => h.end(at, success),
                None => {
                    warn!(host = %host, "return for a host outside the model");
                    Transition::OutOfContext
                }
            }
        };
        if transition.is_applied() {
            self.notify(RenderSignal::HostUpdated(host.to_string()));
        }
        transition
    }

    /// End, as failed, every host of `target` that a closed return stream
    /// left open.
    ///
    /// Hosts that are rebooting, or that a newer re-dispatch still covers,
    /// are left for that run. `redispatch` is true when the closed stream
    /// was itself a re-dispatch. Returns the hosts ended here.
    pub fn end_unreturned(
        &self,
        target: &Target,
        redispatch: bool,
        at: Timestamp,
    ) -> Vec<HostId> {
        let ended: Vec<HostId> = {
            let mut dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
            if let (true, Target::Host(host)) = (redispatch, target) {
                if let Some(count) = dispatch.redispatched.get_mut(host) {
                    *count -= 1;
                    if *count == 0 {
                        dispatch.redispatched.remove(host);
                    }
                }
            }
            let mut model = self.model.write();
            target
                .hosts()
                .into_iter()
                .filter(|host| !dispatch.redispatched.contains_key(host))
                .filter(|host| {
                    model.host_mut(host).is_some_and(|h| {
                        !h.is_rebooting() && h.end(at, false).is_applied()
                    })
                })
                .collect()
        };
        for host in &ended {
            warn!(host = %host, "no return from host; counted as failed");
            self.notify(RenderSignal::HostUpdated(host.clone()));
        }
        if !ended.is_empty() {
            self.set_retcode(RETCODE_JOB_FAILED);
        }
        ended
    }

    /// Thread a reconciled failure into the host's history.
    pub fn host_failure(
        &self,
        host: &str,
        event: Option<&LifecycleEvent>,
        data: FailureData,
        at: Timestamp,
    ) {
        let failure = data.to_value();
        {
            let mut model = self.model.write();
            let Some(h) = model.host_mut(host) else {
                warn!(host = %host, "failure for a host outside the model");
                return;
            };
            h.report_failure(event, data, at);
        }
        self.notify(RenderSignal::HostFailure {
            host: host.to_string(),
            failure,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionModel;
    use crate::types::{JobSpec, Outcome};
    use serde_json::json;

    fn setup() -> (ExecutionController, mpsc::UnboundedReceiver<RenderSignal>) {
        let model = ExecutionModel::new(
            JobSpec::new("ceph-salt", json!({})),
            &["node1".to_string(), "node2".to_string()],
            None,
        )
        .expect("model");
        let (tx, rx) = mpsc::unbounded_channel();
        (ExecutionController::new(SharedModel::new(model), tx), rx)
    }

    fn ev(host: &str, kind: EventKind) -> BusEvent {
        BusEvent {
            host: host.to_string(),
            stamp: now(),
            kind,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RenderSignal>) -> Vec<RenderSignal> {
        let mut out = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            out.push(signal);
        }
        out
    }

    #[test]
    fn duplicates_do_not_notify() {
        let (ctl, mut rx) = setup();
        let begin = ev("node1", EventKind::StageBegin { desc: "Stage 1".into() });
        let end = ev("node1", EventKind::StageEnd { desc: "Stage 1".into() });
        ctl.apply(begin);
        ctl.apply(end.clone());
        assert_eq!(drain(&mut rx).len(), 2);

        let before = ctl.model().read().clone();
        ctl.apply(end);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(*ctl.model().read(), before);
    }

    #[test]
    fn step_outside_stage_is_ignored() {
        let (ctl, mut rx) = setup();
        let step = ctl.apply(ev("node1", EventKind::StepBegin { desc: "Step 1".into() }));
        assert!(step.commands.is_empty());
        assert!(drain(&mut rx).is_empty());
        assert!(ctl.model().read().host("node1").is_some_and(|h| h.entries().is_empty()));
    }

    #[test]
    fn reconnect_after_reboot_requests_redispatch() {
        let (ctl, mut rx) = setup();
        ctl.apply(ev("node1", EventKind::HostReboot { desc: "Rebooting...".into() }));
        assert!(ctl.model().read().host("node1").is_some_and(HostExecution::is_rebooting));

        let step = ctl.apply(ev("node1", EventKind::HostReconnect));
        assert_eq!(step.commands, vec![ControllerCommand::Redispatch("node1".into())]);
        assert!(!ctl.model().read().host("node1").is_some_and(HostExecution::is_rebooting));
        assert_eq!(drain(&mut rx).len(), 2);

        let step = ctl.apply(ev("node2", EventKind::HostReconnect));
        assert!(step.commands.is_empty());
    }

    #[test]
    fn failed_job_return_marks_host() {
        let (ctl, _rx) = setup();
        let step = ctl.apply(ev("node2", EventKind::JobReturn { success: false }));
        assert_eq!(step.commands, vec![ControllerCommand::MarkExecutionFailed("node2".into())]);
        let step = ctl.apply(ev("node2", EventKind::JobReturn { success: true }));
        assert!(step.commands.is_empty());
    }

    #[test]
    fn last_dispatcher_ends_run_unless_rebooting() {
        let (ctl, mut rx) = setup();
        ctl.enter_dispatch();
        assert!(ctl.model().read().is_running());

        ctl.apply(ev("node1", EventKind::HostReboot { desc: "Rebooting...".into() }));
        ctl.leave_dispatch();
        assert!(!ctl.model().read().is_finished());

        // Reconnect counts the re-dispatched run in.
        ctl.apply(ev("node1", EventKind::HostReconnect));
        ctl.leave_dispatch();
        assert!(ctl.model().read().is_finished());

        let signals = drain(&mut rx);
        assert_eq!(signals.first(), Some(&RenderSignal::ExecutionStarted));
        assert_eq!(signals.last(), Some(&RenderSignal::ExecutionStopped));
    }

    #[test]
    fn rebooting_host_is_not_ended_by_its_return() {
        let (ctl, _rx) = setup();
        ctl.apply(ev("node1", EventKind::HostReboot { desc: "Rebooting...".into() }));
        assert_eq!(ctl.host_finished("node1", now(), true), Transition::OutOfContext);
        assert_eq!(ctl.host_finished("node2", now(), false), Transition::Applied);
        let model = ctl.model().read();
        assert!(!model.host("node1").is_some_and(HostExecution::is_finished));
        assert_eq!(model.host("node2").map(HostExecution::outcome), Some(Outcome::Failed));
    }

    #[test]
    fn unreturned_hosts_are_ended_as_failed() {
        let (ctl, mut rx) = setup();
        let fleet = Target::Fleet(vec!["node1".into(), "node2".into()]);
        assert_eq!(ctl.host_finished("node1", now(), true), Transition::Applied);
        drain(&mut rx);

        assert_eq!(ctl.end_unreturned(&fleet, false, now()), vec!["node2".to_string()]);
        assert_eq!(drain(&mut rx), vec![RenderSignal::HostUpdated("node2".into())]);
        assert_eq!(ctl.retcode(), RETCODE_JOB_FAILED);
        let model = ctl.model().read();
        assert_eq!(model.host("node1").map(HostExecution::outcome), Some(Outcome::Succeeded));
        assert_eq!(model.host("node2").map(HostExecution::outcome), Some(Outcome::Failed));
        assert_eq!(model.summary().failed, 1);
    }

    #[test]
    fn redispatched_host_is_left_to_its_own_stream() {
        let (ctl, _rx) = setup();
        let fleet = Target::Fleet(vec!["node1".into(), "node2".into()]);
        ctl.host_finished("node2", now(), true);
        ctl.apply(ev("node1", EventKind::HostReboot { desc: "Rebooting...".into() }));
        assert!(ctl.end_unreturned(&fleet, false, now()).is_empty());

        // Reconnected before the fleet stream closed.
        ctl.apply(ev("node1", EventKind::HostReconnect));
        assert!(ctl.end_unreturned(&fleet, false, now()).is_empty());
        assert_eq!(ctl.retcode(), RETCODE_OK);

        let node1 = Target::Host("node1".into());
        assert_eq!(ctl.end_unreturned(&node1, true, now()), vec!["node1".to_string()]);
        assert_eq!(ctl.retcode(), RETCODE_JOB_FAILED);
    }

    #[test]
    fn retcode_keeps_the_maximum() {
        let (ctl, _rx) = setup();
        ctl.set_retcode(3);
        ctl.set_retcode(2);
        assert_eq!(ctl.retcode(), 3);
    }
}
