// src/model/host.rs

use serde_json::Value;
use tracing::{info, warn};

use crate::model::failure::{
    after_position, head_position, FailureData, FailureRecord, HistoryEntry, LifecycleEvent,
    LifecycleKind,
};
use crate::model::stage::Stage;
use crate::types::{now, HostId, Outcome, Timestamp, Transition};

/// Description of the synthetic stage opened while a host reboots.
pub const REBOOT_STAGE: &str = "Reboot";

/// One entry of a host's stage history.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEntry {
    Stage(Stage),
    /// A failure that could not be matched to a named stage.
    Failure(FailureRecord),
}

impl HistoryEntry for StageEntry {
    fn is_failure(&self) -> bool {
        matches!(self, StageEntry::Failure(_))
    }
}

impl StageEntry {
    pub fn as_stage(&self) -> Option<&Stage> {
        match self {
            StageEntry::Stage(stage) => Some(stage),
            StageEntry::Failure(_) => None,
        }
    }
}

/// Progress of the job on one host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostExecution {
    id: HostId,
    entries: Vec<StageEntry>,
    current_stage: Option<String>,
    begin_time: Timestamp,
    end_time: Option<Timestamp>,
    rebooting: bool,
    /// The reboot stage a reconnect closes.
    reboot_stage: Option<String>,
    warnings: Vec<String>,
    outcome: Outcome,
}

impl HostExecution {
    pub fn new(id: impl Into<HostId>) -> Self {
        Self {
            id: id.into(),
            entries: Vec::new(),
            current_stage: None,
            begin_time: now(),
            end_time: None,
            rebooting: false,
            reboot_stage: None,
            warnings: Vec::new(),
            outcome: Outcome::Unknown,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn begin_time(&self) -> Timestamp {
        self.begin_time
    }

    pub fn end_time(&self) -> Option<Timestamp> {
        self.end_time
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn is_rebooting(&self) -> bool {
        self.rebooting
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// True when any failure was reported against this host.
    pub fn has_failure(&self) -> bool {
        self.entries.iter().any(|entry| match entry {
            StageEntry::Failure(_) => true,
            StageEntry::Stage(stage) => stage.outcome() == Outcome::Failed,
        })
    }

    pub fn entries(&self) -> &[StageEntry] {
        &self.entries
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.entries.iter().filter_map(StageEntry::as_stage)
    }

    pub fn stage(&self, desc: &str) -> Option<&Stage> {
        self.stages().find(|s| s.desc() == desc)
    }

    pub fn current_stage(&self) -> Option<&Stage> {
        self.current_stage.as_deref().and_then(|desc| self.stage(desc))
    }

    /// The open stage, or else the most recent one.
    pub fn last_stage(&self) -> Option<&Stage> {
        self.current_stage().or_else(|| self.stages().last())
    }

    fn position_of(&self, desc: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e, StageEntry::Stage(s) if s.desc() == desc))
    }

    fn stage_mut(&mut self, desc: &str) -> Option<&mut Stage> {
        self.entries.iter_mut().find_map(|e| match e {
            StageEntry::Stage(s) if s.desc() == desc => Some(s),
            _ => None,
        })
    }

    fn current_stage_mut(&mut self) -> Option<&mut Stage> {
        let desc = self.current_stage.clone()?;
        self.stage_mut(&desc)
    }

    /// Logs and reports `OutOfContext` for an event that would open
    /// something on a finished host.
    fn after_end(&self, what: &str, desc: &str) -> Option<Transition> {
        if !self.is_finished() {
            return None;
        }
        warn!(host = %self.id, desc = %desc, event = what, "event after the host finished");
        Some(Transition::OutOfContext)
    }

    pub fn stage_begin(&mut self, desc: &str, at: Timestamp) -> Transition {
        if let Some(late) = self.after_end("begin_stage", desc) {
            return late;
        }
        if self.position_of(desc).is_some() {
            return Transition::Duplicate;
        }
        let stage = Stage::open(&self.id, desc, at);
        self.entries.push(StageEntry::Stage(stage));
        self.current_stage = Some(desc.to_string());
        Transition::Applied
    }

    /// End a stage. An end without a begin synthesises a zero-duration stage.
    pub fn stage_end(&mut self, desc: &str, at: Timestamp) -> Transition {
        if self.position_of(desc).is_none() {
            if let Some(late) = self.after_end("end_stage", desc) {
                return late;
            }
            warn!(host = %self.id, desc = %desc, "received end_stage event without a begin");
            let stage = Stage::open(&self.id, desc, at);
            self.entries.push(StageEntry::Stage(stage));
        }
        let Some(stage) = self.stage_mut(desc) else {
            return Transition::Duplicate;
        };
        if stage.is_finished() {
            return Transition::Duplicate;
        }
        stage.close(at, true);
        if self.current_stage.as_deref() == Some(desc) {
            self.current_stage = None;
        }
        Transition::Applied
    }

    pub fn step_begin(&mut self, desc: &str, at: Timestamp) -> Transition {
        if let Some(late) = self.after_end("begin_step", desc) {
            return late;
        }
        let id = self.id.clone();
        match self.current_stage_mut() {
            Some(stage) => stage.step_begin(desc, at),
            None => {
                warn!(host = %id, desc = %desc, "received begin_step event outside a stage");
                Transition::OutOfContext
            }
        }
    }

    pub fn step_end(&mut self, desc: &str, at: Timestamp) -> Transition {
        let id = self.id.clone();
        match self.current_stage_mut() {
            Some(stage) => stage.step_end(desc, at),
            None => {
                warn!(host = %id, desc = %desc, "received end_step event outside a stage");
                Transition::OutOfContext
            }
        }
    }

    /// Record a stage warning and flag the current (or last) stage.
    pub fn stage_warning(&mut self, desc: &str) -> Transition {
        warn!(host = %self.id, desc = %desc, "stage warning");
        self.warnings.push(desc.to_string());
        let target = self
            .current_stage
            .clone()
            .or_else(|| self.stages().last().map(|s| s.desc().to_string()));
        if let Some(stage) = target.and_then(|desc| self.stage_mut(&desc)) {
            stage.mark_warning();
        }
        Transition::Applied
    }

    /// Enter the reboot state and open a synthetic reboot stage.
    ///
    /// The first reboot of a run opens "Reboot", later ones "Reboot (2)",
    /// "Reboot (3)" and so on.
    pub fn reboot(&mut self, at: Timestamp) -> Transition {
        if let Some(late) = self.after_end("reboot", REBOOT_STAGE) {
            return late;
        }
        if self.rebooting {
            return Transition::Duplicate;
        }
        info!(host = %self.id, "host is rebooting");
        let desc = self.next_reboot_stage();
        self.rebooting = true;
        self.stage_begin(&desc, at);
        self.reboot_stage = Some(desc);
        Transition::Applied
    }

    fn next_reboot_stage(&self) -> String {
        let mut desc = REBOOT_STAGE.to_string();
        let mut n = 1;
        while self.position_of(&desc).is_some() {
            n += 1;
            desc = format!("{REBOOT_STAGE} ({n})");
        }
        desc
    }

    /// Leave the reboot state. Returns `OutOfContext` when the host was not
    /// rebooting.
    pub fn reconnect(&mut self, at: Timestamp) -> Transition {
        if !self.rebooting {
            return Transition::OutOfContext;
        }
        info!(host = %self.id, "host reconnected");
        self.rebooting = false;
        let Some(desc) = self.reboot_stage.take() else {
            return Transition::Applied;
        };
        if let Some(stage) = self.stage_mut(&desc) {
            if !stage.is_finished() {
                stage.close(at, true);
            }
        }
        if self.current_stage.as_deref() == Some(desc.as_str()) {
            self.current_stage = None;
        }
        Transition::Applied
    }

    /// Mark the host's run finished, force-closing every open stage and step.
    pub fn end(&mut self, at: Timestamp, success: bool) -> Transition {
        if self.is_finished() {
            return Transition::Duplicate;
        }
        self.end_time = Some(at);
        if self.outcome != Outcome::Failed {
            self.outcome = Outcome::from_success(success);
        }
        self.current_stage = None;
        for entry in self.entries.iter_mut() {
            if let StageEntry::Stage(stage) = entry {
                if !stage.is_finished() {
                    stage.close(at, true);
                }
            }
        }
        info!(host = %self.id, success, "HOST [END]");
        Transition::Applied
    }

    /// Thread `data` back into the history at the position `event` names.
    ///
    /// The host is ended unsuccessfully first if it is still open.
    pub fn report_failure(
        &mut self,
        event: Option<&LifecycleEvent>,
        data: FailureData,
        at: Timestamp,
    ) {
        if !self.is_finished() {
            self.end(at, false);
        }
        self.outcome = Outcome::Failed;

        let data = match data {
            FailureData::Compound(list) => {
                for item in list {
                    self.insert_failure(head_position(&self.entries), item);
                }
                return;
            }
            FailureData::Single(value) => value,
        };

        let Some(event) = event else {
            self.insert_failure(head_position(&self.entries), data);
            return;
        };

        if event.kind.is_stage() {
            match (event.kind, self.position_of(&event.desc)) {
                (LifecycleKind::BeginStage, Some(_)) => {
                    if let Some(stage) = self.stage_mut(&event.desc) {
                        stage.report_failure(None, data, at);
                    }
                }
                (_, Some(idx)) => {
                    let pos = after_position(&self.entries, idx);
                    self.insert_failure(pos, data);
                }
                (_, None) => self.unmatched(event, data),
            }
            return;
        }

        let stage_desc = event.stage.as_ref().map(|stage| stage.desc.clone());
        match stage_desc.and_then(|desc| self.stage_mut(&desc)) {
            Some(stage) => stage.report_failure(Some(event), data, at),
            None => self.unmatched(event, data),
        }
    }

    fn unmatched(&mut self, event: &LifecycleEvent, data: Value) {
        warn!(host = %self.id, event = %event, "failure refers to an unknown stage");
        self.insert_failure(head_position(&self.entries), data);
    }

    fn insert_failure(&mut self, pos: usize, data: Value) {
        self.entries
            .insert(pos, StageEntry::Failure(FailureRecord::new(data)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn ts(sec: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2020, 1, 17)
            .and_then(|d| d.and_hms_opt(15, 19, sec))
            .expect("valid timestamp")
    }

    fn descs(host: &HostExecution) -> Vec<String> {
        host.entries()
            .iter()
            .map(|e| match e {
                StageEntry::Stage(s) => s.desc().to_string(),
                StageEntry::Failure(f) => format!("!{}", f.id().unwrap_or("?")),
            })
            .collect()
    }

    #[test]
    fn step_outside_stage_is_out_of_context() {
        let mut host = HostExecution::new("node1");
        assert_eq!(host.step_begin("Step 1", ts(1)), Transition::OutOfContext);
        assert_eq!(host.step_end("Step 1", ts(1)), Transition::OutOfContext);
        assert!(host.entries().is_empty());
    }

    #[test]
    fn stage_begin_twice_is_duplicate() {
        let mut host = HostExecution::new("node1");
        assert_eq!(host.stage_begin("Stage 1", ts(1)), Transition::Applied);
        assert_eq!(host.stage_begin("Stage 1", ts(2)), Transition::Duplicate);
        assert_eq!(host.stages().count(), 1);
    }

    #[test]
    fn stage_end_closes_steps_and_clears_pointer() {
        let mut host = HostExecution::new("node1");
        host.stage_begin("Stage 1", ts(1));
        host.step_begin("Step 1", ts(2));
        assert_eq!(host.stage_end("Stage 1", ts(3)), Transition::Applied);
        assert_eq!(host.stage_end("Stage 1", ts(4)), Transition::Duplicate);
        assert!(host.current_stage().is_none());

        let stage = host.stage("Stage 1").expect("stage");
        assert_eq!(stage.end_time(), Some(ts(3)));
        assert!(stage.steps().all(|s| s.end_time() == Some(ts(3))));
    }

    #[test]
    fn end_force_closes_everything() {
        let mut host = HostExecution::new("node1");
        host.stage_begin("Stage 1", ts(1));
        host.step_begin("Step 1", ts(2));
        assert_eq!(host.end(ts(5), true), Transition::Applied);
        assert_eq!(host.end(ts(6), false), Transition::Duplicate);

        assert_eq!(host.outcome(), Outcome::Succeeded);
        for stage in host.stages() {
            assert_eq!(stage.outcome(), Outcome::Succeeded);
            assert!(stage.steps().all(|s| s.is_finished()));
        }
    }

    #[test]
    fn reboot_round_trip_leaves_prior_stages() {
        let mut host = HostExecution::new("node1");
        host.stage_begin("Stage 1", ts(1));
        host.stage_end("Stage 1", ts(2));

        assert_eq!(host.reboot(ts(3)), Transition::Applied);
        assert!(host.is_rebooting());
        assert_eq!(host.current_stage().map(Stage::desc), Some(REBOOT_STAGE));

        assert_eq!(host.reconnect(ts(9)), Transition::Applied);
        assert!(!host.is_rebooting());
        assert!(host.current_stage().is_none());
        let reboot = host.stage(REBOOT_STAGE).expect("reboot stage");
        assert_eq!(reboot.end_time(), Some(ts(9)));
        assert_eq!(host.stage("Stage 1").and_then(Stage::end_time), Some(ts(2)));

        assert_eq!(host.reconnect(ts(10)), Transition::OutOfContext);
    }

    #[test]
    fn second_reboot_opens_its_own_stage() {
        let mut host = HostExecution::new("node1");
        host.reboot(ts(1));
        host.reconnect(ts(2));
        assert_eq!(host.reboot(ts(3)), Transition::Applied);
        assert_eq!(host.current_stage().map(Stage::desc), Some("Reboot (2)"));
        assert!(host.stage("Reboot (2)").is_some_and(|s| !s.is_finished()));

        assert_eq!(host.reconnect(ts(4)), Transition::Applied);
        assert!(host.current_stage().is_none());
        assert_eq!(host.stage(REBOOT_STAGE).and_then(Stage::end_time), Some(ts(2)));
        assert_eq!(host.stage("Reboot (2)").and_then(Stage::end_time), Some(ts(4)));
    }

    #[test]
    fn finished_host_rejects_late_begins() {
        let mut host = HostExecution::new("node1");
        host.stage_begin("Stage 1", ts(1));
        host.end(ts(2), true);
        let before = host.clone();

        assert_eq!(host.stage_begin("Late", ts(3)), Transition::OutOfContext);
        assert_eq!(host.step_begin("Late step", ts(3)), Transition::OutOfContext);
        assert_eq!(host.stage_end("Never begun", ts(3)), Transition::OutOfContext);
        assert_eq!(host.stage_end("Stage 1", ts(3)), Transition::Duplicate);
        assert_eq!(host.reboot(ts(3)), Transition::OutOfContext);
        assert!(!host.is_rebooting());
        assert_eq!(host, before);
    }

    #[test]
    fn stage_warning_flags_current_stage() {
        let mut host = HostExecution::new("node1");
        host.stage_begin("Stage 1", ts(1));
        host.stage_warning("disk almost full");
        assert!(host.stage("Stage 1").is_some_and(Stage::has_warning));
        assert_eq!(host.warnings().to_vec(), vec!["disk almost full".to_string()]);
    }

    #[test]
    fn unattributed_failures_stack_at_head_in_order() {
        let mut host = HostExecution::new("node1");
        host.stage_begin("Stage 1", ts(1));
        host.report_failure(
            None,
            FailureData::Compound(vec![json!({"__id__": "a"}), json!({"__id__": "b"})]),
            ts(2),
        );
        host.report_failure(None, FailureData::Single(json!({"__id__": "c"})), ts(2));
        assert_eq!(descs(&host), vec!["!a", "!b", "!c", "Stage 1"]);
        assert_eq!(host.outcome(), Outcome::Failed);
        assert!(host.is_finished());
    }

    #[test]
    fn end_stage_failure_goes_after_stage() {
        let mut host = HostExecution::new("node1");
        host.stage_begin("Stage 1", ts(1));
        host.stage_end("Stage 1", ts(2));
        host.stage_begin("Stage 2", ts(3));
        let ev = LifecycleEvent::new(LifecycleKind::EndStage, "Stage 1");
        host.report_failure(Some(&ev), FailureData::Single(json!({"__id__": "x"})), ts(4));
        assert_eq!(descs(&host), vec!["Stage 1", "!x", "Stage 2"]);
    }

    #[test]
    fn step_failure_is_routed_to_enclosing_stage() {
        let mut host = HostExecution::new("node1");
        host.stage_begin("Stage 1", ts(1));
        host.step_begin("Step 1", ts(2));
        let ev = LifecycleEvent::new(LifecycleKind::BeginStep, "Step 1")
            .within(LifecycleEvent::new(LifecycleKind::BeginStage, "Stage 1"));
        host.report_failure(Some(&ev), FailureData::Single(json!({"__id__": "x"})), ts(3));

        let stage = host.stage("Stage 1").expect("stage");
        assert_eq!(stage.outcome(), Outcome::Failed);
        let step = stage.step("Step 1").expect("step");
        assert_eq!(step.outcome(), Outcome::Failed);
        assert!(step.failure().is_some());
        assert!(host.has_failure());
    }

    #[test]
    fn failure_for_unknown_stage_is_unattributed() {
        let mut host = HostExecution::new("node1");
        let ev = LifecycleEvent::new(LifecycleKind::BeginStage, "Missing");
        host.report_failure(Some(&ev), FailureData::Single(json!({"__id__": "x"})), ts(1));
        assert_eq!(descs(&host), vec!["!x"]);
    }
}
