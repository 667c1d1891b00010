// src/model/stage.rs

use serde_json::Value;
use tracing::{info, warn};

use crate::model::failure::{
    after_position, head_position, FailureRecord, HistoryEntry, LifecycleEvent, LifecycleKind,
};
use crate::model::step::Step;
use crate::types::{HostId, Outcome, Timestamp, Transition};

/// One entry of a stage's step history.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEntry {
    Step(Step),
    /// A failure that could not be matched to a named step.
    Failure(FailureRecord),
}

impl HistoryEntry for StepEntry {
    fn is_failure(&self) -> bool {
        matches!(self, StepEntry::Failure(_))
    }
}

impl StepEntry {
    pub fn as_step(&self) -> Option<&Step> {
        match self {
            StepEntry::Step(step) => Some(step),
            StepEntry::Failure(_) => None,
        }
    }
}

/// A named, ordered phase of the job on one host.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    host: HostId,
    desc: String,
    entries: Vec<StepEntry>,
    current_step: Option<String>,
    begin_time: Timestamp,
    end_time: Option<Timestamp>,
    outcome: Outcome,
    warning: bool,
}

impl Stage {
    pub(crate) fn open(host: &str, desc: &str, begin_time: Timestamp) -> Self {
        info!(host = %host, desc = %desc, "STAGE [BEGIN]");
        Self {
            host: host.to_string(),
            desc: desc.to_string(),
            entries: Vec::new(),
            current_step: None,
            begin_time,
            end_time: None,
            outcome: Outcome::Unknown,
            warning: false,
        }
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn host(&self) -> &str {
        &self.host
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

    pub fn has_warning(&self) -> bool {
        self.warning
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Full step history, failure records included, in display order.
    pub fn entries(&self) -> &[StepEntry] {
        &self.entries
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.entries.iter().filter_map(StepEntry::as_step)
    }

    pub fn step(&self, desc: &str) -> Option<&Step> {
        self.steps().find(|s| s.desc() == desc)
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.current_step.as_deref().and_then(|desc| self.step(desc))
    }

    /// The open step, or else the most recent one.
    pub fn last_step(&self) -> Option<&Step> {
        self.current_step().or_else(|| self.steps().last())
    }

    fn position_of(&self, desc: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e, StepEntry::Step(s) if s.desc() == desc))
    }

    fn step_mut(&mut self, desc: &str) -> Option<&mut Step> {
        self.entries.iter_mut().find_map(|e| match e {
            StepEntry::Step(s) if s.desc() == desc => Some(s),
            _ => None,
        })
    }

    pub(crate) fn step_begin(&mut self, desc: &str, at: Timestamp) -> Transition {
        if self.position_of(desc).is_some() {
            return Transition::Duplicate;
        }
        let step = Step::open(&self.host, desc, at);
        self.entries.push(StepEntry::Step(step));
        self.current_step = Some(desc.to_string());
        Transition::Applied
    }

    /// End a step. An end without a begin synthesises a zero-duration step.
    pub(crate) fn step_end(&mut self, desc: &str, at: Timestamp) -> Transition {
        let host = self.host.clone();
        if self.position_of(desc).is_none() {
            warn!(host = %host, desc = %desc, "received end_step event without a begin");
            self.entries.push(StepEntry::Step(Step::open(&host, desc, at)));
        }
        let Some(step) = self.step_mut(desc) else {
            return Transition::Duplicate;
        };
        if step.is_finished() {
            return Transition::Duplicate;
        }
        step.close(&host, at, true);
        if self.current_step.as_deref() == Some(desc) {
            self.current_step = None;
        }
        Transition::Applied
    }

    /// Close the stage, force-closing every step still open under it.
    pub(crate) fn close(&mut self, at: Timestamp, success: bool) {
        self.end_time = Some(at);
        self.current_step = None;
        if self.outcome != Outcome::Failed {
            self.outcome = Outcome::from_success(success);
        }
        let host = self.host.clone();
        for entry in self.entries.iter_mut() {
            if let StepEntry::Step(step) = entry {
                if !step.is_finished() {
                    step.close(&host, at, true);
                }
            }
        }
        info!(host = %self.host, desc = %self.desc, success, "STAGE [END]");
    }

    pub(crate) fn mark_warning(&mut self) {
        self.warning = true;
    }

    /// Mark the stage failed and thread `data` into its step history.
    ///
    /// - no event: failure record at the head of the steps
    /// - `begin_step`: failure attached to that step
    /// - `end_step`: failure record right after that step
    pub(crate) fn report_failure(
        &mut self,
        event: Option<&LifecycleEvent>,
        data: Value,
        at: Timestamp,
    ) {
        if !self.is_finished() {
            self.close(at, false);
        }
        self.outcome = Outcome::Failed;

        let Some(event) = event.filter(|ev| ev.kind.is_step()) else {
            self.insert_failure(head_position(&self.entries), data);
            return;
        };

        match (event.kind, self.position_of(&event.desc)) {
            (LifecycleKind::BeginStep, Some(_)) => {
                if let Some(step) = self.step_mut(&event.desc) {
                    step.report_failure(data, at);
                }
            }
            (_, Some(idx)) => {
                let pos = after_position(&self.entries, idx);
                self.insert_failure(pos, data);
            }
            (_, None) => {
                warn!(
                    host = %self.host,
                    stage = %self.desc,
                    step = %event.desc,
                    "failure refers to a step missing from this stage"
                );
                self.insert_failure(head_position(&self.entries), data);
            }
        }
    }

    fn insert_failure(&mut self, pos: usize, data: Value) {
        self.entries
            .insert(pos, StepEntry::Failure(FailureRecord::new(data)));
    }
}
