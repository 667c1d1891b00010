// src/model/step.rs

use serde_json::Value;
use tracing::info;

use crate::types::{Outcome, Timestamp};

/// A named unit of work inside a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    desc: String,
    begin_time: Timestamp,
    end_time: Option<Timestamp>,
    outcome: Outcome,
    failure: Option<Value>,
}

impl Step {
    pub(crate) fn open(host: &str, desc: &str, begin_time: Timestamp) -> Self {
        info!(host = %host, desc = %desc, "STEP [BEGIN]");
        Self {
            desc: desc.to_string(),
            begin_time,
            end_time: None,
            outcome: Outcome::Unknown,
            failure: None,
        }
    }

    pub(crate) fn close(&mut self, host: &str, at: Timestamp, success: bool) {
        self.end_time = Some(at);
        if self.outcome != Outcome::Failed {
            self.outcome = Outcome::from_success(success);
        }
        info!(host = %host, desc = %self.desc, success, "STEP [END]");
    }

    /// Attach a failure payload. An open step is closed at `at`.
    pub(crate) fn report_failure(&mut self, data: Value, at: Timestamp) {
        self.failure = Some(data);
        self.outcome = Outcome::Failed;
        if self.end_time.is_none() {
            self.end_time = Some(at);
        }
    }

    pub fn desc(&self) -> &str {
        &self.desc
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

    pub fn failure(&self) -> Option<&Value> {
        self.failure.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}
