// src/model/failure.rs

//! Failure records and the lifecycle events failures are attributed to.

use std::fmt;

use serde_json::Value;

/// Kind of a lifecycle operation found in a run history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    BeginStage,
    EndStage,
    BeginStep,
    EndStep,
}

impl LifecycleKind {
    /// Parse the `<kind>_<level>` token used in operation names.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "begin_stage" => Some(LifecycleKind::BeginStage),
            "end_stage" => Some(LifecycleKind::EndStage),
            "begin_step" => Some(LifecycleKind::BeginStep),
            "end_step" => Some(LifecycleKind::EndStep),
            _ => None,
        }
    }

    pub fn is_stage(self) -> bool {
        matches!(self, LifecycleKind::BeginStage | LifecycleKind::EndStage)
    }

    pub fn is_step(self) -> bool {
        !self.is_stage()
    }

    pub fn is_begin(self) -> bool {
        matches!(self, LifecycleKind::BeginStage | LifecycleKind::BeginStep)
    }

    pub fn is_end(self) -> bool {
        !self.is_begin()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleKind::BeginStage => "begin_stage",
            LifecycleKind::EndStage => "end_stage",
            LifecycleKind::BeginStep => "begin_step",
            LifecycleKind::EndStep => "end_step",
        }
    }
}

/// The lifecycle operation that was active when a failure happened.
///
/// For step events, `stage` is the stage event enclosing the step, if one
/// was found further back in the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub desc: String,
    pub stage: Option<Box<LifecycleEvent>>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleKind, desc: impl Into<String>) -> Self {
        Self {
            kind,
            desc: desc.into(),
            stage: None,
        }
    }

    pub fn within(mut self, stage: LifecycleEvent) -> Self {
        self.stage = Some(Box::new(stage));
        self
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            None => write!(f, "EV({}, {})", self.kind.as_str(), self.desc),
            Some(stage) => write!(f, "EV({}, {}, {})", self.kind.as_str(), self.desc, stage),
        }
    }
}

/// A failure that could not be attached to a named step, kept in history in
/// place of a stage or step.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    payload: Value,
}

impl FailureRecord {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The `__id__` of the failed operation, when the payload carries one.
    pub fn id(&self) -> Option<&str> {
        self.payload.get("__id__").and_then(Value::as_str)
    }
}

/// Failure data reported for one host.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureData {
    /// One failed operation.
    Single(Value),
    /// Independent errors with no enclosing stage (e.g. a render error of
    /// the whole job).
    Compound(Vec<Value>),
}

impl FailureData {
    /// Representation handed to renderers.
    pub fn to_value(&self) -> Value {
        match self {
            FailureData::Single(v) => v.clone(),
            FailureData::Compound(list) => Value::Array(list.clone()),
        }
    }
}

/// Entries of an ordered history that may be failure records.
pub(crate) trait HistoryEntry {
    fn is_failure(&self) -> bool;
}

/// Position right after the failures already inserted at the head.
///
/// Inserting there keeps successive head failures in the order they were
/// reported.
pub(crate) fn head_position<E: HistoryEntry>(entries: &[E]) -> usize {
    entries.iter().take_while(|e| e.is_failure()).count()
}

/// Position right after `idx` and any failures already placed after it.
pub(crate) fn after_position<E: HistoryEntry>(entries: &[E], idx: usize) -> usize {
    let mut pos = idx + 1;
    while pos < entries.len() && entries[pos].is_failure() {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    struct E(bool);

    impl HistoryEntry for E {
        fn is_failure(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn parses_lifecycle_tokens() {
        assert_eq!(LifecycleKind::parse("begin_stage"), Some(LifecycleKind::BeginStage));
        assert_eq!(LifecycleKind::parse("end_step"), Some(LifecycleKind::EndStep));
        assert_eq!(LifecycleKind::parse("set_reboot"), None);
        assert!(LifecycleKind::EndStage.is_stage() && LifecycleKind::EndStage.is_end());
        assert!(LifecycleKind::BeginStep.is_step() && LifecycleKind::BeginStep.is_begin());
    }

    #[test]
    fn insert_positions_skip_existing_failures() {
        let entries = [E(true), E(true), E(false), E(true), E(false)];
        assert_eq!(head_position(&entries), 2);
        assert_eq!(after_position(&entries, 2), 4);
        assert_eq!(after_position(&entries, 4), 5);
        assert_eq!(head_position::<E>(&[]), 0);
    }

    #[test]
    fn display_includes_enclosing_stage() {
        let ev = LifecycleEvent::new(LifecycleKind::BeginStep, "Step 1")
            .within(LifecycleEvent::new(LifecycleKind::BeginStage, "Stage 1"));
        assert_eq!(ev.to_string(), "EV(begin_step, Step 1, EV(begin_stage, Stage 1))");
    }
}
