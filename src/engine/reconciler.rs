// src/engine/reconciler.rs

//! Attribution of failed operations to the stage or step that enclosed them.
//!
//! A host's run history is the full list of operations it executed, each
//! with its run order. Lifecycle operations (begin/end of a stage or step)
//! are part of that history, so for every failed operation the most recent
//! lifecycle operation before it names the enclosing stage or step.

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{FleetError, Result};
use crate::exec::{JobResult, OperationResult};
use crate::model::{FailureData, LifecycleEvent, LifecycleKind};

/// A failure plus the lifecycle event enclosing it, if one was found.
pub type Attribution = (Option<LifecycleEvent>, FailureData);

#[derive(Debug, Clone)]
pub struct FailureReconciler {
    lifecycle: Regex,
}

impl FailureReconciler {
    /// `operation_prefix` is the module name of lifecycle operations, e.g.
    /// `ceph_salt` for `ceph_salt_|-begin_stage_x_|-Stage 1_|-begin_stage`.
    pub fn new(operation_prefix: &str) -> Result<Self> {
        let pattern = format!(
            r"^{}_\|-([a-z]+_[a-z]+)_.+_\|-(.+)_\|.*$",
            regex::escape(operation_prefix)
        );
        let lifecycle = Regex::new(&pattern)
            .map_err(|e| FleetError::ConfigError(format!("invalid operation prefix: {e}")))?;
        Ok(Self { lifecycle })
    }

    /// Parse a lifecycle operation name into its kind and description.
    pub fn parse_lifecycle(&self, name: &str) -> Option<(LifecycleKind, String)> {
        let caps = self.lifecycle.captures(name)?;
        let kind = LifecycleKind::parse(caps.get(1)?.as_str())?;
        Some((kind, caps.get(2)?.as_str().to_string()))
    }

    /// Failures of one host's run, in run order.
    pub fn reconcile(&self, host: &str, result: &JobResult) -> Vec<Attribution> {
        let ops = match result {
            JobResult::Errors(list) if list.is_empty() => return Vec::new(),
            JobResult::Errors(list) => {
                info!(host = %host, errors = list.len(), "reporting compound failure");
                return vec![(None, FailureData::Compound(list.clone()))];
            }
            JobResult::Operations(ops) => ops,
        };

        let mut seq: Vec<&OperationResult> = ops.iter().collect();
        seq.sort_by_key(|op| op.run_num);

        let mut failures = Vec::new();
        for (idx, op) in seq.iter().enumerate() {
            if op.result {
                continue;
            }
            let event = self.find_outer_event(&seq, idx, false);
            match &event {
                Some(ev) => info!(host = %host, op = %op.name, event = %ev, "reporting failure"),
                None => warn!(host = %host, op = %op.name, "could not find the outer event"),
            }
            let mut data = op.data.clone();
            if let Value::Object(map) = &mut data {
                map.insert("state".to_string(), Value::String(op.name.clone()));
            }
            failures.push((event, FailureData::Single(data)));
        }
        failures
    }

    /// Most recent lifecycle operation before `idx`. For a step, the
    /// enclosing stage is searched further back from the step.
    fn find_outer_event(
        &self,
        seq: &[&OperationResult],
        idx: usize,
        stages_only: bool,
    ) -> Option<LifecycleEvent> {
        for pos in (0..idx).rev() {
            let Some((kind, desc)) = self.parse_lifecycle(&seq[pos].name) else {
                continue;
            };
            if stages_only && !kind.is_stage() {
                continue;
            }
            debug!(pos, kind = kind.as_str(), desc = %desc, "outer event candidate");
            let event = LifecycleEvent::new(kind, desc);
            if kind.is_step() {
                return Some(match self.find_outer_event(seq, pos, true) {
                    Some(stage) => event.within(stage),
                    None => event,
                });
            }
            return Some(event);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(name: &str, run_num: u64, result: bool) -> OperationResult {
        OperationResult {
            name: name.to_string(),
            run_num,
            result,
            data: json!({"__id__": name, "result": result}),
        }
    }

    fn reconciler() -> FailureReconciler {
        FailureReconciler::new("ceph_salt").expect("reconciler")
    }

    #[test]
    fn parses_lifecycle_names() {
        let r = reconciler();
        assert_eq!(
            r.parse_lifecycle("ceph_salt_|-begin_stage_pkgs_|-Install packages_|-begin_stage"),
            Some((LifecycleKind::BeginStage, "Install packages".to_string()))
        );
        assert_eq!(r.parse_lifecycle("cmd_|-install_|-zypper_|-run"), None);
        assert_eq!(r.parse_lifecycle("ceph_salt_|-set_reboot_x_|-Reboot_|-set_reboot"), None);
    }

    #[test]
    fn step_failure_carries_its_stage() {
        let ops = vec![
            op("ceph_salt_|-begin_stage_s_|-Stage 1_|-begin_stage", 0, true),
            op("ceph_salt_|-begin_step_a_|-Step 1_|-begin_step", 1, true),
            op("cmd_|-run_|-false_|-run", 2, false),
        ];
        let out = reconciler().reconcile("node1", &JobResult::Operations(ops));
        assert_eq!(out.len(), 1);
        let (event, data) = &out[0];
        let event = event.as_ref().expect("event");
        assert_eq!(event.kind, LifecycleKind::BeginStep);
        assert_eq!(event.desc, "Step 1");
        assert_eq!(event.stage.as_ref().map(|s| s.desc.as_str()), Some("Stage 1"));
        let FailureData::Single(value) = data else {
            panic!("expected a single failure");
        };
        assert_eq!(value["state"], "cmd_|-run_|-false_|-run");
    }

    #[test]
    fn failures_come_back_in_run_order() {
        let ops = vec![
            op("b", 3, false),
            op("ceph_salt_|-end_stage_s_|-Stage 1_|-end_stage", 1, true),
            op("a", 2, false),
            op("first", 0, false),
        ];
        let out = reconciler().reconcile("node1", &JobResult::Operations(ops));
        let ids: Vec<&str> = out
            .iter()
            .map(|(_, d)| match d {
                FailureData::Single(v) => v["__id__"].as_str().unwrap_or_default(),
                FailureData::Compound(_) => "compound",
            })
            .collect();
        assert_eq!(ids, vec!["first", "a", "b"]);
        assert!(out[0].0.is_none());
        assert_eq!(out[1].0.as_ref().map(|e| e.kind), Some(LifecycleKind::EndStage));
    }

    #[test]
    fn error_lists_are_one_compound_failure() {
        let out = reconciler().reconcile(
            "node1",
            &JobResult::Errors(vec![json!("Rendering SLS failed")]),
        );
        assert_eq!(out, vec![(None, FailureData::Compound(vec![json!("Rendering SLS failed")]))]);
        assert!(reconciler().reconcile("node1", &JobResult::Errors(Vec::new())).is_empty());
    }
}
