// src/exec/result.rs

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{FleetError, Result};
use crate::exec::backend::ReturnBatch;

/// Outcome of one named operation in a host's run history.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// Full operation name (`<module>_|-<id>_|-<name>_|-<function>`).
    pub name: String,
    pub run_num: u64,
    pub result: bool,
    /// The whole record, used as failure payload.
    pub data: Value,
}

/// What a host's run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Per-operation results.
    Operations(Vec<OperationResult>),
    /// Errors that happened before any operation ran (e.g. a render error).
    Errors(Vec<Value>),
}

impl JobResult {
    /// Decode the `ret` value of a host return.
    ///
    /// Objects map operation names to records carrying `__run_num__` and
    /// `result`. Lists (or bare strings) are compound errors.
    pub fn from_value(ret: Value) -> Result<Self> {
        match ret {
            Value::Object(map) => {
                let mut ops = Vec::with_capacity(map.len());
                for (name, data) in map {
                    let run_num = data
                        .get("__run_num__")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            FleetError::Backend(format!("operation '{name}' without __run_num__"))
                        })?;
                    let result = data.get("result").and_then(Value::as_bool).unwrap_or(false);
                    ops.push(OperationResult {
                        name,
                        run_num,
                        result,
                        data,
                    });
                }
                Ok(JobResult::Operations(ops))
            }
            Value::Array(list) => Ok(JobResult::Errors(list)),
            other => Ok(JobResult::Errors(vec![other])),
        }
    }
}

/// One host's return.
#[derive(Debug, Clone, PartialEq)]
pub struct HostReturn {
    pub retcode: i32,
    pub ret: JobResult,
}

impl HostReturn {
    pub fn succeeded(&self) -> bool {
        self.retcode == 0
    }
}

#[derive(Deserialize)]
struct RawHostReturn {
    #[serde(default)]
    retcode: i32,
    ret: Value,
}

/// Parse one streamed line: a JSON object of host → `{retcode, ret}`.
pub fn parse_batch(line: &str) -> Result<ReturnBatch> {
    let raw: BTreeMap<String, RawHostReturn> = serde_json::from_str(line)?;
    raw.into_iter()
        .map(|(host, r)| {
            let ret = JobResult::from_value(r.ret)?;
            Ok((
                host,
                HostReturn {
                    retcode: r.retcode,
                    ret,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_operation_histories() {
        let line = json!({
            "node1": {
                "retcode": 2,
                "ret": {
                    "ceph_salt_|-begin_stage_a_|-Stage 1_|-begin_stage": {"__run_num__": 0, "result": true},
                    "cmd_|-install_|-zypper in foo_|-run": {"__run_num__": 1, "result": false, "__id__": "install"}
                }
            }
        })
        .to_string();
        let batch = parse_batch(&line).expect("batch");
        let ret = &batch["node1"];
        assert_eq!(ret.retcode, 2);
        assert!(!ret.succeeded());
        let JobResult::Operations(ops) = &ret.ret else {
            panic!("expected operations");
        };
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().any(|op| op.run_num == 1 && !op.result));
    }

    #[test]
    fn lists_and_strings_are_compound_errors() {
        let batch = parse_batch(r#"{"a": {"retcode": 1, "ret": ["x", "y"]}, "b": {"ret": "boom"}}"#)
            .expect("batch");
        assert_eq!(batch["a"].ret, JobResult::Errors(vec![json!("x"), json!("y")]));
        assert_eq!(batch["b"].ret, JobResult::Errors(vec![json!("boom")]));
        assert!(batch["b"].succeeded());
    }

    #[test]
    fn operation_without_run_num_is_rejected() {
        let err = parse_batch(r#"{"a": {"retcode": 0, "ret": {"op": {"result": true}}}}"#)
            .unwrap_err();
        assert!(matches!(err, FleetError::Backend(_)));
    }
}
