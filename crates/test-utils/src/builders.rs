#![allow(dead_code)]

use serde_json::{json, Map, Value};

use fleetexec::bus::RawEnvelope;
use fleetexec::config::{
    BackendSection, BusSection, ConfigFile, JobSection, MarkersSection, PreflightConfig,
    RawConfigFile, RenderSection,
};
use fleetexec::exec::{HostReturn, JobResult, ReturnBatch};
use fleetexec::types::{now, STAMP_FORMAT};

pub const PREFIX: &str = "ceph-salt";
pub const OPERATION_PREFIX: &str = "ceph_salt";

fn stamp() -> String {
    now().format(STAMP_FORMAT).to_string()
}

/// A `<prefix>/<suffix>` lifecycle envelope from `host`.
pub fn lifecycle(suffix: &str, host: &str, desc: &str) -> RawEnvelope {
    RawEnvelope::new(
        format!("{PREFIX}/{suffix}"),
        json!({"id": host, "_stamp": stamp(), "data": {"desc": desc}}),
    )
}

pub fn stage_begin(host: &str, desc: &str) -> RawEnvelope {
    lifecycle("stage/begin", host, desc)
}

pub fn stage_end(host: &str, desc: &str) -> RawEnvelope {
    lifecycle("stage/end", host, desc)
}

pub fn stage_warning(host: &str, desc: &str) -> RawEnvelope {
    lifecycle("stage/warning", host, desc)
}

pub fn step_begin(host: &str, desc: &str) -> RawEnvelope {
    lifecycle("step/begin", host, desc)
}

pub fn step_end(host: &str, desc: &str) -> RawEnvelope {
    lifecycle("step/end", host, desc)
}

pub fn reboot(host: &str) -> RawEnvelope {
    lifecycle("minion_reboot", host, "Rebooting...")
}

pub fn reconnect(host: &str) -> RawEnvelope {
    RawEnvelope::new("minion_start", json!({"id": host, "_stamp": stamp()}))
}

pub fn job_return(host: &str, success: bool) -> RawEnvelope {
    RawEnvelope::new(
        format!("salt/job/20200117151954/ret/{host}"),
        json!({"id": host, "_stamp": stamp(), "fun": "state.apply", "success": success}),
    )
}

/// Builder for one host's run history (operation name → record), numbering
/// operations in the order they are added.
#[derive(Debug, Default)]
pub struct RunHistoryBuilder {
    ops: Map<String, Value>,
}

impl RunHistoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: String, mut record: Value) -> Self {
        let run_num = self.ops.len();
        record["__run_num__"] = json!(run_num);
        self.ops.insert(name, record);
        self
    }

    fn marker(self, kind: &str, desc: &str) -> Self {
        let id = format!("{kind}_{}", desc.to_lowercase().replace(' ', "_"));
        let name = format!("{OPERATION_PREFIX}_|-{id}_|-{desc}_|-{kind}");
        self.push(name, json!({"__id__": id, "result": true, "comment": ""}))
    }

    pub fn stage_begin(self, desc: &str) -> Self {
        self.marker("begin_stage", desc)
    }

    pub fn stage_end(self, desc: &str) -> Self {
        self.marker("end_stage", desc)
    }

    pub fn step_begin(self, desc: &str) -> Self {
        self.marker("begin_step", desc)
    }

    pub fn step_end(self, desc: &str) -> Self {
        self.marker("end_step", desc)
    }

    /// A plain operation with a comment.
    pub fn op(self, id: &str, ok: bool, comment: &str) -> Self {
        let name = format!("file_|-{id}_|-/etc/{id}_|-managed");
        self.push(
            name,
            json!({"__id__": id, "__sls__": "ceph-salt.apply", "result": ok, "comment": comment}),
        )
    }

    /// A `cmd.run` operation with stderr.
    pub fn cmd(self, id: &str, ok: bool, command: &str, stderr: &str) -> Self {
        let name = format!("cmd_|-{id}_|-{command}_|-run");
        self.push(
            name,
            json!({
                "__id__": id,
                "__sls__": "ceph-salt.apply",
                "result": ok,
                "comment": "Command failed",
                "changes": {"stderr": stderr, "retcode": 1}
            }),
        )
    }

    pub fn build(self) -> Value {
        Value::Object(self.ops)
    }

    pub fn into_return(self, retcode: i32) -> HostReturn {
        HostReturn {
            retcode,
            ret: JobResult::from_value(self.build()).expect("run history"),
        }
    }
}

/// A return carrying errors with no enclosing stage (e.g. a render error).
pub fn error_return(errors: &[&str]) -> HostReturn {
    HostReturn {
        retcode: 1,
        ret: JobResult::Errors(errors.iter().map(|e| json!(e)).collect()),
    }
}

pub fn batch(entries: Vec<(&str, HostReturn)>) -> ReturnBatch {
    entries
        .into_iter()
        .map(|(host, ret)| (host.to_string(), ret))
        .collect()
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(job: &str) -> Self {
        Self {
            config: RawConfigFile {
                job: JobSection {
                    name: job.to_string(),
                    hosts: vec![],
                    params: json!({}),
                },
                bus: BusSection::default(),
                backend: BackendSection::default(),
                render: RenderSection::default(),
                markers: MarkersSection::default(),
                preflight: vec![],
            },
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.config.job.hosts.push(host.to_string());
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.config.job.params = params;
        self
    }

    pub fn tick_ms(mut self, tick_ms: u64) -> Self {
        self.config.render.tick_ms = tick_ms;
        self
    }

    pub fn preflight(mut self, name: &str, cmd: &str, code: i32) -> Self {
        self.config.preflight.push(PreflightConfig {
            name: name.to_string(),
            cmd: cmd.to_string(),
            code,
        });
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}
