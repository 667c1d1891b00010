// src/config/model.rs

use serde::Deserialize;
use serde_json::Value;

use crate::bus::DecoderOptions;
use crate::types::{HostId, JobSpec};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [job]
/// name = "ceph-salt"
/// hosts = ["node1", "node2"]
///
/// [job.params]
/// ceph-salt = { execution = { deployed = false } }
///
/// [backend]
/// stream_cmd = "salt-stream-job"
/// marker_cmd = "salt-set-grain"
///
/// [[preflight]]
/// name = "time-sync"
/// cmd = "check-time-sync"
/// code = 4
/// ```
///
/// Only `[job]` is required. Validation into [`ConfigFile`] happens in
/// `validate.rs`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    pub job: JobSection,

    #[serde(default)]
    pub bus: BusSection,

    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub render: RenderSection,

    #[serde(default)]
    pub markers: MarkersSection,

    #[serde(default)]
    pub preflight: Vec<PreflightConfig>,
}

/// Validated configuration. Only constructed through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub job: JobSection,
    pub bus: BusSection,
    pub backend: BackendSection,
    pub render: RenderSection,
    pub markers: MarkersSection,
    pub preflight: Vec<PreflightConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            job: raw.job,
            bus: raw.bus,
            backend: raw.backend,
            render: raw.render,
            markers: raw.markers,
            preflight: raw.preflight,
        }
    }

    pub fn job_spec(&self) -> JobSpec {
        JobSpec::new(self.job.name.clone(), self.job.params.clone())
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            prefix: self.bus.prefix.clone(),
            reconnect_tag: self.bus.reconnect_tag.clone(),
            job_return_tag: self.bus.job_return_tag.clone(),
            job_function: self.bus.job_function.clone(),
        }
    }
}

/// `[job]`: what to apply, and where.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    pub name: String,

    /// The fleet. `--host` may restrict a run to one of these.
    pub hosts: Vec<HostId>,

    /// Passed through to the backend untouched.
    #[serde(default = "default_params")]
    pub params: Value,
}

fn default_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// `[bus]`: where lifecycle events come from and how their tags look.
#[derive(Debug, Clone, Deserialize)]
pub struct BusSection {
    /// JSON-lines envelope stream; `-` reads stdin.
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_reconnect_tag")]
    pub reconnect_tag: String,

    /// Glob matched against job-return tags.
    #[serde(default = "default_job_return_tag")]
    pub job_return_tag: String,

    #[serde(default = "default_job_function")]
    pub job_function: String,
}

fn default_source() -> String {
    "-".to_string()
}

fn default_prefix() -> String {
    DecoderOptions::default().prefix
}

fn default_reconnect_tag() -> String {
    DecoderOptions::default().reconnect_tag
}

fn default_job_return_tag() -> String {
    DecoderOptions::default().job_return_tag
}

fn default_job_function() -> String {
    DecoderOptions::default().job_function
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            source: default_source(),
            prefix: default_prefix(),
            reconnect_tag: default_reconnect_tag(),
            job_return_tag: default_job_return_tag(),
            job_function: default_job_function(),
        }
    }
}

/// `[backend]`: the shell commands behind the execution backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    /// Streams per-host returns as JSON lines on stdout.
    #[serde(default = "default_stream_cmd")]
    pub stream_cmd: String,

    /// Sets a marker and prints a host to bool JSON map.
    #[serde(default = "default_marker_cmd")]
    pub marker_cmd: String,

    /// State module name used by lifecycle operations in run histories.
    #[serde(default = "default_operation_prefix")]
    pub operation_prefix: String,
}

fn default_stream_cmd() -> String {
    "fleetexec-stream-job".to_string()
}

fn default_marker_cmd() -> String {
    "fleetexec-set-marker".to_string()
}

fn default_operation_prefix() -> String {
    "ceph_salt".to_string()
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            stream_cmd: default_stream_cmd(),
            marker_cmd: default_marker_cmd(),
            operation_prefix: default_operation_prefix(),
        }
    }
}

/// `[render]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderSection {
    /// Dashboard redraw interval in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Colored output for the non-interactive renderer.
    #[serde(default = "default_colors")]
    pub colors: bool,
}

fn default_tick_ms() -> u64 {
    200
}

fn default_colors() -> bool {
    true
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            colors: default_colors(),
        }
    }
}

/// `[markers]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkersSection {
    #[serde(default = "default_execution_failed")]
    pub execution_failed: String,
}

fn default_execution_failed() -> String {
    "ceph-salt:execution:failed".to_string()
}

impl Default for MarkersSection {
    fn default() -> Self {
        Self {
            execution_failed: default_execution_failed(),
        }
    }
}

/// One `[[preflight]]` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PreflightConfig {
    pub name: String,
    pub cmd: String,
    /// Exit code of the run when this check fails.
    pub code: i32,
}
