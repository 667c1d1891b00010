// src/types.rs

//! Small shared types used across the model, engine and renderers.

use std::fmt;

use chrono::{NaiveDateTime, Utc};

/// Identifier of one target host (a "minion").
pub type HostId = String;

/// Timestamps are naive UTC, matching the bus `_stamp` format.
pub type Timestamp = NaiveDateTime;

/// Format used by the event bus for `_stamp` values.
pub const STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Current UTC time as a naive timestamp.
pub fn now() -> Timestamp {
    Utc::now().naive_utc()
}

/// Retcode when every host succeeded.
pub const RETCODE_OK: i32 = 0;

/// Retcode when at least one host failed its job run.
pub const RETCODE_JOB_FAILED: i32 = 2;

/// Retcode when the dispatcher itself failed (backend error, broken stream).
pub const RETCODE_INTERNAL: i32 = 3;

/// Tri-state success of a host, stage or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Still running, or never finished.
    #[default]
    Unknown,
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn from_success(success: bool) -> Self {
        if success {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        }
    }

    pub fn is_known(self) -> bool {
        self != Outcome::Unknown
    }
}

/// Result of applying one lifecycle transition to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The model changed.
    Applied,
    /// The event was already seen; the model is unchanged.
    Duplicate,
    /// A step event arrived while no stage was open.
    OutOfContext,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        self == Transition::Applied
    }
}

/// What a dispatcher submits the job to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every host of the fleet.
    Fleet(Vec<HostId>),
    /// One host only (single-host restriction or re-dispatch after reboot).
    Host(HostId),
}

impl Target {
    pub fn hosts(&self) -> Vec<HostId> {
        match self {
            Target::Fleet(hosts) => hosts.clone(),
            Target::Host(host) => vec![host.clone()],
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Fleet(hosts) => write!(f, "fleet[{}]", hosts.join(",")),
            Target::Host(host) => write!(f, "{host}"),
        }
    }
}

/// The job applied to the hosts: a name plus free-form parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub name: String,
    pub params: serde_json::Value,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}
