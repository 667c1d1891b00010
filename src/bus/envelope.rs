// src/bus/envelope.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{HostId, Timestamp};

/// One message as it appears on the bus.
///
/// `data.id` is the source host, `data._stamp` the send time; lifecycle
/// events carry their description in `data.data.desc`, job returns carry
/// `data.success` and `data.fun`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub tag: String,
    pub data: Value,
}

impl RawEnvelope {
    pub fn new(tag: impl Into<String>, data: Value) -> Self {
        Self {
            tag: tag.into(),
            data,
        }
    }
}

/// Closed set of events the controller reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    StageBegin { desc: String },
    StageEnd { desc: String },
    StageWarning { desc: String },
    StepBegin { desc: String },
    StepEnd { desc: String },
    HostReboot { desc: String },
    HostReconnect,
    JobReturn { success: bool },
}

impl EventKind {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::StageBegin { .. } => "stage/begin",
            EventKind::StageEnd { .. } => "stage/end",
            EventKind::StageWarning { .. } => "stage/warning",
            EventKind::StepBegin { .. } => "step/begin",
            EventKind::StepEnd { .. } => "step/end",
            EventKind::HostReboot { .. } => "minion_reboot",
            EventKind::HostReconnect => "reconnect",
            EventKind::JobReturn { .. } => "job_return",
        }
    }
}

/// A decoded event from a host in the target set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub host: HostId,
    pub stamp: Timestamp,
    pub kind: EventKind,
}
