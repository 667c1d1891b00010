// src/bus/decoder.rs

use std::collections::HashSet;

use chrono::NaiveDateTime;
use globset::{Glob, GlobMatcher};
use serde_json::Value;

use crate::bus::envelope::{BusEvent, EventKind, RawEnvelope};
use crate::errors::{FleetError, Result};
use crate::types::{HostId, Timestamp, STAMP_FORMAT};

/// Tag conventions of the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Prefix of lifecycle tags (`<prefix>/stage/begin`, ...).
    pub prefix: String,
    /// Tag a host emits when it comes back online.
    pub reconnect_tag: String,
    /// Glob matching job-return tags.
    pub job_return_tag: String,
    /// Only job returns of this function are considered.
    pub job_function: String,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            prefix: "ceph-salt".to_string(),
            reconnect_tag: "minion_start".to_string(),
            job_return_tag: "salt/job/*/ret/*".to_string(),
            job_function: "state.apply".to_string(),
        }
    }
}

/// Turns raw envelopes into [`BusEvent`]s for a fixed host set.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    options: DecoderOptions,
    job_return: GlobMatcher,
    hosts: HashSet<HostId>,
}

enum TagClass {
    Lifecycle(String),
    Reconnect,
    JobReturn,
}

impl EventDecoder {
    pub fn new(options: DecoderOptions, hosts: &[HostId]) -> Result<Self> {
        let job_return = Glob::new(&options.job_return_tag)
            .map_err(|e| {
                FleetError::ConfigError(format!(
                    "invalid job_return_tag glob '{}': {e}",
                    options.job_return_tag
                ))
            })?
            .compile_matcher();
        Ok(Self {
            options,
            job_return,
            hosts: hosts.iter().cloned().collect(),
        })
    }

    /// Decode one envelope.
    ///
    /// Returns `Ok(None)` for tags this tool does not follow and for hosts
    /// outside the target set. Malformed payloads of recognised tags are
    /// errors.
    pub fn decode(&self, envelope: &RawEnvelope) -> Result<Option<BusEvent>> {
        let Some(class) = self.classify(envelope) else {
            return Ok(None);
        };

        let host = str_field(&envelope.data, &["id"], &envelope.tag)?;
        if !self.hosts.contains(host) {
            return Ok(None);
        }
        let stamp = parse_stamp(str_field(&envelope.data, &["_stamp"], &envelope.tag)?)?;

        let kind = match class {
            TagClass::Reconnect => EventKind::HostReconnect,
            TagClass::JobReturn => {
                let success = envelope
                    .data
                    .get("success")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| missing(&envelope.tag, "success"))?;
                EventKind::JobReturn { success }
            }
            TagClass::Lifecycle(suffix) => {
                let desc = str_field(&envelope.data, &["data", "desc"], &envelope.tag)?;
                let desc = desc.to_string();
                match suffix.as_str() {
                    "stage/begin" => EventKind::StageBegin { desc },
                    "stage/end" => EventKind::StageEnd { desc },
                    "stage/warning" => EventKind::StageWarning { desc },
                    "step/begin" => EventKind::StepBegin { desc },
                    "step/end" => EventKind::StepEnd { desc },
                    "minion_reboot" => EventKind::HostReboot { desc },
                    _ => return Ok(None),
                }
            }
        };

        Ok(Some(BusEvent {
            host: host.to_string(),
            stamp,
            kind,
        }))
    }

    fn classify(&self, envelope: &RawEnvelope) -> Option<TagClass> {
        let tag = envelope.tag.as_str();
        if let Some(suffix) = tag
            .strip_prefix(self.options.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            return Some(TagClass::Lifecycle(suffix.to_string()));
        }
        if tag == self.options.reconnect_tag {
            return Some(TagClass::Reconnect);
        }
        if self.job_return.is_match(tag) {
            let fun = envelope.data.get("fun").and_then(Value::as_str);
            if fun == Some(self.options.job_function.as_str()) {
                return Some(TagClass::JobReturn);
            }
        }
        None
    }
}

fn str_field<'a>(data: &'a Value, path: &[&str], tag: &str) -> Result<&'a str> {
    path.iter()
        .try_fold(data, |value, key| value.get(*key))
        .and_then(Value::as_str)
        .ok_or_else(|| missing(tag, &path.join(".")))
}

fn missing(tag: &str, field: &str) -> FleetError {
    FleetError::Decode(format!("'{tag}' event without '{field}'"))
}

fn parse_stamp(raw: &str) -> Result<Timestamp> {
    NaiveDateTime::parse_from_str(raw, STAMP_FORMAT)
        .map_err(|e| FleetError::Decode(format!("bad _stamp '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decoder() -> EventDecoder {
        EventDecoder::new(DecoderOptions::default(), &["node1".to_string()]).expect("decoder")
    }

    fn lifecycle(tag: &str, host: &str, desc: &str) -> RawEnvelope {
        RawEnvelope::new(
            tag,
            json!({"id": host, "_stamp": "2020-01-17T15:19:54.910076", "data": {"desc": desc}}),
        )
    }

    #[test]
    fn decodes_lifecycle_tags() {
        let ev = decoder()
            .decode(&lifecycle("ceph-salt/stage/begin", "node1", "Stage 1"))
            .expect("decode")
            .expect("event");
        assert_eq!(ev.host, "node1");
        assert_eq!(ev.kind, EventKind::StageBegin { desc: "Stage 1".into() });
        assert_eq!(ev.stamp.format(STAMP_FORMAT).to_string(), "2020-01-17T15:19:54.910076");

        let ev = decoder()
            .decode(&lifecycle("ceph-salt/minion_reboot", "node1", "Rebooting..."))
            .expect("decode")
            .expect("event");
        assert_eq!(ev.kind, EventKind::HostReboot { desc: "Rebooting...".into() });
    }

    #[test]
    fn foreign_hosts_and_tags_are_dropped() {
        let d = decoder();
        assert!(d.decode(&lifecycle("ceph-salt/stage/begin", "node9", "x")).expect("ok").is_none());
        assert!(d.decode(&lifecycle("other/stage/begin", "node1", "x")).expect("ok").is_none());
        assert!(d.decode(&lifecycle("ceph-salt/step/start", "node1", "x")).expect("ok").is_none());
    }

    #[test]
    fn job_returns_are_filtered_by_function() {
        let d = decoder();
        let ret = |fun: &str| {
            RawEnvelope::new(
                "salt/job/20200117151954/ret/node1",
                json!({"id": "node1", "_stamp": "2020-01-17T15:19:54.1", "fun": fun, "success": false}),
            )
        };
        let ev = d.decode(&ret("state.apply")).expect("decode").expect("event");
        assert_eq!(ev.kind, EventKind::JobReturn { success: false });
        assert!(d.decode(&ret("test.ping")).expect("decode").is_none());
    }

    #[test]
    fn reconnect_tag_is_recognised() {
        let env = RawEnvelope::new(
            "minion_start",
            json!({"id": "node1", "_stamp": "2020-01-17T15:19:54.000001"}),
        );
        let ev = decoder().decode(&env).expect("decode").expect("event");
        assert_eq!(ev.kind, EventKind::HostReconnect);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let env = RawEnvelope::new("ceph-salt/stage/begin", json!({"id": "node1"}));
        let err = decoder().decode(&env).unwrap_err();
        assert!(matches!(err, FleetError::Decode(_)));
    }
}
