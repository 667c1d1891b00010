// src/render/format.rs

use chrono::TimeDelta;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Preferred characters to wrap long lines at, best first.
const SPLIT_CHARS: [char; 6] = [' ', '|', ',', ')', '(', '/'];

static STATE_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.+)_\|-.+_\|.+_\|-(.+)$").ok());

/// Elapsed time as shown next to each row: `12s`, or `0.4s` below a second.
pub fn format_elapsed(delta: TimeDelta) -> String {
    let millis = delta.num_milliseconds().max(0);
    if millis >= 1000 {
        format!("{}s", (millis as f64 / 1000.0).round() as i64)
    } else {
        format!("{:.1}s", millis as f64 / 1000.0)
    }
}

fn find_split(chars: &[char], reverse: bool) -> Option<usize> {
    SPLIT_CHARS.iter().find_map(|ch| {
        if reverse {
            chars.iter().rposition(|c| c == ch)
        } else {
            chars.iter().position(|c| c == ch)
        }
    })
}

/// Break `text` into lines of at most `width` characters, splitting at
/// [`SPLIT_CHARS`]. A chunk with no split point is kept whole.
pub fn break_lines(text: &str, width: usize) -> Vec<String> {
    let width = width.max(2);
    let mut rest: Vec<char> = text.chars().filter(|c| *c != '\n').collect();
    let mut out = Vec::new();

    while rest.len() > width {
        let idx = match find_split(&rest[1..width], true) {
            Some(idx) => idx + 1,
            None => match find_split(&rest[width..], false) {
                Some(idx) => idx + width,
                None => break,
            },
        };
        out.push(rest[..idx].iter().collect());
        rest.drain(..idx);
    }
    out.push(rest.into_iter().collect());
    out
}

/// `module.function` of an operation name such as `cmd_|-id_|-name_|-run`.
pub fn state_function(state: &str) -> String {
    let flat = state.replace('\n', "");
    STATE_NAME
        .as_ref()
        .and_then(|re| re.captures(&flat))
        .and_then(|caps| Some(format!("{}.{}", caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .unwrap_or(flat)
}

/// One rendered line of a failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureLine {
    /// Columns relative to the failure's own indentation.
    pub indent: usize,
    /// Highlighted prefix, possibly empty.
    pub label: &'static str,
    pub text: String,
}

impl FailureLine {
    fn new(indent: usize, label: &'static str, text: impl Into<String>) -> Self {
        Self {
            indent,
            label,
            text: text.into(),
        }
    }
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn push_wrapped(out: &mut Vec<FailureLine>, indent: usize, text: &str, width: usize) {
    for line in text.split('\n') {
        for chunk in break_lines(line, width.saturating_sub(indent)) {
            out.push(FailureLine::new(indent, "", chunk));
        }
    }
}

/// Lay out a failure payload for a column `width` wide.
pub fn failure_lines(failure: &Value, width: usize) -> Vec<FailureLine> {
    let mut out = Vec::new();
    match failure {
        Value::Array(items) => {
            for item in items {
                out.extend(failure_lines(item, width));
            }
        }
        Value::Object(map) => {
            out.push(FailureLine::new(0, "", text_of(map.get("__id__"))));
            out.push(FailureLine::new(3, "SLS: ", text_of(map.get("__sls__"))));
            let state = state_function(&text_of(map.get("state")));
            out.push(FailureLine::new(3, "State: ", state.clone()));

            if state == "cmd.run" {
                const LABEL: &str = "Command: ";
                let command = text_of(map.get("name")).replace(['\n', '\\'], " ");
                let wrap = width.saturating_sub(3 + LABEL.len());
                for (i, chunk) in break_lines(&command, wrap).into_iter().enumerate() {
                    let chunk = chunk.trim().to_string();
                    if i == 0 {
                        out.push(FailureLine::new(3, LABEL, chunk));
                    } else {
                        out.push(FailureLine::new(3 + LABEL.len(), "", chunk));
                    }
                }
                out.push(FailureLine::new(3, "Error Description: ", ""));
                let stderr = map.get("changes").and_then(|c| c.get("stderr"));
                push_wrapped(&mut out, 6, &text_of(stderr), width);
            } else {
                out.push(FailureLine::new(3, "Error Description: ", ""));
                push_wrapped(&mut out, 6, &text_of(map.get("comment")), width);
            }
        }
        Value::String(text) => push_wrapped(&mut out, 0, text, width),
        other => push_wrapped(&mut out, 0, &other.to_string(), width),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn elapsed_below_a_second_keeps_one_decimal() {
        assert_eq!(format_elapsed(TimeDelta::milliseconds(420)), "0.4s");
        assert_eq!(format_elapsed(TimeDelta::milliseconds(0)), "0.0s");
        assert_eq!(format_elapsed(TimeDelta::milliseconds(12_600)), "13s");
        assert_eq!(format_elapsed(TimeDelta::milliseconds(-5)), "0.0s");
    }

    #[test]
    fn break_lines_prefers_split_characters() {
        assert_eq!(break_lines("short", 10), vec!["short"]);
        assert_eq!(
            break_lines("aaaa bbbb cccc", 10),
            vec!["aaaa bbbb".to_string(), " cccc".to_string()]
        );
        // No split point inside the window: split at the next one after it.
        assert_eq!(
            break_lines("abcdefghijkl/mn", 5),
            vec!["abcdefghijkl".to_string(), "/mn".to_string()]
        );
        assert_eq!(break_lines("abcdefghij", 4), vec!["abcdefghij"]);
    }

    #[test]
    fn state_function_from_operation_name() {
        assert_eq!(state_function("cmd_|-install ceph_|-zypper in ceph_|-run"), "cmd.run");
        assert_eq!(state_function("garbage"), "garbage");
    }

    #[test]
    fn cmd_run_failures_show_command_and_stderr() {
        let failure = json!({
            "__id__": "install ceph",
            "__sls__": "ceph-salt.software",
            "state": "cmd_|-install ceph_|-zypper in ceph_|-run",
            "name": "zypper in ceph",
            "changes": {"stderr": "repo unavailable"},
        });
        let lines = failure_lines(&failure, 80);
        let labels: Vec<&str> = lines.iter().map(|l| l.label).collect();
        assert_eq!(
            labels,
            vec!["", "SLS: ", "State: ", "Command: ", "Error Description: ", ""]
        );
        assert_eq!(lines[3].text, "zypper in ceph");
        assert_eq!(lines[5], FailureLine::new(6, "", "repo unavailable"));
    }

    #[test]
    fn other_failures_show_comment() {
        let failure = json!({
            "__id__": "x",
            "__sls__": "s",
            "state": "file_|-x_|-/etc/x_|-managed",
            "comment": "first\nsecond",
        });
        let lines = failure_lines(&failure, 80);
        assert_eq!(lines[2].text, "file.managed");
        assert_eq!(lines[4].text, "first");
        assert_eq!(lines[5].text, "second");
    }

    #[test]
    fn compound_failures_list_every_item() {
        let lines = failure_lines(&json!(["one", "two"]), 80);
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }
}
