// src/exec/process.rs

//! Shell-command execution backend.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::{FleetError, Result};
use crate::exec::backend::{ExecutionBackend, ReturnBatch, ReturnStream};
use crate::exec::result::parse_batch;
use crate::types::{HostId, JobSpec, Target};

const STREAM_CAPACITY: usize = 16;

/// Runs the configured commands through the platform shell.
///
/// The target, job and parameters are passed as environment variables:
/// `FLEETEXEC_TARGET` (comma separated hosts), `FLEETEXEC_JOB`,
/// `FLEETEXEC_PARAMS` (JSON), and for markers `FLEETEXEC_MARKER_KEY` and
/// `FLEETEXEC_MARKER_VALUE`.
///
/// `stream_cmd` prints one JSON object per line, host → `{retcode, ret}`.
/// `marker_cmd` prints one JSON object host → bool.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    stream_cmd: String,
    marker_cmd: String,
}

impl CommandBackend {
    pub fn new(stream_cmd: impl Into<String>, marker_cmd: impl Into<String>) -> Self {
        Self {
            stream_cmd: stream_cmd.into(),
            marker_cmd: marker_cmd.into(),
        }
    }
}

fn shell(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

fn target_env(cmd: &mut Command, target: &Target) {
    cmd.env("FLEETEXEC_TARGET", target.hosts().join(","));
}

impl ExecutionBackend for CommandBackend {
    fn stream_job(
        &self,
        target: Target,
        job: JobSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ReturnStream>> + Send + '_>> {
        Box::pin(async move {
            info!(hosts = %target, job = %job.name, cmd = %self.stream_cmd, "starting job stream");

            let mut cmd = shell(&self.stream_cmd);
            target_env(&mut cmd, &target);
            cmd.env("FLEETEXEC_JOB", &job.name)
                .env("FLEETEXEC_PARAMS", job.params.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let child = cmd
                .spawn()
                .with_context(|| format!("spawning job stream for {target}"))?;

            let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
            tokio::spawn(pump_returns(child, target.to_string(), tx));
            Ok(rx)
        })
    }

    fn set_marker(
        &self,
        target: Target,
        key: String,
        value: bool,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeMap<HostId, bool>>> + Send + '_>> {
        Box::pin(async move {
            debug!(hosts = %target, key = %key, value, "setting marker");

            let mut cmd = shell(&self.marker_cmd);
            target_env(&mut cmd, &target);
            cmd.env("FLEETEXEC_MARKER_KEY", &key)
                .env("FLEETEXEC_MARKER_VALUE", value.to_string())
                .stdin(Stdio::null())
                .kill_on_drop(true);

            let output = cmd
                .output()
                .await
                .with_context(|| format!("running marker command for {target}"))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(FleetError::Backend(format!(
                    "marker command exited with {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                )));
            }

            let outcome: BTreeMap<HostId, bool> = serde_json::from_slice(&output.stdout)?;
            Ok(outcome)
        })
    }
}

/// Forward parsed stdout lines of the job stream until the process exits.
async fn pump_returns(mut child: Child, label: String, tx: mpsc::Sender<Result<ReturnBatch>>) {
    if let Some(stderr) = child.stderr.take() {
        let label = label.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(hosts = %label, "stderr: {}", line);
            }
        });
    }

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let item = parse_batch(&line);
            if let Err(e) = &item {
                warn!(hosts = %label, error = %e, "unparseable return line");
            }
            if tx.send(item).await.is_err() {
                debug!(hosts = %label, "return stream receiver dropped");
                return;
            }
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            info!(hosts = %label, "job stream finished");
        }
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            error!(hosts = %label, exit_code = code, "job stream command failed");
            let _ = tx
                .send(Err(FleetError::Backend(format!(
                    "job stream command exited with {code}"
                ))))
                .await;
        }
        Err(e) => {
            error!(hosts = %label, error = %e, "waiting for job stream command");
            let _ = tx.send(Err(e.into())).await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn streams_returns_from_stdout() {
        let backend = CommandBackend::new(
            r#"echo "{\"$FLEETEXEC_TARGET\": {\"retcode\": 0, \"ret\": {}}}""#,
            "true",
        );
        let mut rx = backend
            .stream_job(Target::Host("node1".into()), JobSpec::new("job", json!({})))
            .await
            .expect("stream");
        let batch = rx.recv().await.expect("item").expect("batch");
        assert!(batch["node1"].succeeded());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stream_command_sees_no_stdin() {
        // The bus may be reading our stdin; the job must not steal from it.
        let backend = CommandBackend::new(
            r#"if read -r line; then exit 9; fi; echo '{"node1": {"retcode": 0, "ret": {}}}'"#,
            "true",
        );
        let mut rx = backend
            .stream_job(Target::Host("node1".into()), JobSpec::new("job", json!({})))
            .await
            .expect("stream");
        let batch = rx.recv().await.expect("item").expect("batch");
        assert!(batch["node1"].succeeded());
    }

    #[tokio::test]
    async fn failing_stream_command_reports_backend_error() {
        let backend = CommandBackend::new("exit 4", "true");
        let mut rx = backend
            .stream_job(Target::Host("node1".into()), JobSpec::new("job", json!({})))
            .await
            .expect("stream");
        let item = rx.recv().await.expect("item");
        assert!(matches!(item, Err(FleetError::Backend(_))));
    }

    #[tokio::test]
    async fn marker_command_output_is_parsed() {
        let backend = CommandBackend::new(
            "true",
            r#"echo "{\"a\": $FLEETEXEC_MARKER_VALUE, \"b\": true}""#,
        );
        let outcome = backend
            .set_marker(
                Target::Fleet(vec!["a".into(), "b".into()]),
                "k".into(),
                false,
            )
            .await
            .expect("marker");
        assert_eq!(outcome.get("a"), Some(&false));
        assert_eq!(outcome.get("b"), Some(&true));
    }
}
