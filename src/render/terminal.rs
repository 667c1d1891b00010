// src/render/terminal.rs

use std::io::Write;

use crossterm::style::{Color, Stylize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::Result;
use crate::model::{ExecutionModel, HostExecution, SharedModel};
use crate::render::{RenderPhase, RenderSignal, Renderer};
use crate::types::{Outcome, Timestamp};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Line-oriented renderer for non-interactive runs.
pub struct TerminalRenderer<W: Write + Send> {
    model: SharedModel,
    out: W,
    colors: bool,
    phase: RenderPhase,
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(model: SharedModel, out: W, colors: bool) -> Self {
        Self {
            model,
            out,
            colors,
            phase: RenderPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.colors {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn execution_started(&mut self) -> Result<()> {
        self.phase = RenderPhase::Running;
        let cmd = self.model.read().command_line();
        writeln!(self.out, "Starting the execution of: {cmd}")?;
        writeln!(self.out)?;
        Ok(())
    }

    fn host_updated(&mut self, host: &str) -> Result<()> {
        let line = {
            let model = self.model.read();
            model.host(host).and_then(|h| self.progress_line(h))
        };
        if let Some(line) = line {
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }

    /// The most specific thing that happened last on `host`.
    fn progress_line(&self, host: &HostExecution) -> Option<String> {
        let name: String = host.id().chars().take(16).collect();
        let prefix = |at: Timestamp| format!("[{}] [{name:<16}]", at.format(TIME_FORMAT));

        if let Some(end) = host.end_time() {
            let verdict = match host.outcome() {
                Outcome::Failed => self.paint("with failures", Color::Red),
                _ => self.paint("successfully", Color::Green),
            };
            return Some(format!("{} Finished {verdict}", prefix(end)));
        }

        let stage = host.last_stage()?;
        let step = stage.last_step();
        let line = match (stage.end_time(), step) {
            (Some(end), _) => format!("{} [STAGE] [END  ] {}", prefix(end), stage.desc()),
            (None, Some(step)) => match step.end_time() {
                Some(end) => format!("{} [STEP ] [END  ] {}", prefix(end), step.desc()),
                None => format!(
                    "{} [STEP ] [BEGIN] {}",
                    prefix(step.begin_time()),
                    step.desc()
                ),
            },
            (None, None) => format!(
                "{} [STAGE] [BEGIN] {}",
                prefix(stage.begin_time()),
                stage.desc()
            ),
        };
        Some(line)
    }

    fn host_failure(&mut self, host: &str, failure: &serde_json::Value) -> Result<()> {
        let dump = serde_json::to_string_pretty(failure)?;
        writeln!(self.out)?;
        let header = self.paint(&format!("Failure in host: {host}"), Color::Red);
        writeln!(self.out, "{header}")?;
        writeln!(self.out, "{dump}")?;
        writeln!(self.out)?;
        Ok(())
    }

    fn execution_stopped(&mut self) -> Result<()> {
        self.phase = RenderPhase::Finished;
        let model = self.model.read().clone();
        writeln!(self.out)?;
        writeln!(self.out, "Finished execution of {} formula", model.job().name)?;
        writeln!(self.out)?;
        writeln!(self.out, "{}", summary_line(&model))?;

        let warnings: Vec<(&str, &String)> = model
            .hosts()
            .iter()
            .flat_map(|h| h.warnings().iter().map(move |w| (h.id(), w)))
            .collect();
        if !warnings.is_empty() {
            let heading = self.paint("Warnings:", Color::Yellow);
            writeln!(self.out)?;
            writeln!(self.out, "{heading}")?;
            for (host, warning) in warnings {
                writeln!(self.out, "  - [{host}] {warning}")?;
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

/// `Summary: Total=… Succeeded=… Warnings=… Failed=…`
pub fn summary_line(model: &ExecutionModel) -> String {
    let s = model.summary();
    format!(
        "Summary: Total={} Succeeded={} Warnings={} Failed={}",
        s.total, s.succeeded, s.warned, s.failed
    )
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn run(&mut self, signals: &mut mpsc::UnboundedReceiver<RenderSignal>) -> Result<()> {
        while let Some(signal) = signals.blocking_recv() {
            debug!(?signal, "terminal renderer signal");
            match signal {
                RenderSignal::ExecutionStarted => self.execution_started()?,
                RenderSignal::HostUpdated(host) => self.host_updated(&host)?,
                RenderSignal::HostFailure { host, failure } => self.host_failure(&host, &failure)?,
                RenderSignal::ExecutionStopped => {
                    self.execution_stopped()?;
                    break;
                }
            }
            self.out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now, JobSpec};
    use serde_json::json;

    fn model() -> SharedModel {
        let model = ExecutionModel::new(
            JobSpec::new("ceph-salt", json!({})),
            &["node1".to_string(), "a-very-long-host-name.example.com".to_string()],
            None,
        )
        .expect("model");
        SharedModel::new(model)
    }

    #[test]
    fn prints_most_specific_progress() {
        let shared = model();
        let renderer = TerminalRenderer::new(shared.clone(), Vec::new(), false);
        let at = now();
        {
            let mut m = shared.write();
            let host = m.host_mut("node1").expect("host");
            host.stage_begin("Stage 1", at);
        }
        let line = renderer
            .progress_line(shared.read().host("node1").expect("host"))
            .expect("line");
        assert!(line.ends_with("[node1           ] [STAGE] [BEGIN] Stage 1"), "{line}");

        shared.write().host_mut("node1").expect("host").step_begin("Step 1", at);
        let line = renderer
            .progress_line(shared.read().host("node1").expect("host"))
            .expect("line");
        assert!(line.ends_with("[STEP ] [BEGIN] Step 1"), "{line}");

        shared.write().host_mut("node1").expect("host").end(at, true);
        let line = renderer
            .progress_line(shared.read().host("node1").expect("host"))
            .expect("line");
        assert!(line.ends_with("Finished successfully"), "{line}");
    }

    #[test]
    fn host_names_are_truncated() {
        let shared = model();
        let renderer = TerminalRenderer::new(shared.clone(), Vec::new(), false);
        let id = "a-very-long-host-name.example.com";
        shared.write().host_mut(id).expect("host").stage_begin("S", now());
        let line = renderer
            .progress_line(shared.read().host(id).expect("host"))
            .expect("line");
        assert!(line.contains("[a-very-long-host]"), "{line}");
    }

    #[test]
    fn run_prints_banner_and_summary() {
        let shared = model();
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut m = shared.write();
            let at = now();
            m.begin(at);
            let host = m.host_mut("node1").expect("host");
            host.stage_begin("Stage 1", at);
            host.stage_warning("slow mirror");
            host.end(at, true);
            m.end(at);
        }
        tx.send(RenderSignal::ExecutionStarted).expect("send");
        tx.send(RenderSignal::HostUpdated("node1".into())).expect("send");
        tx.send(RenderSignal::ExecutionStopped).expect("send");

        let mut renderer = TerminalRenderer::new(shared, Vec::new(), false);
        renderer.run(&mut rx).expect("run");
        assert_eq!(renderer.phase(), RenderPhase::Finished);

        let out = String::from_utf8(renderer.out).expect("utf8");
        assert!(out.starts_with("Starting the execution of: fleetexec apply ceph-salt"));
        assert!(out.contains("Finished successfully"));
        assert!(out.contains("Summary: Total=2 Succeeded=1 Warnings=1 Failed=0"));
        assert!(out.contains("  - [node1] slow mirror"));
    }
}
