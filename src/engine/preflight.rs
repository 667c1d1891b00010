// src/engine/preflight.rs

//! Checks run before any model or task exists.
//!
//! A failing check aborts the run; its code becomes the exit code.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::PreflightFailure;
use crate::types::{HostId, JobSpec, Target};

/// Exit code when the single-host restriction names an unknown host.
pub const UNKNOWN_HOST_CODE: i32 = 7;

/// What a run is about to do.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub fleet: Vec<HostId>,
    pub target: Option<HostId>,
    pub job: JobSpec,
}

impl ExecutionContext {
    /// The dispatch target: the single host when restricted, else the fleet.
    pub fn dispatch_target(&self) -> Target {
        match &self.target {
            Some(host) => Target::Host(host.clone()),
            None => Target::Fleet(self.fleet.clone()),
        }
    }
}

pub type CheckFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<(), PreflightFailure>> + Send + 'a>>;

pub trait PreflightCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check<'a>(&'a self, ctx: &'a ExecutionContext) -> CheckFuture<'a>;
}

/// The single-host restriction must name a host of the fleet.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownHostCheck;

impl PreflightCheck for KnownHostCheck {
    fn name(&self) -> &str {
        "known-host"
    }

    fn check<'a>(&'a self, ctx: &'a ExecutionContext) -> CheckFuture<'a> {
        Box::pin(async move {
            match &ctx.target {
                Some(host) if !ctx.fleet.contains(host) => Err(PreflightFailure::new(
                    self.name(),
                    UNKNOWN_HOST_CODE,
                    format!("Host '{host}' does not exist in configuration"),
                )),
                _ => Ok(()),
            }
        })
    }
}

/// An external command; a non-zero exit fails the check with `code`.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    name: String,
    cmd: String,
    code: i32,
}

impl CommandCheck {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>, code: i32) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            code,
        }
    }
}

impl PreflightCheck for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn check<'a>(&'a self, ctx: &'a ExecutionContext) -> CheckFuture<'a> {
        Box::pin(async move {
            debug!(check = %self.name, cmd = %self.cmd, "running pre-flight command");
            let output = Command::new("sh")
                .arg("-c")
                .arg(&self.cmd)
                .env("FLEETEXEC_TARGET", ctx.dispatch_target().hosts().join(","))
                .env("FLEETEXEC_JOB", &ctx.job.name)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| PreflightFailure::new(&self.name, self.code, e.to_string()))?;

            if output.status.success() {
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("'{}' exited with {}", self.cmd, output.status.code().unwrap_or(-1))
            } else {
                stderr
            };
            Err(PreflightFailure::new(&self.name, self.code, message))
        })
    }
}

/// Run `checks` in order, stopping at the first failure.
pub async fn run_checks(
    checks: &[Box<dyn PreflightCheck>],
    ctx: &ExecutionContext,
) -> std::result::Result<(), PreflightFailure> {
    for check in checks {
        check.check(ctx).await?;
        info!(check = check.name(), "pre-flight check passed");
    }
    Ok(())
}
