// src/lib.rs

pub mod bus;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod model;
pub mod render;
pub mod types;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::bus::JsonLinesSource;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{CommandCheck, ExecutionContext, Executor};
use crate::exec::CommandBackend;
use crate::model::SharedModel;
use crate::render::{DashboardRenderer, Renderer, TerminalRenderer};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the event source and execution backend
/// - pre-flight checks
/// - the executor and the chosen renderer
///
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg, args.host.as_deref());
        return Ok(0);
    }

    let context = ExecutionContext {
        fleet: cfg.job.hosts.clone(),
        target: args.host.clone(),
        job: cfg.job_spec(),
    };
    let backend = Arc::new(CommandBackend::new(
        cfg.backend.stream_cmd.clone(),
        cfg.backend.marker_cmd.clone(),
    ));

    let mut executor = Executor::new(
        context,
        backend,
        cfg.decoder_options(),
        cfg.backend.operation_prefix.clone(),
        cfg.markers.execution_failed.clone(),
    );
    for check in &cfg.preflight {
        executor = executor.with_check(Box::new(CommandCheck::new(
            check.name.clone(),
            check.cmd.clone(),
            check.code,
        )));
    }

    let source = JsonLinesSource::open(Path::new(&cfg.bus.source)).await?;
    info!(source = %cfg.bus.source, job = %cfg.job.name, "starting execution");

    let non_interactive = args.non_interactive;
    let colors = cfg.render.colors;
    let tick = Duration::from_millis(cfg.render.tick_ms);
    let code = executor
        .run(source, move |model: SharedModel| -> Box<dyn Renderer> {
            if non_interactive {
                Box::new(TerminalRenderer::new(model, io::stdout(), colors))
            } else {
                Box::new(DashboardRenderer::new(model, tick))
            }
        })
        .await?;

    Ok(code)
}

/// Simple dry-run output: print the job, its targets and the wiring.
fn print_dry_run(cfg: &ConfigFile, host: Option<&str>) {
    println!("fleetexec dry-run");
    println!("  job.name = {}", cfg.job.name);
    match host {
        Some(host) => println!("  targets = [{host}] (restricted)"),
        None => println!("  targets = [{}]", cfg.job.hosts.join(", ")),
    }
    println!("  job.params = {}", cfg.job.params);
    println!();

    println!("bus:");
    println!("  source: {}", cfg.bus.source);
    println!("  prefix: {}", cfg.bus.prefix);
    println!("  reconnect_tag: {}", cfg.bus.reconnect_tag);
    println!("  job_return_tag: {}", cfg.bus.job_return_tag);
    println!("  job_function: {}", cfg.bus.job_function);
    println!();

    println!("backend:");
    println!("  stream_cmd: {}", cfg.backend.stream_cmd);
    println!("  marker_cmd: {}", cfg.backend.marker_cmd);
    println!("  operation_prefix: {}", cfg.backend.operation_prefix);
    println!("  execution_failed marker: {}", cfg.markers.execution_failed);

    if !cfg.preflight.is_empty() {
        println!();
        println!("preflight ({}):", cfg.preflight.len());
        for check in &cfg.preflight {
            println!("  - {} (code {}): {}", check.name, check.code, check.cmd);
        }
    }

    debug!("dry-run complete (no execution)");
}
