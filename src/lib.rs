// src/lib.rs

pub mod artifact;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod session;
pub mod task;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::ConfigFile;
use crate::config::loader::{config_root_dir, load_and_validate};
use crate::engine::{Engine, StatusSnapshot};
use crate::fs::RealFileSystem;
use crate::session::{CommandSession, Session};

pub use crate::engine::{AddTaskRequest, AddTaskResponse, EngineOptions};
pub use crate::errors::{EngineError, Result as EngineResult};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (the batch is validated all-or-nothing)
/// - one `CommandSession` per configured session
/// - the engine and its dispatcher
/// - Ctrl-C handling (stop dispatching, let running tasks finish)
/// - periodic progress logging until every task settles
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = Path::new(&args.config);
    let cfg = load_and_validate(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    if cfg.tasks.is_empty() {
        info!("no [[task]] entries in config; nothing to do");
        return Ok(());
    }

    let options = cfg.engine_options_relative_to(&config_root_dir(config_path));
    let sessions = build_sessions(&cfg);
    let engine = Engine::new(options, Arc::new(RealFileSystem), sessions);

    for spec in cfg.tasks.iter().cloned() {
        engine.enqueue(spec)?;
    }

    engine.start_execution()?;

    let reporter = engine.reporter();
    let mut ticker = tokio::time::interval(args.status_interval);
    ticker.tick().await;

    let mut interrupted = false;
    let snapshot = loop {
        tokio::select! {
            res = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                } else {
                    info!("Ctrl+C received; finishing running tasks");
                    engine.stop_execution();
                }
                interrupted = true;
            }
            _ = ticker.tick() => {}
        }

        let snapshot = reporter.snapshot();
        info!("{}", snapshot.summary());
        if is_done(&snapshot) {
            break snapshot;
        }
    };

    if snapshot.counts.queued > 0 && snapshot.session_count == 0 {
        warn!(
            queued = snapshot.counts.queued,
            "every session was retired; remaining tasks were not run"
        );
    }

    engine.shutdown().await;
    print_summary(&snapshot, args.json)?;
    Ok(())
}

/// Finished when nothing is running and either nothing is queued or
/// dispatching has been stopped.
fn is_done(snapshot: &StatusSnapshot) -> bool {
    snapshot.counts.running == 0 && (snapshot.counts.queued == 0 || !snapshot.is_running)
}

fn build_sessions(cfg: &ConfigFile) -> Vec<Arc<dyn Session>> {
    let spec = cfg.session.command_spec();
    let work_dir = cfg.session.work_dir();
    (0..cfg.session.count)
        .map(|i| {
            Arc::new(CommandSession::new(
                format!("session-{i}"),
                spec.clone(),
                work_dir.clone(),
            )) as Arc<dyn Session>
        })
        .collect()
}

fn print_summary(snapshot: &StatusSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    println!(
        "{} succeeded, {} failed, {} still queued",
        snapshot.counts.succeeded, snapshot.counts.failed, snapshot.counts.queued
    );
    for task in &snapshot.tasks {
        let label = task.spec.name.as_deref().unwrap_or("-");
        println!(
            "  {:<10} {:<9} {:<24} {}",
            task.id.to_string(),
            task.status.as_str(),
            label,
            task.status_detail
        );
    }
    Ok(())
}

fn print_dry_run(cfg: &ConfigFile) {
    let e = &cfg.engine;
    println!("genqueue dry-run");
    println!("  engine.max_retries = {}", e.max_retries);
    println!("  engine.session_failure_threshold = {}", e.session_failure_threshold);
    println!("  engine.session_cooldown = {}", fmt_duration(e.session_cooldown));
    println!("  engine.poll_interval = {}", fmt_duration(e.poll_interval));
    println!("  engine.request_timeout = {}", fmt_duration(e.request_timeout));
    println!("  engine.task_timeout = {}", fmt_duration(e.task_timeout));
    println!("  engine.dispatch_backoff = {}", fmt_duration(e.dispatch_backoff));
    println!("  engine.output_dir = {}", e.output_dir.display());
    println!(
        "  session: {} x `{} {}`",
        cfg.session.count,
        cfg.session.command,
        cfg.session.args.join(" ")
    );
    println!();

    println!("tasks ({}):", cfg.tasks.len());
    for (i, task) in cfg.tasks.iter().enumerate() {
        println!(
            "  {:>3}. {} {} {}{}",
            i + 1,
            task.task_type,
            task.aspect_ratio,
            task.resolution,
            task.name
                .as_deref()
                .map(|n| format!(" [{n}]"))
                .unwrap_or_default()
        );
        if !task.prompt.is_empty() {
            println!("       prompt: {}", task.prompt);
        }
        for image in &task.reference_images {
            println!("       ref: {}", image.display());
        }
        if let Some(dir) = &task.output_dir {
            println!("       output_dir: {}", dir.display());
        }
    }
}

fn fmt_duration(d: Duration) -> String {
    format!("{d:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TaskCounts;

    fn snapshot(queued: usize, running: usize, is_running: bool) -> StatusSnapshot {
        StatusSnapshot {
            session_count: 0,
            busy_count: running,
            retired_count: 1,
            is_running,
            counts: TaskCounts {
                queued,
                running,
                ..TaskCounts::default()
            },
            sessions: Vec::new(),
            tasks: Vec::new(),
        }
    }

    #[test]
    fn run_ends_once_a_halted_engine_has_drained() {
        assert!(is_done(&snapshot(0, 0, true)));
        assert!(is_done(&snapshot(3, 0, false)));
        assert!(!is_done(&snapshot(3, 0, true)));
        assert!(!is_done(&snapshot(3, 1, false)));
    }
}
