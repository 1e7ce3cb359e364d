//! Hotswap Runtime
//!
//! Console host for the script engine. Stands in for a window with
//! "Run", "Hot Swap" and "Clear" buttons above a log pane.

mod command;
mod pane;

use anyhow::{Context as _, Result};
use clap::Parser;
use command::{Command, HELP};
use hotswap_script::{ContextManager, FileSource, HostSettings, Invocation, LogSink, Tag};
use pane::LogPane;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Parser)]
#[command(name = "hotswap", version, about = "Hot-swappable JavaScript host")]
struct Args {
    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Script to load (re-read on every swap)
    #[arg(long, env = "HOTSWAP_SCRIPT")]
    script: Option<PathBuf>,

    /// Entry point used by a bare `run`
    #[arg(long)]
    entry: Option<String>,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let settings = resolve_settings(&args)?;
    tracing::info!("Hotswap host v{}", env!("CARGO_PKG_VERSION"));

    let pane = Arc::new(LogPane::spawn().context("failed to start log pane")?);
    let manager = ContextManager::builder(Arc::new(FileSource::new(&settings.script.path)))
        .log(pane.clone())
        .settings(settings.clone())
        .initialize()
        .with_context(|| format!("cannot start with {}", settings.script.path.display()))?;
    let manager = Arc::new(manager);
    pane.log_line(HELP, Tag::Lifecycle);

    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        workers.retain(|worker| !worker.is_finished());

        match Command::parse(&line, &settings.script.entry_point) {
            Ok(Command::Run { entry, args }) => {
                let manager = Arc::clone(&manager);
                let pane = Arc::clone(&pane);
                workers.push(std::thread::spawn(move || {
                    // Failures are already in the pane
                    if let Ok(Invocation::Returned(value)) = manager.run(&entry, &args) {
                        pane.log_line(&format!("{entry} returned {value}"), Tag::Lifecycle);
                    }
                }));
            }
            Ok(Command::Swap) => {
                let manager = Arc::clone(&manager);
                workers.push(std::thread::spawn(move || {
                    let _ = manager.hot_swap();
                }));
            }
            Ok(Command::Clear) => pane.clear(),
            Ok(Command::Status) => {
                let stats = manager.stats();
                pane.log_line(
                    &format!(
                        "context {} | swaps {} ok / {} failed (avg {:?}, min {:?}, max {:?}) | timers {} scheduled, {} run, {} dropped",
                        stats.current,
                        stats.swaps_completed,
                        stats.swaps_failed,
                        stats.swap_times.average,
                        stats.swap_times.fastest,
                        stats.swap_times.slowest,
                        stats.timers_scheduled,
                        stats.timers_executed,
                        stats.timers_dropped_stale,
                    ),
                    Tag::Lifecycle,
                );
            }
            Ok(Command::Help) => pane.log_line(HELP, Tag::Lifecycle),
            Ok(Command::Quit) => break,
            Ok(Command::Empty) => {}
            Err(message) => pane.log_line(&message, Tag::Error),
        }
    }

    for worker in workers {
        let _ = worker.join();
    }
    manager.shutdown();
    tracing::info!("Host stopped");
    Ok(())
}

fn resolve_settings(args: &Args) -> Result<HostSettings> {
    let mut settings = match &args.config {
        Some(path) => HostSettings::load(path)?,
        None => HostSettings::default(),
    };
    if let Some(script) = &args.script {
        settings.script.path = script.clone();
    }
    if let Some(entry) = &args.entry {
        settings.script.entry_point = entry.clone();
    }
    settings.validate()?;
    Ok(settings)
}
