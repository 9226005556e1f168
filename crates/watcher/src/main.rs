//! Witness CLI
//!
//! Watches directory trees through inotify and prints the events it decodes,
//! or decodes a captured inotify read buffer.

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use color_eyre::eyre::{Result, WrapErr, bail};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use witness::config::Config;
use witness::{FileSystemEvent, Recursion, Witness};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref())?.with_log_level(cli.log_level.clone());

    init_logging(&config.watcher.log_level)?;

    match cli.command {
        Command::Watch {
            paths,
            depth,
            no_recursive,
            events,
            files_only,
            dirs_only,
        } => {
            let config = config
                .with_events(events)
                .with_subjects(files_only, dirs_only);
            cmd_watch(config, paths, cli::recursion(depth, no_recursive)).await
        }
        Command::Decode { file } => cmd_decode(&file),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

async fn cmd_watch(config: Config, paths: Vec<PathBuf>, recursion: Recursion) -> Result<()> {
    // Command-line paths replace the configured ones
    let roots: Vec<(PathBuf, Recursion)> = if paths.is_empty() {
        config
            .watch
            .iter()
            .map(|w| (w.path.clone(), w.recursion()))
            .collect()
    } else {
        paths.into_iter().map(|p| (p, recursion)).collect()
    };

    if roots.is_empty() {
        bail!("Nothing to watch: pass paths or add [[watch]] entries to the config");
    }

    let witness = Witness::with_buffer_events(
        &[],
        config.watcher.event_types(),
        Recursion::None,
        config.watcher.options(),
        config.watcher.buffer_events,
        print_events,
    )?;

    for (path, recursion) in &roots {
        let abs_path = std::fs::canonicalize(path)?;
        let wd = witness.add_path(&abs_path, *recursion)?;
        tracing::info!(wd, path = %abs_path.display(), ?recursion, "Watching");
    }

    wait_for_shutdown().await;

    witness.stop();
    tracing::info!("Stopped");
    Ok(())
}

fn print_events(events: Vec<FileSystemEvent>) {
    for event in events {
        println!("{event}");
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to set up SIGTERM, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl+C");
    }
}

fn cmd_decode(file: &Path) -> Result<()> {
    let bytes = std::fs::read(file)?;
    let stdout = std::io::stdout();
    let count = cli::write_records(&bytes, &mut stdout.lock())
        .wrap_err_with(|| format!("Failed to decode {}", file.display()))?;

    tracing::info!(records = count, bytes = bytes.len(), "Decoded");
    Ok(())
}
