mod cli;
mod config;
mod dispatcher;
mod error;
mod event;
mod event_log;
mod file_id;
mod locator;
mod logging;
mod matcher;
mod monitor;
mod notifier;
mod paths;
mod sound;
mod startup;
mod status;
mod tailer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::event_log::{EventKind, EventLog};
use crate::monitor::Monitor;
use crate::notifier::DesktopNotifier;
use crate::sound::{SoundResolver, SystemSoundPlayer};
use crate::status::StatusHandle;

const APP_NAME: &str = "LogChime";

/// How long shutdown waits for the monitor loop.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    // ── Login registration ────────────────────────────────────────────────────
    if args.register_startup {
        return startup::register_startup();
    }
    if args.unregister_startup {
        return startup::unregister_startup();
    }

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("failed to create app data directory {}", app_dir.display()))?;

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match args.config {
        Some(path) if path.is_relative() => std::env::current_dir()
            .context("failed to resolve current directory")?
            .join(path),
        Some(path) => path,
        None => paths::config_file_path(),
    };
    let initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        warn!("{e}; using defaults");
        config::Config::default()
    });
    let (config_tx, config_rx) = watch::channel(Arc::new(initial_config));

    // ── Status ────────────────────────────────────────────────────────────────
    let status = StatusHandle::new();
    tokio::spawn(status::publish_to_file(
        status.subscribe(),
        paths::status_file_path(),
    ));

    let events = EventLog::new(paths::event_log_file_path());
    info!(config = %config_path.display(), events = %events.path().display(), "using app data files");
    let dispatcher = Dispatcher::new(
        events,
        SoundResolver::new(paths::assets_dir()),
        Arc::new(SystemSoundPlayer),
        Arc::new(DesktopNotifier::new(APP_NAME)),
        status.clone(),
    );

    announce_launch(&dispatcher, args.startup);

    let (event_tx, mut event_rx) = mpsc::channel::<event::DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path.clone(), event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(event::DaemonEvent::Shutdown).await;
            }
        });
    }

    let monitor = Monitor::new(config_rx, Some(config_path), dispatcher).start();

    info!(version = env!("CARGO_PKG_VERSION"), "logchime started");

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            event::DaemonEvent::ConfigReloaded(new_config) => {
                info!(triggers = new_config.triggers.len(), "config reloaded");
                config_tx.send_replace(Arc::new(new_config));
            }

            event::DaemonEvent::Shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    monitor.stop(SHUTDOWN_TIMEOUT).await;
    info!(last_state = %status.snapshot().state, "stopped");
    Ok(())
}

/// Records the launch and, unless started at login, announces it.
fn announce_launch(dispatcher: &Dispatcher, startup: bool) {
    if !startup {
        dispatcher.notify(APP_NAME, "Program started and monitoring logs.");
    }
    dispatcher.record(EventKind::Launched, format!("{APP_NAME} opened"));
}
