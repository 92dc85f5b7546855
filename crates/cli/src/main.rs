//! usb-tree
//!
//! Watches the locally attached USB devices, shows them as a tree of hubs
//! and ports, and keeps a log of everything that is plugged in or pulled out.

mod config;
mod tui;
mod view;

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use config::AppConfig;
use monitor::tree::count_nodes;
use monitor::{Monitor, PollUpdate, Poller, build_forest, update_queue};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-tree")]
#[command(author, version, about = "usb-tree - Live view of attached USB devices")]
#[command(long_about = "
Monitors locally attached USB devices, rebuilds the hub topology as a tree
and logs every attach and detach as it happens.

EXAMPLES:
    # Interactive tree view
    usb-tree

    # Print the current tree and exit
    usb-tree --list

    # Same, as JSON
    usb-tree --list --json

    # Print changes to stdout until Ctrl+C
    usb-tree --watch

    # Run with debug logging written to a file
    usb-tree --log-level debug --log-file ~/usb-tree.log

CONFIGURATION:
    usb-tree looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-tree/config.toml
    3. /etc/usb-tree/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Print the device tree once and exit
    #[arg(long, conflicts_with = "watch")]
    list: bool,

    /// Print --list output as JSON
    #[arg(long, requires = "list")]
    json: bool,

    /// Print change-log lines as devices come and go (no TUI)
    #[arg(long)]
    watch: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = AppConfig::default();
        let path = args
            .config
            .as_deref()
            .map(config::expand_path)
            .unwrap_or_else(AppConfig::default_path);
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let config = if let Some(ref path) = args.config {
        AppConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        AppConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    config::validate_log_level(log_level)?;

    let interactive = !args.list && !args.watch;
    let log_file = args
        .log_file
        .as_deref()
        .map(config::expand_path)
        .or_else(|| config.log_file())
        // Log lines would corrupt the alternate screen
        .or_else(|| interactive.then(AppConfig::default_log_file));

    setup_logging(log_level, log_file.as_deref()).context("Failed to setup logging")?;

    info!("usb-tree v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let monitor = Arc::new(Monitor::system(&config.monitor));

    if args.list {
        return list_mode(monitor, args.json).await;
    }

    if args.watch {
        info!("Running in watch mode (headless)");
        watch_mode(monitor, &config).await
    } else {
        info!("Running in TUI mode (interactive)");
        tui::run(monitor, &config).await
    }
}

/// Print one snapshot and exit
async fn list_mode(monitor: Arc<Monitor>, json: bool) -> Result<()> {
    let snapshot = tokio::task::spawn_blocking(move || monitor.refresh())
        .await
        .context("Snapshot task failed")?
        .context("Failed to enumerate USB devices")?;

    let roots = build_forest(&snapshot.devices);

    if json {
        let document = serde_json::json!({
            "timestamp": snapshot.timestamp,
            "devices": roots,
        });
        let text =
            serde_json::to_string_pretty(&document).context("Failed to serialize device tree")?;
        println!("{}", text);
    } else if roots.is_empty() {
        println!("No USB devices found.");
    } else {
        print!("{}", view::tree_text(&roots));
    }

    Ok(())
}

/// Print change-log lines until Ctrl+C
async fn watch_mode(monitor: Arc<Monitor>, config: &AppConfig) -> Result<()> {
    let poller = Poller::new(monitor.clone(), config.monitor.poll_interval());
    let (callback, updates) = update_queue(config.monitor.update_queue_capacity);
    poller.start(callback).context("Failed to start poller")?;

    let mut printed = 0;
    let mut announced = false;
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, shutting down..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                break;
            }
            update = updates.recv() => {
                let Ok(update) = update else {
                    break;
                };
                if !announced {
                    announced = true;
                    match &update {
                        PollUpdate::Forest { roots, .. } => println!(
                            "Watching {} USB devices (Ctrl+C to stop)",
                            count_nodes(roots)
                        ),
                        PollUpdate::NoData { .. } => {
                            println!("USB enumeration unavailable, retrying (Ctrl+C to stop)")
                        }
                    }
                }
                for entry in monitor.change_log().entries_since(printed) {
                    println!("{}", view::log_line(&entry));
                    printed += 1;
                }
            }
        }
    }

    poller.stop();
    poller.join().await;
    Ok(())
}
