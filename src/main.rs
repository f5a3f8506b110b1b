//! Chart Signal Relay - Main entry point
//!
//! # Usage
//!
//! ```bash
//! # Watch the chart and relay signals (default command)
//! signal-relay run
//!
//! # Attach region captures, against the local test server
//! signal-relay --dev run --image
//!
//! # Check target coordinates against the live chart
//! signal-relay probe --dump
//!
//! # Rebuild dist/target.json from saved ROI boxes
//! signal-relay derive-targets
//! ```

use chart_signal_relay::config::{load_capture_regions, load_targets};
use chart_signal_relay::diagnostics::{dump_targets, probe_targets};
use chart_signal_relay::roi::{default_roi_path, derive_target_file};
use chart_signal_relay::window_tracker::acquire_anchor;
use chart_signal_relay::{
    run_dispatch_worker, CapturePoint, Config, ConfigError, MonitorLoop, MonitorOptions,
    PixelSampler, RegionCapture, SignalDispatcher, SignalEvent, Target, XcapScreen, XcapWindows,
};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "signal-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (default: <config dir>/chart-signal-relay/config.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Send to the local development server
    #[arg(long)]
    dev: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch targets and relay signals until Ctrl+C
    Run {
        /// Attach a PNG of each target's capture region
        #[arg(long)]
        image: bool,

        /// Sampling tick in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Sample every target once and print what was seen
    Probe {
        /// Also write debug images to the dump directory
        #[arg(long)]
        dump: bool,
    },
    /// Derive target points from ROI boxes
    DeriveTargets {
        /// ROI file (default: dist/config.json)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Target file to write (default: the configured targets path)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_config_path);
    let loaded = match Config::read_from_path(&config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return Err(e.into());
        }
    };
    let from_file = loaded.is_some();
    let mut config = loaded.unwrap_or_default();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if from_file {
        info!("Loaded configuration from {:?}", config_path);
    } else {
        info!("No config file found at {:?}, using defaults", config_path);
    }

    match cli.command.unwrap_or(Command::Run {
        image: false,
        interval_ms: None,
    }) {
        Command::Run { image, interval_ms } => {
            if image {
                config.monitor.image_mode = true;
            }
            if let Some(ms) = interval_ms {
                config.monitor.tick_interval_ms = ms;
            }
            run(config, cli.dev).await
        }
        Command::Probe { dump } => probe(&config, dump),
        Command::DeriveTargets { input, output } => {
            let input = input.unwrap_or_else(default_roi_path);
            let output = output.unwrap_or_else(|| config.monitor.targets_path.clone());
            let targets = derive_target_file(&input, &output).inspect_err(|e| error!("{}", e))?;
            for target in &targets {
                println!(
                    "{:<12} p0=({}, {}) p1=({}, {})",
                    target.name, target.point0.x, target.point0.y, target.point1.x, target.point1.y
                );
            }
            println!("Wrote {} targets to {}", targets.len(), output.display());
            Ok(())
        }
    }
}

/// Capture regions, or none when the file does not exist
fn load_regions(
    config: &Config,
    targets: &[Target],
) -> Result<HashMap<String, CapturePoint>, ConfigError> {
    let path = &config.monitor.capture_regions_path;
    match load_capture_regions(path, targets) {
        Ok(regions) => Ok(regions),
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            warn!("No capture region file at {:?}; signals will be sent without images", path);
            Ok(HashMap::new())
        }
        Err(e) => Err(e),
    }
}

async fn run(config: Config, dev: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Chart Signal Relay");

    let targets = load_targets(&config.monitor.targets_path).inspect_err(|e| error!("{}", e))?;
    let regions = if config.monitor.image_mode {
        load_regions(&config, &targets).inspect_err(|e| error!("{}", e))?
    } else {
        HashMap::new()
    };

    let dispatcher = SignalDispatcher::new(config.server.effective_base_url(dev), &config.server)?;
    let stats = dispatcher.stats();
    info!("Relaying signals to {}", dispatcher.base_url());

    let (signal_tx, signal_rx) =
        mpsc::channel::<SignalEvent>(config.monitor.channel_capacity.max(1));

    let mut monitor = MonitorLoop::new(
        MonitorOptions::from_config(&config),
        targets,
        regions,
        Arc::new(XcapScreen::new()),
        Arc::new(XcapWindows::new()),
        signal_tx,
    );
    monitor.init().inspect_err(|e| error!("Cannot start monitoring: {}", e))?;

    let worker = tokio::spawn(run_dispatch_worker(
        Arc::new(dispatcher),
        signal_rx,
        monitor.event_sender(),
    ));

    // Setup shutdown signal
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let interval = Duration::from_millis(config.monitor.tick_interval_ms.max(1));
    let mut tick_interval = tokio::time::interval(interval);
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Watching {} targets every {}ms (Ctrl+C to stop)",
        monitor.targets().len(),
        interval.as_millis()
    );

    while running.load(Ordering::SeqCst) {
        tick_interval.tick().await;
        monitor.tick();
    }

    info!("Shutting down after {} ticks", monitor.tick_count());

    // Closing the signal channel lets the worker drain and exit
    drop(monitor);
    let drain =
        Duration::from_millis(config.server.connect_timeout_ms + config.server.read_timeout_ms);
    if tokio::time::timeout(drain, worker).await.is_err() {
        warn!("Dispatch worker did not finish within {:?}", drain);
    }

    let counts = stats.snapshot();
    info!("Delivered {} signals, {} failed", counts.delivered, counts.failed);
    Ok(())
}

fn probe(config: &Config, dump: bool) -> Result<(), Box<dyn std::error::Error>> {
    let targets = load_targets(&config.monitor.targets_path).inspect_err(|e| error!("{}", e))?;
    let regions = load_regions(config, &targets)?;

    let anchor = acquire_anchor(
        &XcapWindows::new(),
        &config.window.title,
        config.window.bring_to_front,
    )
    .inspect_err(|e| error!("{}", e))?;
    println!("Window origin: ({}, {})", anchor.x, anchor.y);

    let screen = Arc::new(XcapScreen::new());
    let sampler = PixelSampler::new(screen.clone());
    let tolerance = config.diagnostics.near_match_tolerance;
    for reading in probe_targets(&sampler, anchor, &targets, tolerance) {
        println!("{reading}");
    }

    if dump {
        let dir = &config.diagnostics.dump_dir;
        let written = dump_targets(&RegionCapture::new(screen), anchor, &targets, &regions, dir);
        println!("Wrote {} images to {}", written.len(), dir.display());
    }

    Ok(())
}
