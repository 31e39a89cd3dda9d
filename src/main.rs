//! BDI Forecast Service
//!
//! Runs the forecast / validate / calibrate loop and prints the dashboard snapshot as JSON.
//!
//! Usage:
//!   bdi-forecast --config forecast.toml --checkpoint params.json --metrics-file bdi.prom
//!   bdi-forecast --once --seed 42
//!
//! Environment Variables:
//!   BDI_CONFIG_PATH - Path to TOML config file
//!   RUST_LOG - tracing filter (default: bdi_forecast=info)
//!   BDI_* - individual config overrides, see config.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bdi_forecast::calibration::CalibrationParameters;
use bdi_forecast::telemetry::ForecastMetrics;
use bdi_forecast::{CycleReport, ForecastConfig, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "bdi-forecast")]
#[command(about = "Closed-loop Baltic Dry Index forecaster")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "BDI_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Override the cycle interval
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Log level for this crate (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Write Prometheus text metrics here after every cycle
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Restore calibration parameters from, and save them to, this JSON file
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Seed factor draws, estimate noise and simulated feeds
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    info!("🚢 Starting BDI forecast service");

    let mut config = ForecastConfig::load(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        config.factors.seed = Some(seed);
    }
    if let Some(secs) = args.interval_secs {
        config.schedule.cycle_interval = Duration::from_secs(secs.max(1));
    }

    let metrics = Arc::new(ForecastMetrics::new());
    let orchestrator = Orchestrator::from_config(config, metrics).await?;

    if let Some(path) = args.checkpoint.as_deref().filter(|p| p.exists()) {
        let params = CalibrationParameters::load_checkpoint(path)?;
        orchestrator.controller().restore(params);
        info!("Restored calibration parameters from {}", path.display());
    }

    info!(
        sources = ?orchestrator.source_names(),
        validated = %orchestrator.config().schedule.validated_metric,
        tracked = orchestrator.config().schedule.tracked_metrics.len(),
        "Forecast loop configured"
    );

    if args.once {
        let report = orchestrator.run_cycle().await;
        after_cycle(&orchestrator, &args, &report);
        return Ok(());
    }

    let interval = orchestrator.config().schedule.cycle_interval;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    orchestrator
        .run(interval, shutdown, |report| after_cycle(&orchestrator, &args, report))
        .await;

    info!("Shutdown complete");
    Ok(())
}

/// Persist state and print the dashboard. Failures are logged, never fatal.
fn after_cycle(orchestrator: &Orchestrator, args: &Args, report: &CycleReport) {
    if let Some(path) = &args.checkpoint {
        if let Err(e) = orchestrator.controller().snapshot().save_checkpoint(path) {
            warn!(error = %e, "⚠️ Failed to save calibration checkpoint");
        }
    }

    if let Some(path) = &args.metrics_file {
        if let Err(e) = write_metrics_file(path, &orchestrator.metrics().to_prometheus()) {
            warn!(error = %e, "⚠️ Failed to write metrics file");
        }
    }

    match serde_json::to_string_pretty(&orchestrator.dashboard()) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!(cycle_id = %report.cycle_id, error = %e, "Failed to render dashboard"),
    }
}

/// Write-then-rename so a textfile collector never reads a partial file.
fn write_metrics_file(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("failed to move into {}", path.display()))
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("bdi_forecast={}", level)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "bdi_forecast=info".into()),
    };

    // Logs go to stderr; stdout carries the dashboard JSON
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_env() {
    // Missing .env is fine
    let _ = dotenv::dotenv();
}
