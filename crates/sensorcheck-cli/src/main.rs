//! sensorcheck - run declarative sensor test plans
//!
//! ## Commands
//!
//! - `run`: execute a plan and print (or write) its report
//! - `validate`: build a plan's operation tree without running it
//! - `defaults`: print the default-verification table

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use sensorcheck_core::{SensorType, VerificationDefaults};
use sensorcheck_plan::{PlanResult, PlanRunner, PlanSpec};

#[derive(Parser)]
#[command(name = "sensorcheck")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Composable sensor test operations and verifications", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a test plan
    Run {
        /// Path to the plan file (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Write the full JSON report here
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Check that a plan parses and builds
    Validate {
        /// Path to the plan file (JSON)
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Print the default-verification table
    Defaults {
        /// Only this sensor type (e.g. `accelerometer`)
        #[arg(short, long)]
        sensor: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sensorcheck_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run { plan, report } => cmd_run(&plan, report.as_deref()).await,
        Commands::Validate { plan } => cmd_validate(&plan),
        Commands::Defaults { sensor } => cmd_defaults(sensor.as_deref()),
    }
}

fn load_plan(path: &Path) -> Result<PlanSpec> {
    PlanSpec::from_file(path).with_context(|| format!("Failed to load plan {}", path.display()))
}

async fn cmd_run(plan_path: &Path, report: Option<&Path>) -> Result<()> {
    let plan = load_plan(plan_path)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running operations");
            on_interrupt.cancel();
        }
    });

    let result = PlanRunner::with_cancellation(cancel)
        .run(&plan)
        .await
        .context("Plan could not be executed")?;

    print_summary(&result);

    if let Some(path) = report {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    if result.passed {
        Ok(())
    } else {
        anyhow::bail!("Plan '{}' failed", result.plan_name)
    }
}

fn print_summary(result: &PlanResult) {
    println!("Plan: {}", result.plan_name);
    println!("Run ID: {}", result.run_id);
    println!("Digest: {}", result.plan_digest);
    println!("Status: {}", if result.passed { "✓ PASSED" } else { "✗ FAILED" });
    println!("Duration: {}ms", result.duration_ms);
    if let Some(error) = &result.error {
        println!("Error: {error}");
    }
    println!();
    for (key, value) in result.stats.flatten() {
        println!("  {key}: {value}");
    }
}

fn cmd_validate(plan_path: &Path) -> Result<()> {
    let plan = load_plan(plan_path)?;
    let root = PlanRunner::new()
        .validate(&plan)
        .with_context(|| format!("Plan '{}' is invalid", plan.name))?;
    println!("✓ Plan '{}' is valid", plan.name);
    println!("Root: {}", root.kind());
    println!("Digest: {}", plan.plan_digest()?);
    Ok(())
}

fn parse_sensor_type(name: &str) -> Result<SensorType> {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .with_context(|| format!("Unknown sensor type: {name}"))
}

fn cmd_defaults(sensor: Option<&str>) -> Result<()> {
    let table = VerificationDefaults::cts();
    let json = match sensor {
        Some(name) => {
            let sensor_type = parse_sensor_type(name)?;
            let entry = table
                .for_sensor(sensor_type)
                .with_context(|| format!("No default verifications for {sensor_type}"))?;
            serde_json::to_string_pretty(entry)?
        }
        None => serde_json::to_string_pretty(&table)?,
    };
    println!("{json}");
    Ok(())
}
