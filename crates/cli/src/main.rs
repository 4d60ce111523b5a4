use algo_signal_core::{AppConfig, ConfigLoader, Signal};
use algo_signal_engine::CycleReport;
use algo_signal_scheduler::{SignalScheduler, SignalServices};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "algo-signal")]
#[command(about = "Crypto trading signal engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    config: String,
    /// Profile overlay loaded from `config/Config.{profile}.toml`
    #[arg(long, env = "ALGO_SIGNAL_PROFILE")]
    profile: Option<String>,
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long)]
    log_file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one build cycle and print the report and signals
    Build(CommonArgs),
    /// Resolve pending outcomes against recent candles
    Resolve(CommonArgs),
    /// Train the confidence model from the outcome log
    Calibrate(CommonArgs),
    /// Run the build and calibration schedule until Ctrl-C
    Run(CommonArgs),
    /// Print the effective configuration as JSON
    ShowConfig(CommonArgs),
}

impl Commands {
    fn common(&self) -> &CommonArgs {
        match self {
            Self::Build(args)
            | Self::Resolve(args)
            | Self::Calibrate(args)
            | Self::Run(args)
            | Self::ShowConfig(args) => args,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let common = cli.command.common().clone();
    init_logging(common.log_file.as_deref())?;

    let config = match &common.profile {
        Some(profile) => ConfigLoader::load_with_profile(profile)?,
        None => ConfigLoader::load_from(&common.config)?,
    };

    match cli.command {
        Commands::Build(_) => run_build(&config).await?,
        Commands::Resolve(_) => run_resolve(&config).await?,
        Commands::Calibrate(_) => run_calibrate(&config).await?,
        Commands::Run(_) => run_daemon(config).await?,
        Commands::ShowConfig(_) => print_json(&redacted(config))?,
    }

    Ok(())
}

fn init_logging(log_file: Option<&str>) -> Result<()> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            // stdout carries the JSON output
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    if config.market.api_key.is_some() {
        config.market.api_key = Some("***".to_string());
    }
    config
}

async fn run_build(config: &AppConfig) -> Result<()> {
    #[derive(Serialize)]
    struct BuildOutput<'a> {
        report: &'a CycleReport,
        signals: Vec<Signal>,
    }

    let services = SignalServices::from_config(config).await?;
    let report = services.builder.run_cycle().await;
    services.persist().await;

    let signals = if report.ok {
        services.builder.latest_signals().await?
    } else {
        Vec::new()
    };
    print_json(&BuildOutput {
        report: &report,
        signals,
    })?;

    if let Some(error) = report.error {
        anyhow::bail!("Build cycle failed: {error}");
    }
    Ok(())
}

async fn run_resolve(config: &AppConfig) -> Result<()> {
    let services = SignalServices::from_config(config).await?;
    let report = services
        .outcomes
        .resolve_pending(&services.provider)
        .await
        .context("Outcome resolution failed")?;
    services.persist().await;
    print_json(&report)
}

async fn run_calibrate(config: &AppConfig) -> Result<()> {
    let services = SignalServices::from_config(config).await?;
    let report = services.calibration.run().await;
    services.persist().await;
    print_json(&report)?;

    if let Some(error) = report.error {
        anyhow::bail!("Calibration failed: {error}");
    }
    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    tracing::info!(
        build_interval_minutes = config.scheduler.build_interval_minutes,
        "Starting signal daemon"
    );
    let services = Arc::new(SignalServices::from_config(&config).await?);
    SignalScheduler::new(config.scheduler, services).start().await?;
    tracing::info!("Signal daemon stopped");
    Ok(())
}
