//! Trading automaton - main entry point
//!
//! Subcommands:
//! - scan: one market scan, print ranked candidates
//! - run: run the orchestrator loop (paper or live)
//! - status: print persisted positions and risk state
//! - health: gateway and state-dir probe

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "upbit-intraday")]
#[command(about = "Rule-based intraday trading automaton for Upbit KRW spot markets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one market scan and print ranked candidates
    Scan {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Run the trading loop
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Trading mode: paper or live
        #[arg(short, long, default_value = "paper")]
        mode: String,

        /// Session duration in minutes
        #[arg(short, long, default_value = "60")]
        duration: i64,
    },

    /// Print persisted positions, daily risk and market risk
    Status {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Probe the venue gateway and the state directory
    Health {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy transport crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Scan { .. } => "scan",
        Commands::Run { .. } => "run",
        Commands::Status { .. } => "status",
        Commands::Health { .. } => "health",
    };
    setup_logging(cli.verbose, command_name)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Scan { config } => runtime.block_on(commands::scan::run(config)),
        Commands::Run {
            config,
            mode,
            duration,
        } => runtime.block_on(commands::run::run(config, mode, duration)),
        Commands::Status { config } => commands::status::run(config),
        Commands::Health { config } => runtime.block_on(commands::health::run(config)),
    }
}
