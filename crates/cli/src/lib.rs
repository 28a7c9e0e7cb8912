pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pulseboard_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};

#[derive(Debug, Parser)]
#[command(
    name = "pulseboard",
    about = "Pulseboard e-commerce dashboard CLI",
    long_about = "Derive KPI, growth, segmentation, return and insight sections from exported summary tables.",
    after_help = "Examples:\n  pulseboard report --data-dir ./exports\n  pulseboard insights --json\n  pulseboard doctor"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Derive every dashboard section from the configured source tables")]
    Report {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(long, value_name = "DIR", help = "Directory holding the exported tables")]
        data_dir: Option<PathBuf>,
    },
    #[command(about = "Evaluate the insight rules and print the statements that fired")]
    Insights {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(long, value_name = "DIR", help = "Directory holding the exported tables")]
        data_dir: Option<PathBuf>,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config and check which source tables can be found and parsed")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

fn init_logging(config: &LoggingConfig) {
    use tracing::Level;

    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // Another subscriber may already be installed when embedded.
    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let logging = AppConfig::load(LoadOptions::default())
        .map(|config| config.logging)
        .unwrap_or_else(|_| AppConfig::default().logging);
    init_logging(&logging);

    let result = match cli.command {
        Command::Report { json, data_dir } => commands::report::run(json, data_dir),
        Command::Insights { json, data_dir } => commands::insights::run(json, data_dir),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
