use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tether_core::HostConfig;

mod builtins;
mod commands;

#[derive(Parser)]
#[command(name = "tether", about = "Plugin host for chat bots")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $TETHER_CONFIG, then ~/.config/tether/tether.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host until interrupted
    Run(commands::run::RunArgs),
    /// Load the configured units once and report failures
    Check,
    /// List loaded and available units
    Units(commands::units::UnitsArgs),
    /// Inspect configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(tether_paths::config_file);

    // RUST_LOG wins, then --verbose, then the configured level
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        HostConfig::from_path(&config_path)
            .map(|config| config.basic.log_level)
            .unwrap_or_else(|_| "info".to_string())
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args, &config_path).await,
        Commands::Check => commands::check::run(&config_path).await,
        Commands::Units(args) => commands::units::run(args, &config_path).await,
        Commands::Config(args) => commands::config::run(args, &config_path),
    }
}
