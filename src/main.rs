//! Proposal coordinator CLI
//!
//! Runs the coordinator against a file-backed store.

use clap::{Parser, Subcommand};
use multisig_coordinator::cli;
use multisig_coordinator::config::CoordinatorConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coordinator")]
#[command(version = "0.1.0")]
#[command(about = "Proposal coordination for m-of-n multisig wallets", long_about = None)]
struct Cli {
    /// Data directory for proposal storage
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a 2-of-2 proposal end to end
    Demo,

    /// List stored proposals
    List {
        /// Required signatures
        #[arg(short)]
        m: u8,

        /// Total cosigners
        #[arg(short)]
        n: u8,
    },

    /// Decode a hex proposal record
    Inspect {
        /// Record bytes in hex
        #[arg(short, long)]
        record: String,

        /// Required signatures
        #[arg(short)]
        m: u8,

        /// Total cosigners
        #[arg(short)]
        n: u8,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        // Inspect works on raw bytes and needs no storage
        Commands::Inspect { record, m, n } => cli::cmd_inspect(&record, m, n),
        Commands::Demo => {
            let config = load_config(cli.config, cli.data_dir)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_demo(config))
        }
        Commands::List { m, n } => {
            let config = load_config(cli.config, cli.data_dir)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_list(config, m, n))
        }
    }
}

fn load_config(
    path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<CoordinatorConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => CoordinatorConfig::from_file(&path)?,
        None => CoordinatorConfig::default(),
    };
    if let Some(data_dir) = data_dir {
        config.storage.data_dir = data_dir;
    }
    Ok(config)
}
