//! ROM Runner command line entry point.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "romrunner")]
#[command(version, about = "Deploy ROM libraries to handheld SD cards", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/romrunner/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog snapshot, overriding the configured one
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Destination selection shared by the pipeline commands.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Destination root (SD card mount point)
    pub dest: PathBuf,

    /// Device model id from the catalog
    #[arg(short, long)]
    pub device: String,

    /// Expected OS id (default: the device's default OS)
    #[arg(long)]
    pub os: Option<String>,

    /// Path override, e.g. `roms=Games` (repeatable)
    #[arg(long = "path", value_name = "KIND=PATH")]
    pub paths: Vec<String>,

    /// Force an item into the deployment (content id, repeatable)
    #[arg(long)]
    pub include: Vec<String>,

    /// Keep an item out of the deployment (content id, repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Emulator override, e.g. `psx=duckstation` (repeatable)
    #[arg(long, value_name = "PLATFORM=EMULATOR")]
    pub emulator: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify library files to platforms
    Library {
        /// Library root (repeatable; default: configured roots)
        #[arg(long)]
        root: Vec<PathBuf>,

        /// Hash every classified file
        #[arg(long)]
        hash: bool,
    },

    /// Verify local BIOS files against the catalog
    Bios {
        /// BIOS directory (default: configured directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Scan a destination and resolve its layout
    Inspect(TargetArgs),

    /// Build and validate a plan without writing to the destination
    Plan(TargetArgs),

    /// Deploy the library to a destination
    Deploy(TargetArgs),

    /// Probe a destination for counterfeit capacity and slow writes
    Diagnose {
        /// Destination root
        dest: PathBuf,

        /// Skip the speed probe
        #[arg(long)]
        no_speed: bool,
    },

    /// Show the deployment log
    History {
        /// Only runs that never finished
        #[arg(long)]
        interrupted: bool,
    },

    /// Continue an interrupted deployment
    Resume {
        /// Plan id from `history --interrupted`
        plan_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting romrunner");

    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let config = config::AppConfig::load_from(&config_path)?;
    let ctx = commands::Context::new(config, cli.catalog.as_deref());

    match cli.command {
        Commands::Library { root, hash } => commands::library(&ctx, &root, hash),
        Commands::Bios { dir } => commands::bios(&ctx, dir.as_deref()),
        Commands::Inspect(target) => commands::inspect(&ctx, &target).await,
        Commands::Plan(target) => commands::plan(&ctx, &target).await,
        Commands::Deploy(target) => commands::deploy(&ctx, &target).await,
        Commands::Diagnose { dest, no_speed } => commands::diagnose(&ctx, &dest, no_speed).await,
        Commands::History { interrupted } => commands::history(&ctx, interrupted),
        Commands::Resume { plan_id } => commands::resume(&ctx, &plan_id).await,
    }
}
