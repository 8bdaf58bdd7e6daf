//! Prole CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "prole")]
#[command(about = "Prole build worker CLI", long_about = None)]
struct Cli {
    /// Worker configuration file (KDL)
    #[arg(long, global = true, env = "PROLE_CONFIG")]
    config: Option<PathBuf>,

    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a build locally using Docker
    Run {
        /// Path to the build description (JSON)
        build: PathBuf,
        /// Leave the build container in place afterwards
        #[arg(long)]
        keep_container: bool,
    },
    /// Check a resource for versions
    Check {
        /// Resource type, e.g. "git"
        resource_type: String,
        /// Resource source, as JSON
        source: String,
        /// Version to check from, as JSON
        #[arg(long)]
        version: Option<String>,
    },
    /// Validate a worker configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "prole.kdl")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            build,
            keep_container,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::run::run_local(&build, &config, keep_container).await?;
        }
        Commands::Check {
            resource_type,
            source,
            version,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::check::check(&config, &resource_type, &source, version.as_deref()).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
