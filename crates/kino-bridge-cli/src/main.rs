//! Kino Bridge CLI - Drive a player through the control bridge
//!
//! Features:
//! - Load a source into a headless player and run scripted commands
//! - Print command results and forwarded events
//! - Inspect the quality ladder of an HLS manifest
//! - List the supported actions and events

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Kino Bridge CLI - Player control bridge harness
#[derive(Parser)]
#[command(name = "kino-bridge")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Drive a Kino player through its control bridge", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Surface configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a source and run commands against it
    Run {
        /// Source URL (HLS manifest or progressive file)
        source: String,

        /// Start playback once ready
        #[arg(short, long)]
        autoplay: bool,

        /// Command steps, e.g. "seek:30" or "setVolume:0.5"
        #[arg(short, long = "step")]
        steps: Vec<String>,

        /// Serve HLS from the built-in headless ladder instead of fetching it
        #[arg(long)]
        offline: bool,

        /// Seconds to wait for the player to become ready
        #[arg(long, default_value = "10")]
        ready_timeout: u64,
    },

    /// Show the quality levels of an HLS manifest
    Inspect {
        /// URL to manifest
        manifest: String,
    },

    /// List supported actions and events
    Actions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    kino_bridge::init();

    match cli.command {
        Commands::Run { source, autoplay, steps, offline, ready_timeout } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::run(&source, autoplay, &steps, offline, ready_timeout, config, &cli.format).await?;
        }
        Commands::Inspect { manifest } => {
            commands::inspect(&manifest, &cli.format).await?;
        }
        Commands::Actions => {
            commands::actions(&cli.format);
        }
    }

    Ok(())
}
