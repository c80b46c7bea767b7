//! MeshBrain CLI: the main entry point.
//!
//! Commands:
//! - `init`   : Write a default config file
//! - `serve`  : Start the HTTP gateway (with the background sweeper)
//! - `chat`   : Interactive or single-message chat through the orchestrator
//! - `health` : Print tier availability and provider status
//! - `export` : Dump a user's WARM + COLD history as JSON lines
//! - `sweep`  : Run one tier migration / expiry pass

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "meshbrain",
    about = "MeshBrain: multi-provider conversational backend with tiered memory",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.meshbrain/config.toml)
    #[arg(short, long, global = true, env = "MESHBRAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat through the provider chain with persistent memory
    Chat {
        /// User id the conversation is recorded under
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show tier availability and provider health
    Health,

    /// Export a user's history (WARM + COLD) as JSON lines
    Export {
        /// User id to export
        user: String,

        /// Only turns at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,

        /// Only turns before this RFC 3339 timestamp
        #[arg(long)]
        until: Option<String>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run one sweep: purge HOT, migrate WARM to COLD, expire COLD
    Sweep,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init { force } => commands::init::run(config_path, force).await?,
        Commands::Serve { host, port } => commands::serve::run(config_path, host, port).await?,
        Commands::Chat { user, message } => commands::chat::run(config_path, user, message).await?,
        Commands::Health => commands::health::run(config_path).await?,
        Commands::Export {
            user,
            since,
            until,
            output,
        } => commands::export::run(config_path, &user, since, until, output).await?,
        Commands::Sweep => commands::sweep::run(config_path).await?,
    }

    Ok(())
}
