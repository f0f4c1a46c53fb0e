//! parley CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write the default config
//! - `chat`: Interactive or single-message chat
//! - `warmup`: Load the model into the server ahead of time
//! - `doctor`: Check config and backend reachability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "parley — a conversational agent for local LLM servers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Onboard,

    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Name your turns are tagged with in the prompt
        #[arg(long, default_value = "User")]
        speaker: String,

        /// Skip the warmup request before the first turn
        #[arg(long)]
        no_warmup: bool,

        /// Resume the running prompt from this file and save it after every turn
        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },

    /// Run one warmup request and report it
    Warmup,

    /// Diagnose config and backend health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so streamed replies on stdout stay clean
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat {
            message,
            speaker,
            no_warmup,
            prompt_file,
        } => {
            commands::chat::run(commands::chat::ChatArgs {
                message,
                speaker,
                warmup: !no_warmup,
                prompt_file,
            })
            .await?
        }
        Commands::Warmup => commands::warmup::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
