//! copanel CLI — the main entry point.
//!
//! Commands:
//! - `onboard`   — Write the default config
//! - `status`    — Show the resolved configuration
//! - `features`  — List features and where their panels dock
//! - `chat`      — Interactive or single-message chat through the shell
//! - `suggest`   — Rank past interpretations for a new input

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "copanel",
    about = "copanel — multi-feature assistant shell",
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

    /// Show the resolved configuration
    Status,

    /// List features, routes and panel placement
    Features,

    /// Chat with the assistant
    Chat {
        /// Feature to activate before chatting (chat, boards, interpret, docs, programs)
        #[arg(short, long)]
        feature: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Suggest interpretations from a history file
    Suggest {
        /// JSON array of {input, interpretation, subjectId?, timestamp?}
        #[arg(long)]
        history: PathBuf,

        /// Only consider records for this subject
        #[arg(long, env = "COPANEL_SUBJECT_ID")]
        subject: Option<String>,

        /// The new input to interpret
        input: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Status => commands::status::run().await?,
        Commands::Features => commands::features::run().await?,
        Commands::Chat { feature, message } => commands::chat::run(feature, message).await?,
        Commands::Suggest {
            history,
            subject,
            input,
        } => commands::suggest::run(history, subject, input).await?,
    }

    Ok(())
}
