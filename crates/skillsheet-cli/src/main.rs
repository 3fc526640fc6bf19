//! skillsheet CLI — the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "skillsheet", version, about = "Practical skills assessment engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate template TOML files
    Validate {
        /// Path to template file or directory
        #[arg(long)]
        template: PathBuf,
    },

    /// Replay a session's operation log and print the resulting state
    Replay {
        /// Path to the template TOML the session was bound to
        #[arg(long)]
        template: PathBuf,

        /// Path to the session's .jsonl operation log
        #[arg(long)]
        log: PathBuf,
    },

    /// Print a saved final result
    Result {
        /// Path to a result JSON file
        #[arg(long)]
        result: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("skillsheet=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { template } => commands::validate::execute(template),
        Commands::Replay { template, log } => commands::replay::execute(template, log),
        Commands::Result { result } => commands::result::execute(result),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
