//! agegate CLI - users API server with age-gated visibility
//!
//! Subcommands:
//! - `serve`: run the HTTP API against MongoDB (or an in-memory store)
//! - `seed`: replace the users collection with sample data

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod tracing_setup;

use tracing_setup::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(
    name = "agegate",
    author,
    version,
    about = "Users API that only exposes users above an age threshold",
    long_about = "Serve a small users API backed by MongoDB. Users are visible only once they \
                  are older than 21; the database connection is supervised and re-established \
                  with exponential backoff."
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server
    Serve(commands::ServeArgs),
    /// Replace all users with sample data
    Seed(commands::SeedArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing so `.env` values feed clap's env defaults
    let env_files = config::load_dotenv();
    let cli = Cli::parse();

    init_tracing(&TracingConfig { debug: cli.debug }).ok();
    if env_files.is_empty() {
        tracing::debug!("No .env files found (current dir or ~/.agegate)");
    }
    for path in &env_files {
        tracing::debug!("Loaded .env from {}", path.display());
    }

    match cli.command {
        Commands::Serve(args) => commands::run_serve(args).await?,
        Commands::Seed(args) => commands::run_seed(args).await?,
    }
    Ok(())
}
