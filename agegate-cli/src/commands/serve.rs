//! HTTP server command
//!
//! Connects to the database, ensures the schema, then serves the users API
//! until Ctrl+C or SIGTERM. The database connection is closed on the way out.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use agegate_server::http::{run_server, AppState, ServerConfig};
use agegate_server::{ensure_schema, ConnectionManager, DatabaseConfig, MemoryConnector, MongoConnector};

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, short = 'p', env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Host or address to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Only accept localhost origins instead of any origin
    #[arg(long)]
    pub cors_localhost: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Use a throwaway in-memory store instead of MongoDB
    #[arg(long)]
    pub in_memory: bool,
}

impl ServeArgs {
    fn bind_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address found for {}", self.host))
    }
}

fn connection_manager(in_memory: bool) -> Result<Arc<ConnectionManager>> {
    if in_memory {
        tracing::warn!("Using in-memory store; data is lost on exit");
        return Ok(ConnectionManager::new(MemoryConnector::new()));
    }

    let (environment, config) = DatabaseConfig::from_env()?;
    tracing::info!(%environment, uri = %config.redacted_uri(), "Database configuration loaded");
    Ok(ConnectionManager::new(MongoConnector::new(config)))
}

/// Run the HTTP server
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig {
        bind_addr: args.bind_addr()?,
        cors_permissive: !args.cors_localhost,
        request_timeout: Duration::from_secs(args.timeout),
    };

    let db = connection_manager(args.in_memory)?;
    let store = match db.connect().await {
        Ok(store) => store,
        Err(err) => {
            // Stop the background retry loop before exiting
            let _ = db.close().await;
            return Err(err).context("Failed to connect to database");
        }
    };
    ensure_schema(store.as_ref())
        .await
        .context("Failed to initialize database schema")?;

    let state = Arc::new(AppState::new(Arc::clone(&db)));
    let served = run_server(state, config).await;

    if let Err(err) = db.close().await {
        tracing::error!(error = %err, "Error closing database connection on shutdown");
    }

    served.context("Server error")
}
