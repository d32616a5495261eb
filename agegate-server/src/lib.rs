//! agegate-server: HTTP users service over a document database
//!
//! Users are only visible once they are older than the visibility
//! threshold. The database connection is supervised and re-established
//! with exponential backoff when it drops.

pub mod config;
pub mod db;
pub mod http;
pub mod models;

pub use config::{ConnectionProfile, DatabaseConfig, Environment};
pub use db::{ensure_schema, ConnectionManager, MemoryConnector, MongoConnector, UserRepo};
pub use http::{build_router, run_server, AppState, ServerConfig};
