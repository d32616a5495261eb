//! Database layer - connection lifecycle, backends and repositories
//!
//! # Design Principles
//!
//! - One `ConnectionManager` owns the handle; nothing else mutates it
//! - Reconnection runs in background tasks, never on the request path
//! - Rely on the unique email index as the final word on duplicates

pub mod backoff;
pub mod connection;
pub mod memory;
pub mod mongo;
pub mod repos;
pub mod schema;
pub mod store;

pub use backoff::BackoffPolicy;
pub use connection::{ConnectionError, ConnectionManager, ConnectionStatus, ManagerOptions};
pub use memory::{MemoryConnector, MemoryStore};
pub use mongo::{MongoConnector, MongoStore};
pub use repos::*;
pub use schema::ensure_schema;
pub use store::{Connector, FailureSignal, IndexSpec, Store, StoreError, UserQuery};
