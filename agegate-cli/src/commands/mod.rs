//! Command implementations

pub mod seed;
pub mod serve;

pub use seed::{run_seed, SeedArgs};
pub use serve::{run_serve, ServeArgs};
