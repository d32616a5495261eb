//! Domain models with validation at construction
//!
//! All user input is validated when creating these types.
//! Invalid input returns ValidationError, not panic.

pub mod filter;
pub mod user;
pub mod validation;

pub use filter::{AgeFilter, AgeFilterParams, DEFAULT_LIMIT, MAX_LIMIT, VISIBILITY_THRESHOLD};
pub use user::{NewUser, User, UserId};
pub use validation::ValidationError;
