//! Store seams - what the connection manager and repositories need from a
//! document database.
//!
//! `Connector` opens handles, `Store` is a live handle. MongoDB and the
//! in-memory backend both implement these.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{NewUser, User, UserId};

/// Collection holding user records
pub const USERS_COLLECTION: &str = "users";

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("index '{name}' conflicts with an existing index: {reason}")]
    IndexConflict { name: String, reason: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("malformed document: {0}")]
    Document(String),

    #[error("store handle is closed")]
    Closed,
}

/// Failure notifications a live handle reports to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignal {
    /// A periodic server heartbeat failed
    HeartbeatFailed,
    /// The underlying transport was closed
    ConnectionClosed,
}

/// Sending half handed to a connector for each new handle.
pub type SignalSender = mpsc::UnboundedSender<FailureSignal>;

/// Filter over user records.
///
/// Built by the repository layer; backends either render it to their query
/// language or evaluate it with [`UserQuery::matches`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQuery {
    pub id: Option<UserId>,
    /// Only users with `age > older_than`
    pub older_than: Option<i64>,
    pub email: Option<String>,
}

impl UserQuery {
    /// Matches every user.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: UserId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn older_than(mut self, age: i64) -> Self {
        self.older_than = Some(age);
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Evaluate the filter against a record.
    pub fn matches(&self, user: &User) -> bool {
        self.id.map_or(true, |id| user.id == id)
            && self.older_than.map_or(true, |age| user.age > age)
            && self.email.as_deref().map_or(true, |email| user.email == email)
    }
}

/// Single-field ascending index definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub field: &'static str,
    pub unique: bool,
    pub sparse: bool,
}

/// Opens handles to a document store.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Address for log output, with credentials removed
    fn address(&self) -> String;

    /// Open and verify a new handle. The handle reports heartbeat failures
    /// and closure on `signals` for as long as it lives.
    async fn connect(&self, signals: SignalSender) -> Result<Arc<dyn Store>, StoreError>;
}

/// A live handle to a document store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Whether the transport currently believes it is connected.
    fn is_connected(&self) -> bool;

    /// Lightweight liveness command.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Shut the transport down.
    async fn close(&self) -> Result<(), StoreError>;

    async fn collection_names(&self) -> Result<Vec<String>, StoreError>;

    async fn create_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Create an index; an identical existing index is a no-op.
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError>;

    async fn find_one_user(&self, query: &UserQuery) -> Result<Option<User>, StoreError>;

    /// Matching users sorted ascending by age, at most `limit`.
    async fn find_users(&self, query: &UserQuery, limit: u32) -> Result<Vec<User>, StoreError>;

    async fn count_users(&self, query: &UserQuery) -> Result<u64, StoreError>;

    /// Insert and return the store-assigned id. Violating a unique index
    /// yields [`StoreError::DuplicateKey`].
    async fn insert_user(&self, user: &NewUser) -> Result<UserId, StoreError>;

    async fn delete_users(&self, query: &UserQuery) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(age: i64, email: &str) -> User {
        NewUser::new("Test", email, age).into_user(UserId::generate())
    }

    #[test]
    fn age_predicate_is_strict() {
        let query = UserQuery::all().older_than(21);
        assert!(!query.matches(&user(21, "a@x.com")));
        assert!(query.matches(&user(22, "a@x.com")));
    }

    #[test]
    fn id_and_email_narrow_the_match() {
        let target = user(30, "a@x.com");
        let other = user(30, "b@x.com");

        let by_id = UserQuery::all().with_id(target.id);
        assert!(by_id.matches(&target));
        assert!(!by_id.matches(&other));

        let by_email = UserQuery::all().with_email("b@x.com");
        assert!(!by_email.matches(&target));
        assert!(by_email.matches(&other));
    }
}
