//! User repository
//!
//! Every read goes through the age-visibility rule:
//! - lookups by id only see `age > VISIBILITY_THRESHOLD`
//! - list and count see `age > min_age`
//!
//! Email uniqueness is pre-checked before insert; the unique index turns
//! a lost race into a duplicate-key error, reported as a conflict too.

use std::sync::Arc;

use serde_json::Value;

use crate::db::connection::{ConnectionError, ConnectionManager};
use crate::db::store::{Store, StoreError, UserQuery};
use crate::models::{AgeFilter, NewUser, User, UserId, ValidationError, VISIBILITY_THRESHOLD};

/// Repository error type
#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("{0}")]
    InvalidId(ValidationError),

    #[error("{0}")]
    Validation(ValidationError),

    #[error("User with email '{email}' already exists")]
    Conflict { email: String },

    #[error("database error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// User repository
#[derive(Clone)]
pub struct UserRepo {
    db: Arc<ConnectionManager>,
}

impl UserRepo {
    pub fn new(db: Arc<ConnectionManager>) -> Self {
        Self { db }
    }

    fn store(&self) -> Result<Arc<dyn Store>, UserError> {
        Ok(self.db.handle()?)
    }

    /// Find a visible user by id.
    ///
    /// Malformed ids fail before any store access; users at or below the
    /// visibility threshold come back as `None`.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>, UserError> {
        let id = UserId::parse(id).map_err(UserError::InvalidId)?;
        let query = UserQuery::all().with_id(id).older_than(VISIBILITY_THRESHOLD);

        self.store()?
            .find_one_user(&query)
            .await
            .map_err(|err| {
                tracing::error!(%id, error = %err, "Failed to look up user");
                UserError::Store(err)
            })
    }

    /// Users with `age > filter.min_age`, ascending by age, at most `filter.limit`.
    pub async fn find_by_age(&self, filter: AgeFilter) -> Result<Vec<User>, UserError> {
        let query = UserQuery::all().older_than(filter.min_age);
        Ok(self.store()?.find_users(&query, filter.limit).await?)
    }

    /// Number of users with `age > min_age`.
    pub async fn count_by_age(&self, min_age: i64) -> Result<u64, UserError> {
        let query = UserQuery::all().older_than(min_age);
        Ok(self.store()?.count_users(&query).await?)
    }

    /// Validate and insert a user from a raw JSON body.
    pub async fn create(&self, body: Value) -> Result<User, UserError> {
        let user = NewUser::from_json(body).map_err(UserError::Validation)?;
        self.insert(user).await
    }

    /// Insert an already-validated user.
    pub async fn insert(&self, user: NewUser) -> Result<User, UserError> {
        let store = self.store()?;

        let existing = store
            .count_users(&UserQuery::all().with_email(user.email.as_str()))
            .await?;
        if existing > 0 {
            return Err(UserError::Conflict { email: user.email });
        }

        match store.insert_user(&user).await {
            Ok(id) => {
                tracing::debug!(%id, "Created user");
                Ok(user.into_user(id))
            }
            Err(StoreError::DuplicateKey(reason)) => {
                tracing::warn!(email = %user.email, %reason, "Duplicate email rejected by unique index");
                Err(UserError::Conflict { email: user.email })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Replace every user with `users`.
    pub async fn seed(&self, users: Vec<NewUser>) -> Result<Vec<User>, UserError> {
        let store = self.store()?;
        let removed = store.delete_users(&UserQuery::all()).await?;
        tracing::info!(removed, "Cleared existing users");

        let mut inserted = Vec::with_capacity(users.len());
        for user in users {
            let id = store.insert_user(&user).await?;
            inserted.push(user.into_user(id));
        }
        tracing::info!(inserted = inserted.len(), "Inserted users");
        Ok(inserted)
    }
}
