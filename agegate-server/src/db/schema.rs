//! Startup schema - collections and indexes
//!
//! Safe to run on every start: existing collections are left alone and
//! creating an identical index is a no-op.

use super::store::{IndexSpec, Store, StoreError, USERS_COLLECTION};

/// Ascending age index for the visibility filter and sort
pub const AGE_INDEX: IndexSpec = IndexSpec {
    name: "idx_age",
    field: "age",
    unique: false,
    sparse: false,
};

/// Unique email index; sparse so records without an email don't collide
pub const EMAIL_INDEX: IndexSpec = IndexSpec {
    name: "idx_email",
    field: "email",
    unique: true,
    sparse: true,
};

/// Ensure the `users` collection and its indexes exist.
pub async fn ensure_schema(store: &dyn Store) -> Result<(), StoreError> {
    tracing::info!("Initializing database collections and indexes");

    let collections = store.collection_names().await?;
    if !collections.iter().any(|name| name == USERS_COLLECTION) {
        tracing::info!(collection = USERS_COLLECTION, "Creating collection");
        store.create_collection(USERS_COLLECTION).await?;
    }

    for index in [AGE_INDEX, EMAIL_INDEX] {
        tracing::debug!(index = index.name, field = index.field, "Ensuring index");
        store.create_index(USERS_COLLECTION, &index).await?;
    }

    tracing::info!("Database initialization completed");
    Ok(())
}
