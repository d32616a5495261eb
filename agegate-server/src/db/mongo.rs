//! MongoDB backend
//!
//! The driver keeps its own connection pool; this module only builds the
//! client from the configured profile, verifies it with a ping, and turns
//! SDAM heartbeat/topology events into [`FailureSignal`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::event::sdam::SdamEvent;
use mongodb::event::EventHandler;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::store::{
    Connector, FailureSignal, IndexSpec, SignalSender, Store, StoreError, UserQuery,
    USERS_COLLECTION,
};
use crate::config::{ConnectionProfile, DatabaseConfig, DEFAULT_DATABASE};
use crate::models::{NewUser, User, UserId};

const DUPLICATE_KEY: i32 = 11000;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

/// Opens MongoDB clients for a [`DatabaseConfig`].
#[derive(Debug, Clone)]
pub struct MongoConnector {
    config: DatabaseConfig,
}

impl MongoConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for MongoConnector {
    fn address(&self) -> String {
        self.config.redacted_uri()
    }

    async fn connect(&self, signals: SignalSender) -> Result<Arc<dyn Store>, StoreError> {
        let mut options = ClientOptions::parse(&self.config.uri)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        apply_profile(&mut options, &self.config.profile);

        let connected = Arc::new(AtomicBool::new(true));
        options.sdam_event_handler = Some(failure_signals(signals, Arc::clone(&connected)));

        let database_name = options
            .default_database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        let client =
            Client::with_options(options).map_err(|e| StoreError::Connection(e.to_string()))?;
        let database = client.database(&database_name);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::debug!(database = %database_name, "MongoDB client ready");
        Ok(Arc::new(MongoStore {
            client,
            database,
            connected,
        }))
    }
}

fn apply_profile(options: &mut ClientOptions, profile: &ConnectionProfile) {
    options.max_pool_size = Some(profile.max_pool_size);
    options.min_pool_size = Some(profile.min_pool_size);
    options.connect_timeout = Some(profile.connect_timeout);
    options.server_selection_timeout = Some(profile.server_selection_timeout);
    options.retry_writes = Some(profile.retry_writes);
    options.retry_reads = Some(profile.retry_reads);
    if options.app_name.is_none() {
        options.app_name = Some("agegate".to_string());
    }
}

/// Last heartbeat outcome per server.
///
/// The deployment counts as connected while any known server answered its
/// last heartbeat, so one unreachable replica set member does not mark a
/// working client as lost. With no heartbeat seen yet it is connected.
#[derive(Debug, Default)]
struct TopologyHealth {
    servers: HashMap<String, bool>,
}

impl TopologyHealth {
    fn heartbeat(&mut self, server: String, succeeded: bool) -> bool {
        self.servers.insert(server, succeeded);
        self.connected()
    }

    fn remove(&mut self, server: &str) -> bool {
        self.servers.remove(server);
        self.connected()
    }

    fn connected(&self) -> bool {
        self.servers.is_empty() || self.servers.values().any(|up| *up)
    }
}

/// Bridge driver monitoring events to the connection manager.
fn failure_signals(signals: SignalSender, connected: Arc<AtomicBool>) -> EventHandler<SdamEvent> {
    let health = Mutex::new(TopologyHealth::default());
    EventHandler::callback(move |event: SdamEvent| match event {
        SdamEvent::ServerHeartbeatSucceeded(event) => {
            let up = health.lock().heartbeat(event.server_address.to_string(), true);
            connected.store(up, Ordering::SeqCst);
        }
        SdamEvent::ServerHeartbeatFailed(event) => {
            tracing::warn!(
                server = %event.server_address,
                failure = %event.failure,
                "MongoDB heartbeat failed"
            );
            let up = health.lock().heartbeat(event.server_address.to_string(), false);
            connected.store(up, Ordering::SeqCst);
            let _ = signals.send(FailureSignal::HeartbeatFailed);
        }
        SdamEvent::ServerClosed(event) => {
            let up = health.lock().remove(&event.address.to_string());
            connected.store(up, Ordering::SeqCst);
        }
        SdamEvent::TopologyClosed(_) => {
            connected.store(false, Ordering::SeqCst);
            let _ = signals.send(FailureSignal::ConnectionClosed);
        }
        _ => {}
    })
}

/// Live MongoDB handle.
pub struct MongoStore {
    client: Client,
    database: Database,
    connected: Arc<AtomicBool>,
}

impl MongoStore {
    fn users(&self) -> Collection<Document> {
        self.database.collection(USERS_COLLECTION)
    }
}

#[async_trait]
impl Store for MongoStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(store_error)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.connected.store(false, Ordering::SeqCst);
        self.client.clone().shutdown().immediate(true).await;
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.database
            .list_collection_names()
            .await
            .map_err(store_error)
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        self.database
            .create_collection(name)
            .await
            .map_err(store_error)
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let mut keys = Document::new();
        keys.insert(index.field, 1i32);

        let options = IndexOptions::builder()
            .name(index.name.to_string())
            .unique(index.unique)
            .sparse(index.sparse)
            .build();
        let model = IndexModel::builder().keys(keys).options(options).build();

        self.database
            .collection::<Document>(collection)
            .create_index(model)
            .await
            .map(|_| ())
            .map_err(|err| match err.kind.as_ref() {
                ErrorKind::Command(command)
                    if command.code == INDEX_OPTIONS_CONFLICT
                        || command.code == INDEX_KEY_SPECS_CONFLICT =>
                {
                    StoreError::IndexConflict {
                        name: index.name.to_string(),
                        reason: command.message.clone(),
                    }
                }
                _ => store_error(err),
            })
    }

    async fn find_one_user(&self, query: &UserQuery) -> Result<Option<User>, StoreError> {
        self.users()
            .find_one(filter_document(query))
            .await
            .map_err(store_error)?
            .map(user_from_document)
            .transpose()
    }

    async fn find_users(&self, query: &UserQuery, limit: u32) -> Result<Vec<User>, StoreError> {
        let cursor = self
            .users()
            .find(filter_document(query))
            .sort(doc! { "age": 1 })
            .limit(i64::from(limit))
            .await
            .map_err(store_error)?;

        let documents: Vec<Document> = cursor.try_collect().await.map_err(store_error)?;
        Ok(users_from_documents(documents))
    }

    async fn count_users(&self, query: &UserQuery) -> Result<u64, StoreError> {
        self.users()
            .count_documents(filter_document(query))
            .await
            .map_err(store_error)
    }

    async fn insert_user(&self, user: &NewUser) -> Result<UserId, StoreError> {
        let result = self
            .users()
            .insert_one(user_document(user)?)
            .await
            .map_err(store_error)?;

        result
            .inserted_id
            .as_object_id()
            .map(UserId::from)
            .ok_or_else(|| StoreError::Document(format!("unexpected id {}", result.inserted_id)))
    }

    async fn delete_users(&self, query: &UserQuery) -> Result<u64, StoreError> {
        self.users()
            .delete_many(filter_document(query))
            .await
            .map(|result| result.deleted_count)
            .map_err(store_error)
    }
}

fn store_error(err: mongodb::error::Error) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
            StoreError::DuplicateKey(write.message.clone())
        }
        ErrorKind::Command(command) if command.code == DUPLICATE_KEY => {
            StoreError::DuplicateKey(command.message.clone())
        }
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
            StoreError::Connection(err.to_string())
        }
        _ => StoreError::Query(err.to_string()),
    }
}

/// Render a [`UserQuery`] as a MongoDB filter.
pub(crate) fn filter_document(query: &UserQuery) -> Document {
    let mut filter = Document::new();
    if let Some(id) = query.id {
        filter.insert("_id", id.object_id());
    }
    if let Some(age) = query.older_than {
        filter.insert("age", doc! { "$gt": age });
    }
    if let Some(email) = &query.email {
        filter.insert("email", email.as_str());
    }
    filter
}

fn user_document(user: &NewUser) -> Result<Document, StoreError> {
    let mut document = doc! {
        "name": user.name.as_str(),
        "email": user.email.as_str(),
        "age": user.age,
    };
    for (key, value) in &user.extra {
        let value =
            mongodb::bson::to_bson(value).map_err(|e| StoreError::Document(e.to_string()))?;
        document.insert(key.as_str(), value);
    }
    Ok(document)
}

/// Convert a page of documents, skipping malformed records.
fn users_from_documents(documents: Vec<Document>) -> Vec<User> {
    documents
        .into_iter()
        .filter_map(|document| match user_from_document(document) {
            Ok(user) => Some(user),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping malformed user document");
                None
            }
        })
        .collect()
}

fn user_from_document(mut document: Document) -> Result<User, StoreError> {
    let id = match document.remove("_id") {
        Some(Bson::ObjectId(oid)) => UserId::from(oid),
        other => return Err(StoreError::Document(format!("unexpected _id: {:?}", other))),
    };
    let name = take_str(&mut document, "name")?;
    let email = take_str(&mut document, "email")?;
    let age = match document.remove("age") {
        Some(Bson::Int32(age)) => i64::from(age),
        Some(Bson::Int64(age)) => age,
        Some(Bson::Double(age)) if age.fract() == 0.0 => age as i64,
        other => return Err(StoreError::Document(format!("unexpected age: {:?}", other))),
    };
    let extra: Map<String, Value> = document
        .into_iter()
        .map(|(key, value)| (key, value.into_relaxed_extjson()))
        .collect();

    Ok(User {
        id,
        name,
        email,
        age,
        extra,
    })
}

fn take_str(document: &mut Document, field: &str) -> Result<String, StoreError> {
    match document.remove(field) {
        Some(Bson::String(value)) => Ok(value),
        other => Err(StoreError::Document(format!(
            "unexpected {}: {:?}",
            field, other
        ))),
    }
}
