//! In-memory store backend
//!
//! Backs tests and `agegate serve --in-memory`. Data lives in the connector
//! and outlives individual handles, so reconnecting keeps every record,
//! the way a real server does. The connector also exposes knobs to inject
//! connection, ping and close failures and to fire failure signals.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use super::store::{
    Connector, FailureSignal, IndexSpec, SignalSender, Store, StoreError, UserQuery,
    USERS_COLLECTION,
};
use crate::models::{NewUser, User, UserId};

#[derive(Default)]
struct MemoryData {
    collections: HashSet<String>,
    indexes: HashMap<String, Vec<IndexSpec>>,
    users: Vec<User>,
}

impl MemoryData {
    fn unique_violation(&self, candidate: &User) -> Option<&'static str> {
        let indexes = self.indexes.get(USERS_COLLECTION)?;
        indexes.iter().filter(|index| index.unique).find_map(|index| {
            let value = field_value(candidate, index.field)?;
            let taken = self
                .users
                .iter()
                .any(|user| field_value(user, index.field).as_ref() == Some(&value));
            taken.then_some(index.name)
        })
    }
}

fn field_value(user: &User, field: &str) -> Option<Value> {
    match field {
        "_id" => Some(Value::String(user.id.to_hex())),
        "name" => Some(Value::String(user.name.clone())),
        "email" => Some(Value::String(user.email.clone())),
        "age" => Some(Value::from(user.age)),
        other => user.extra.get(other).filter(|v| !v.is_null()).cloned(),
    }
}

#[derive(Default)]
struct Control {
    fail_next: u32,
    connect_delay: Duration,
    attempts: Vec<Instant>,
    /// Signal sender and connected flag of the newest handle
    current: Option<(SignalSender, Arc<AtomicBool>)>,
}

struct ConnectorInner {
    data: Arc<Mutex<MemoryData>>,
    control: Mutex<Control>,
    ping_fails: Arc<AtomicBool>,
    close_fails: Arc<AtomicBool>,
}

/// Connector for the in-memory backend.
///
/// Clones share data and controls.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<ConnectorInner>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                data: Arc::new(Mutex::new(MemoryData::default())),
                control: Mutex::new(Control::default()),
                ping_fails: Arc::new(AtomicBool::new(false)),
                close_fails: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.control.lock().fail_next = n;
    }

    /// Delay every connection attempt (simulates a slow handshake).
    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner.control.lock().connect_delay = delay;
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.control.lock().attempts.len()
    }

    /// Instants at which connection attempts started
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.inner.control.lock().attempts.clone()
    }

    /// Mark the newest handle's transport as (dis)connected.
    pub fn set_connected(&self, connected: bool) {
        if let Some((_, flag)) = &self.inner.control.lock().current {
            flag.store(connected, Ordering::SeqCst);
        }
    }

    /// Fire a failure signal from the newest handle.
    pub fn emit(&self, signal: FailureSignal) {
        if let Some((sender, _)) = &self.inner.control.lock().current {
            let _ = sender.send(signal);
        }
    }

    pub fn set_ping_failure(&self, fail: bool) {
        self.inner.ping_fails.store(fail, Ordering::SeqCst);
    }

    pub fn set_close_failure(&self, fail: bool) {
        self.inner.close_fails.store(fail, Ordering::SeqCst);
    }

    /// Open a handle directly, outside any connection manager.
    pub fn store(&self) -> MemoryStore {
        MemoryStore {
            data: Arc::clone(&self.inner.data),
            connected: Arc::new(AtomicBool::new(true)),
            closed: AtomicBool::new(false),
            ping_fails: Arc::clone(&self.inner.ping_fails),
            close_fails: Arc::clone(&self.inner.close_fails),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn address(&self) -> String {
        "memory".to_string()
    }

    async fn connect(&self, signals: SignalSender) -> Result<Arc<dyn Store>, StoreError> {
        let delay = {
            let mut control = self.inner.control.lock();
            control.attempts.push(Instant::now());
            control.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut control = self.inner.control.lock();
        if control.fail_next > 0 {
            control.fail_next -= 1;
            return Err(StoreError::Connection("connection refused".to_string()));
        }

        let store = self.store();
        control.current = Some((signals, Arc::clone(&store.connected)));
        Ok(Arc::new(store))
    }
}

/// Handle to the in-memory backend.
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    ping_fails: Arc<AtomicBool>,
    close_fails: Arc<AtomicBool>,
}

impl MemoryStore {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("ping timed out".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.close_fails.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("error while closing".to_string()));
        }
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;
        let mut names: Vec<String> = self.data.lock().collections.iter().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut data = self.data.lock();
        if !data.collections.insert(name.to_string()) {
            return Err(StoreError::Query(format!("collection '{}' already exists", name)));
        }
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut data = self.data.lock();
        data.collections.insert(collection.to_string());
        let indexes = data.indexes.entry(collection.to_string()).or_default();

        if let Some(existing) = indexes
            .iter()
            .find(|i| i.name == index.name || i.field == index.field)
        {
            if existing == index {
                return Ok(());
            }
            return Err(StoreError::IndexConflict {
                name: index.name.to_string(),
                reason: format!("existing index '{}' has different options", existing.name),
            });
        }

        indexes.push(*index);
        Ok(())
    }

    async fn find_one_user(&self, query: &UserQuery) -> Result<Option<User>, StoreError> {
        self.ensure_open()?;
        let data = self.data.lock();
        Ok(data.users.iter().find(|u| query.matches(u)).cloned())
    }

    async fn find_users(&self, query: &UserQuery, limit: u32) -> Result<Vec<User>, StoreError> {
        self.ensure_open()?;
        let data = self.data.lock();
        let mut users: Vec<User> = data.users.iter().filter(|u| query.matches(u)).cloned().collect();
        users.sort_by_key(|u| u.age);
        users.truncate(limit as usize);
        Ok(users)
    }

    async fn count_users(&self, query: &UserQuery) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let data = self.data.lock();
        Ok(data.users.iter().filter(|u| query.matches(u)).count() as u64)
    }

    async fn insert_user(&self, user: &NewUser) -> Result<UserId, StoreError> {
        self.ensure_open()?;
        let mut data = self.data.lock();
        let id = UserId::generate();
        let record = user.clone().into_user(id);

        if let Some(index) = data.unique_violation(&record) {
            return Err(StoreError::DuplicateKey(format!(
                "E11000 duplicate key error index: {}",
                index
            )));
        }

        data.collections.insert(USERS_COLLECTION.to_string());
        data.users.push(record);
        Ok(id)
    }

    async fn delete_users(&self, query: &UserQuery) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let mut data = self.data.lock();
        let before = data.users.len();
        data.users.retain(|u| !query.matches(u));
        Ok((before - data.users.len()) as u64)
    }
}
