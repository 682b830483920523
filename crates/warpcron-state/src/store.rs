//! StateStore: redb-backed resource persistence for warpcron.
//!
//! Values are JSON-serialized into redb's `&[u8]` columns. Every committed
//! workflow or template change is also published on a broadcast feed,
//! which backs the watch streams handed to the engine.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::debug;

use warpcron_core::{EventKind, Template, WatchEvent, Workflow};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Buffered change-feed entries per subscriber before it lags.
pub const FEED_CAPACITY: usize = 256;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe resource store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    feed: broadcast::Sender<FeedEvent>,
    seq: Arc<AtomicU64>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn with_database(db: Database) -> StateResult<Self> {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let store = Self {
            db: Arc::new(db),
            feed,
            seq: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(WORKFLOWS).map_err(map_err!(Table))?;
        txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to committed workflow and template changes.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }

    fn publish(&self, environment_id: &str, change: Change) {
        // No subscribers is not an error.
        let _ = self.feed.send(FeedEvent {
            environment_id: environment_id.to_string(),
            change,
        });
    }

    // ── Workflows ──────────────────────────────────────────────────

    /// Insert or update a workflow. Returns whether it was a create or an
    /// update.
    pub fn put_workflow(&self, environment_id: &str, workflow: &Workflow) -> StateResult<EventKind> {
        let key = scoped_key(environment_id, &workflow.name);
        let existed = self.put_json(WORKFLOWS, &key, workflow)?;
        let kind = if existed { EventKind::Update } else { EventKind::Create };
        debug!(%key, ?kind, "workflow stored");
        self.publish(
            environment_id,
            Change::Workflow(WatchEvent::new(kind, epoch_millis(), workflow.clone())),
        );
        Ok(kind)
    }

    pub fn get_workflow(&self, environment_id: &str, name: &str) -> StateResult<Option<Workflow>> {
        self.get_json(WORKFLOWS, &scoped_key(environment_id, name))
    }

    /// List all workflows in an environment.
    pub fn list_workflows(&self, environment_id: &str) -> StateResult<Vec<Workflow>> {
        self.list_prefix(WORKFLOWS, &scoped_key(environment_id, ""))
    }

    /// Delete a workflow. Returns true if it existed.
    pub fn delete_workflow(&self, environment_id: &str, name: &str) -> StateResult<bool> {
        let key = scoped_key(environment_id, name);
        let removed: Option<Workflow> = self.remove_json(WORKFLOWS, &key)?;
        debug!(%key, existed = removed.is_some(), "workflow deleted");
        Ok(match removed {
            Some(workflow) => {
                self.publish(
                    environment_id,
                    Change::Workflow(WatchEvent::new(EventKind::Delete, epoch_millis(), workflow)),
                );
                true
            }
            None => false,
        })
    }

    // ── Templates ──────────────────────────────────────────────────

    /// Insert or update a template under its internal name.
    pub fn put_template(&self, environment_id: &str, template: &Template) -> StateResult<EventKind> {
        let key = scoped_key(environment_id, &template.name);
        let existed = self.put_json(TEMPLATES, &key, template)?;
        let kind = if existed { EventKind::Update } else { EventKind::Create };
        debug!(%key, ?kind, "template stored");
        self.publish(
            environment_id,
            Change::Template(WatchEvent::new(kind, epoch_millis(), template.clone())),
        );
        Ok(kind)
    }

    pub fn get_template(&self, environment_id: &str, name: &str) -> StateResult<Option<Template>> {
        self.get_json(TEMPLATES, &scoped_key(environment_id, name))
    }

    pub fn list_templates(&self, environment_id: &str) -> StateResult<Vec<Template>> {
        self.list_prefix(TEMPLATES, &scoped_key(environment_id, ""))
    }

    pub fn delete_template(&self, environment_id: &str, name: &str) -> StateResult<bool> {
        let key = scoped_key(environment_id, name);
        let removed: Option<Template> = self.remove_json(TEMPLATES, &key)?;
        debug!(%key, existed = removed.is_some(), "template deleted");
        Ok(match removed {
            Some(template) => {
                self.publish(
                    environment_id,
                    Change::Template(WatchEvent::new(EventKind::Delete, epoch_millis(), template)),
                );
                true
            }
            None => false,
        })
    }

    // ── Executions ─────────────────────────────────────────────────

    pub fn put_execution(&self, record: &ExecutionRecord) -> StateResult<()> {
        self.put_json(EXECUTIONS, &record.table_key(), record)?;
        Ok(())
    }

    /// List all executions recorded for a workflow, oldest first.
    pub fn list_executions_for_workflow(&self, workflow: &str) -> StateResult<Vec<ExecutionRecord>> {
        let mut records: Vec<ExecutionRecord> =
            self.list_prefix(EXECUTIONS, &format!("{workflow}:"))?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    /// Allocate a unique execution id.
    pub fn next_execution_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        format!("exec-{}-{seq}", epoch_millis())
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Write a value. Returns true if the key already existed.
    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<bool> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?
                .is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_prefix<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    /// Remove a key, returning the value it held.
    fn remove_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            removed = match table.remove(key).map_err(map_err!(Write))? {
                Some(guard) => Some(
                    serde_json::from_slice::<T>(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }
}
