pub mod clock;
pub mod document;
pub mod error;
pub mod gateway;
pub mod layout;
pub mod migrations;
pub mod models;
pub mod path;
pub mod queries;
pub mod query;
mod rules;
pub mod store;
mod watch;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

use crate::clock::{Clock, CommitClock, SystemClock};
use crate::watch::WatchRegistry;

pub use crate::document::{Document, FieldValue, Fields, WriteData, WriteOp};
pub use crate::error::StoreError;
pub use crate::gateway::{
    DocumentListener, ListenerRegistration, QueryListener, Source, StoreGateway, Transaction,
    TransactionBody, TransactionFn,
};
pub use crate::path::{CollectionPath, DocPath};
pub use crate::query::{Direction, Query};
pub use crate::store::{AdminStore, ScopedStore};

/// SQLite-backed document store with live query subscriptions.
pub struct Database {
    conn: Mutex<Connection>,
    clock: CommitClock,
    /// Last observed state of point reads, served for `Source::Cache`.
    cache: Mutex<HashMap<DocPath, Option<Document>>>,
    watches: Arc<WatchRegistry>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            clock: CommitClock::new(Box::new(SystemClock)),
            cache: Mutex::new(HashMap::new()),
            watches: Arc::new(WatchRegistry::default()),
        }
    }

    /// Replace the commit-time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = CommitClock::new(Box::new(clock));
        self
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("DB lock poisoned: {}", e)))?;
        f(&conn)
    }

    pub(crate) fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("DB lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.watches.len()
    }

    /// A handle with no access rules, for trusted server-side callers.
    pub fn admin(self: &Arc<Self>) -> AdminStore {
        AdminStore::new(self.clone())
    }

    /// A handle that applies access rules for `principal` to every operation.
    pub fn scoped(self: &Arc<Self>, principal: impl Into<String>) -> ScopedStore {
        ScopedStore::new(self.clone(), principal)
    }
}
