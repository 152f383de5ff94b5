use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::Database;
use crate::document::{Document, WriteOp};
use crate::error::StoreError;
use crate::gateway::{
    DocumentListener, ListenerRegistration, QueryListener, Source, StoreGateway, TransactionBody,
};
use crate::path::DocPath;
use crate::query::Query;

/// Adapt a document listener to the zero-or-one result of a point query.
fn single(listener: DocumentListener) -> QueryListener {
    Arc::new(move |result: Result<Vec<Document>, StoreError>| {
        listener(result.map(|docs| docs.into_iter().next()))
    })
}

fn new_document_id() -> String {
    Uuid::new_v4().to_string()
}

/// Run SQLite work on the blocking pool. It holds the connection lock and
/// may sit in `busy_timeout`.
async fn blocking<T, F>(db: &Arc<Database>, op: F) -> Result<T, StoreError>
where
    F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || op(&db))
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
}

async fn blocking_get(
    db: &Arc<Database>,
    reader: Option<String>,
    path: &DocPath,
    source: Source,
) -> Result<Option<Document>, StoreError> {
    let path = path.clone();
    blocking(db, move |db| db.get_as(reader.as_deref(), &path, source)).await
}

async fn blocking_query(
    db: &Arc<Database>,
    reader: Option<String>,
    query: &Query,
) -> Result<Vec<Document>, StoreError> {
    let query = query.clone();
    blocking(db, move |db| db.query_as(reader.as_deref(), &query)).await
}

async fn blocking_commit(
    db: &Arc<Database>,
    reader: Option<String>,
    ops: Vec<WriteOp>,
) -> Result<(), StoreError> {
    blocking(db, move |db| db.commit_as(reader.as_deref(), ops)).await
}

async fn blocking_transaction(
    db: &Arc<Database>,
    reader: Option<String>,
    mut body: TransactionBody,
) -> Result<(), StoreError> {
    blocking(db, move |db| db.transact_as(reader.as_deref(), &mut *body)).await
}

/// Unrestricted access, for trusted server-side callers.
#[derive(Clone)]
pub struct AdminStore {
    db: Arc<Database>,
}

impl AdminStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StoreGateway for AdminStore {
    fn new_document_id(&self) -> String {
        new_document_id()
    }

    async fn get(&self, path: &DocPath, source: Source) -> Result<Option<Document>, StoreError> {
        blocking_get(&self.db, None, path, source).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        blocking_query(&self.db, None, query).await
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        blocking_commit(&self.db, None, ops).await
    }

    async fn transaction(&self, body: TransactionBody) -> Result<(), StoreError> {
        blocking_transaction(&self.db, None, body).await
    }

    fn subscribe_query(
        &self,
        query: Query,
        listener: QueryListener,
    ) -> Result<ListenerRegistration, StoreError> {
        self.db.subscribe_as(None, query, listener)
    }

    fn subscribe_document(
        &self,
        path: DocPath,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration, StoreError> {
        self.db.subscribe_as(None, Query::document(&path), single(listener))
    }
}

/// One principal's view of the store. Every operation is checked against
/// the access rules; a live subscription that loses access receives one
/// `PermissionDenied` and stops.
#[derive(Clone)]
pub struct ScopedStore {
    db: Arc<Database>,
    principal: String,
}

impl ScopedStore {
    pub fn new(db: Arc<Database>, principal: impl Into<String>) -> Self {
        Self {
            db,
            principal: principal.into(),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    fn reader(&self) -> Option<String> {
        Some(self.principal.clone())
    }
}

#[async_trait]
impl StoreGateway for ScopedStore {
    fn new_document_id(&self) -> String {
        new_document_id()
    }

    async fn get(&self, path: &DocPath, source: Source) -> Result<Option<Document>, StoreError> {
        blocking_get(&self.db, self.reader(), path, source).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        blocking_query(&self.db, self.reader(), query).await
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        blocking_commit(&self.db, self.reader(), ops).await
    }

    async fn transaction(&self, body: TransactionBody) -> Result<(), StoreError> {
        blocking_transaction(&self.db, self.reader(), body).await
    }

    fn subscribe_query(
        &self,
        query: Query,
        listener: QueryListener,
    ) -> Result<ListenerRegistration, StoreError> {
        self.db.subscribe_as(Some(&self.principal), query, listener)
    }

    fn subscribe_document(
        &self,
        path: DocPath,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration, StoreError> {
        self.db
            .subscribe_as(Some(&self.principal), Query::document(&path), single(listener))
    }
}
