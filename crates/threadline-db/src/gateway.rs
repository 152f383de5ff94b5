use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::document::{Document, WriteData, WriteOp};
use crate::error::StoreError;
use crate::path::DocPath;
use crate::query::Query;

/// Where a point read may be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A previously read copy is acceptable.
    Cache,
    /// Always read the committed state.
    Server,
}

/// Receives the full result set of a query on every change.
pub type QueryListener = Arc<dyn Fn(Result<Vec<Document>, StoreError>) + Send + Sync>;

/// Receives the current state of one document on every change.
pub type DocumentListener = Arc<dyn Fn(Result<Option<Document>, StoreError>) + Send + Sync>;

/// Transaction body. May run more than once if the store retries.
pub type TransactionFn = dyn FnMut(&mut Transaction<'_>) -> Result<(), StoreError> + Send;

/// Owned so the store can run it off the async runtime.
pub type TransactionBody = Box<TransactionFn>;

/// Handle to a live subscription. Cancelling (or dropping) it stops further
/// notifications; writes already in flight are unaffected.
pub struct ListenerRegistration {
    canceller: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerRegistration {
    pub fn new(canceller: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            canceller: Some(Box::new(canceller)),
        }
    }

    pub fn cancel(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(cancel) = self.canceller.take() {
            cancel();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.canceller.is_some())
            .finish()
    }
}

/// Committed-state reads available to a transaction body.
pub trait TransactionReader {
    fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;
}

/// Reads see committed state; writes are buffered and applied atomically
/// when the body returns `Ok`.
pub struct Transaction<'a> {
    reader: &'a dyn TransactionReader,
    writes: Vec<WriteOp>,
}

impl<'a> Transaction<'a> {
    pub fn new(reader: &'a dyn TransactionReader) -> Self {
        Self {
            reader,
            writes: Vec::new(),
        }
    }

    pub fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        self.reader.get(path)
    }

    pub fn set(&mut self, path: DocPath, data: WriteData) {
        self.writes.push(WriteOp::set(path, data));
    }

    pub fn set_merge(&mut self, path: DocPath, data: WriteData) {
        self.writes.push(WriteOp::set_merge(path, data));
    }

    pub fn update(&mut self, path: DocPath, data: WriteData) {
        self.writes.push(WriteOp::update(path, data));
    }

    /// Writes buffered so far.
    pub fn writes(&self) -> &[WriteOp] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<WriteOp> {
        self.writes
    }
}

/// The document store as seen by the sync layer.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// A fresh opaque id for a document the caller is about to create.
    fn new_document_id(&self) -> String;

    async fn get(&self, path: &DocPath, source: Source) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// All-or-nothing.
    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Run `body` atomically, retrying on write conflicts.
    async fn transaction(&self, body: TransactionBody) -> Result<(), StoreError>;

    /// Deliver the query's result set now and after every change that
    /// affects it. An error ends the subscription.
    fn subscribe_query(
        &self,
        query: Query,
        listener: QueryListener,
    ) -> Result<ListenerRegistration, StoreError>;

    /// Deliver the document now and after every change to it. An error ends
    /// the subscription.
    fn subscribe_document(
        &self,
        path: DocPath,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn registration_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registration = ListenerRegistration::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registration.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_registration_cancels() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        {
            let _registration = ListenerRegistration::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
