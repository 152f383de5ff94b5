#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use threadline_db::{
    Database, DocPath, Document, DocumentListener, ListenerRegistration, Query, QueryListener,
    Source, StoreError, StoreGateway, Transaction, TransactionBody, WriteOp,
};
use threadline_sync::{AuthState, Services, ThreadlineClient};
use threadline_types::models::PrincipalId;

type Hook = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Wraps a gateway and fails chosen operations on demand.
pub struct FaultyStore {
    inner: Arc<dyn StoreGateway>,
    fail_reads: AtomicBool,
    /// Writes touching a path with this prefix fail.
    fail_writes_under: Mutex<Option<String>>,
    before_next_call: Mutex<Option<Hook>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn StoreGateway>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes_under: Mutex::new(None),
            before_next_call: Mutex::new(None),
        }
    }

    /// Run `hook` to completion before the next store call goes through.
    pub fn before_next_call<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.before_next_call.lock().unwrap() = Some(Box::new(move || Box::pin(hook())));
    }

    async fn run_hook(&self) {
        let hook = self.before_next_call.lock().unwrap().take();
        if let Some(hook) = hook {
            hook().await;
        }
    }

    fn write_blocked(&self, ops: &[WriteOp]) -> bool {
        let prefix = self.fail_writes_under.lock().unwrap().clone();
        prefix.is_some_and(|prefix| ops.iter().any(|op| op.path().as_str().starts_with(&prefix)))
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes_under(&self, prefix: Option<&str>) {
        *self.fail_writes_under.lock().unwrap() = prefix.map(str::to_string);
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("injected fault".into())
    }
}

#[async_trait]
impl StoreGateway for FaultyStore {
    fn new_document_id(&self) -> String {
        self.inner.new_document_id()
    }

    async fn get(&self, path: &DocPath, source: Source) -> Result<Option<Document>, StoreError> {
        self.run_hook().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.get(path, source).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.run_hook().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.query(query).await
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.run_hook().await;
        if self.write_blocked(&ops) {
            return Err(Self::unavailable());
        }
        self.inner.batch_write(ops).await
    }

    async fn transaction(&self, mut body: TransactionBody) -> Result<(), StoreError> {
        self.run_hook().await;
        let prefix = self.fail_writes_under.lock().unwrap().clone();
        self.inner
            .transaction(Box::new(move |tx: &mut Transaction<'_>| {
                body(tx)?;
                let blocked = prefix.as_deref().is_some_and(|prefix| {
                    tx.writes().iter().any(|op| op.path().as_str().starts_with(prefix))
                });
                if blocked {
                    return Err(Self::unavailable());
                }
                Ok(())
            }))
            .await
    }

    fn subscribe_query(
        &self,
        query: Query,
        listener: QueryListener,
    ) -> Result<ListenerRegistration, StoreError> {
        self.inner.subscribe_query(query, listener)
    }

    fn subscribe_document(
        &self,
        path: DocPath,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration, StoreError> {
        self.inner.subscribe_document(path, listener)
    }
}

pub fn database() -> Arc<Database> {
    Arc::new(Database::open_in_memory().unwrap())
}

/// A client for `principal` going through the store's access rules.
pub fn client(db: &Arc<Database>, principal: &str) -> ThreadlineClient {
    let store: Arc<dyn StoreGateway> = Arc::new(db.scoped(principal));
    ThreadlineClient::new(
        Services::new(store),
        Arc::new(AuthState::signed_in(PrincipalId::new(principal))),
    )
}

pub fn principal(id: &str) -> PrincipalId {
    PrincipalId::new(id)
}
