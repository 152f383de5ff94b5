use std::sync::Arc;

use threadline_types::models::{ChatMessage, MessageId, PrincipalId, ThreadId, Visibility};

use crate::error::SyncError;
use crate::feed_sync::ThreadFeedSync;
use crate::identity::Identity;
use crate::list_sync::ThreadListSync;
use crate::threads::ReconcileReport;
use crate::Services;

/// The services bound to whoever `identity` says is signed in.
#[derive(Clone)]
pub struct ThreadlineClient {
    services: Services,
    identity: Arc<dyn Identity>,
}

impl ThreadlineClient {
    pub fn new(services: Services, identity: Arc<dyn Identity>) -> Self {
        Self { services, identity }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn principal(&self) -> Option<PrincipalId> {
        self.identity.current_principal()
    }

    pub async fn create_thread(&self, name: &str, visibility: Visibility) -> Result<ThreadId, SyncError> {
        self.services
            .threads
            .create_thread(name, visibility, self.principal().as_ref())
            .await
    }

    pub async fn send_message(&self, thread_id: &ThreadId, text: &str) -> Result<MessageId, SyncError> {
        self.services
            .threads
            .send_message(thread_id, text, self.principal().as_ref())
            .await
    }

    pub async fn recent_messages(&self, thread_id: &ThreadId) -> Result<Vec<ChatMessage>, SyncError> {
        self.services
            .threads
            .recent_messages(thread_id, self.principal().as_ref())
            .await
    }

    pub async fn join(&self, thread_id: &ThreadId) -> Result<(), SyncError> {
        self.services
            .membership
            .join(thread_id, self.principal().as_ref())
            .await
    }

    pub async fn leave(&self, thread_id: &ThreadId) -> Result<(), SyncError> {
        self.services
            .membership
            .leave(thread_id, self.principal().as_ref())
            .await
    }

    pub async fn is_member(&self, thread_id: &ThreadId) -> bool {
        self.services
            .membership
            .is_member(thread_id, self.principal().as_ref())
            .await
    }

    pub async fn reconcile_index(&self) -> Result<ReconcileReport, SyncError> {
        self.services
            .threads
            .reconcile_index(self.principal().as_ref())
            .await
    }

    pub fn open_thread_list(&self) -> Result<ThreadListSync, SyncError> {
        ThreadListSync::open(self.services.store.clone(), self.principal().as_ref())
    }

    pub async fn open_feed(&self, thread_id: ThreadId) -> Result<ThreadFeedSync, SyncError> {
        ThreadFeedSync::open(&self.services, thread_id, self.principal().as_ref()).await
    }
}
