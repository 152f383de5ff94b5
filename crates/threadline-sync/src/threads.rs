use std::collections::BTreeSet;
use std::sync::Arc;

use threadline_db::layout::{self, Location};
use threadline_db::{Query, Source, StoreError, StoreGateway, Transaction, WriteData, WriteOp};
use threadline_types::models::{
    ChatMessage, MemberRole, MessageId, PrincipalId, ThreadId, Visibility, preview_of,
};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{SyncError, require_principal, require_thread_id};
use crate::views;

/// Outcome of a mirror index sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub upserted: usize,
    pub removed: usize,
}

#[derive(Clone)]
pub struct ThreadService {
    store: Arc<dyn StoreGateway>,
    refreshes: TaskTracker,
}

impl ThreadService {
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        Self {
            store,
            refreshes: TaskTracker::new(),
        }
    }

    /// Create a thread with the caller as its owner. Thread, owner membership
    /// and the owner's mirror row commit together with one timestamp.
    pub async fn create_thread(
        &self,
        name: &str,
        visibility: Visibility,
        principal: Option<&PrincipalId>,
    ) -> Result<ThreadId, SyncError> {
        let principal = require_principal(principal)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::InvalidArgument("thread name is blank".into()));
        }

        let thread_id = ThreadId::new(self.store.new_document_id());
        let ops = vec![
            WriteOp::set(
                layout::thread(thread_id.as_str())?,
                WriteData::new()
                    .with("name", name)
                    .with("visibility", visibility.as_str())
                    .with("createdBy", principal.as_str())
                    .with("lastMessagePreview", "")
                    .with_server_timestamp("createdAt")
                    .with_server_timestamp("lastMessageAt"),
            ),
            WriteOp::set(
                layout::member(thread_id.as_str(), principal.as_str())?,
                WriteData::new()
                    .with("role", MemberRole::Owner.as_str())
                    .with_server_timestamp("joinedAt"),
            ),
            WriteOp::set(
                layout::mirror_row(principal.as_str(), thread_id.as_str())?,
                WriteData::new()
                    .with("name", name)
                    .with("lastMessagePreview", "")
                    .with_server_timestamp("lastMessageAt"),
            ),
        ];
        self.store.batch_write(ops).await?;

        info!("Thread {} ({:?}) created by {}", thread_id, name, principal);
        Ok(thread_id)
    }

    /// Append a message and move the thread's recency fields in one
    /// transaction. The sender's mirror row is refreshed afterwards in the
    /// background; that refresh never fails the send.
    pub async fn send_message(
        &self,
        thread_id: &ThreadId,
        text: &str,
        principal: Option<&PrincipalId>,
    ) -> Result<MessageId, SyncError> {
        let principal = require_principal(principal)?;
        require_thread_id(thread_id)?;
        if text.trim().is_empty() {
            return Err(SyncError::InvalidArgument("message text is blank".into()));
        }

        let message_id = MessageId::new(self.store.new_document_id());
        let thread_path = layout::thread(thread_id.as_str())?;
        let message_path = layout::message(thread_id.as_str(), message_id.as_str())?;
        let preview = preview_of(text);

        let sender = principal.to_string();
        let text = text.to_string();
        let missing = format!("thread {}", thread_id);
        self.store
            .transaction(Box::new(move |tx: &mut Transaction<'_>| {
                if tx.get(&thread_path)?.is_none() {
                    return Err(StoreError::NotFound(missing.clone()));
                }
                tx.set(
                    message_path.clone(),
                    WriteData::new()
                        .with("senderId", sender.as_str())
                        .with("text", text.as_str())
                        .with_server_timestamp("sentAt"),
                );
                tx.update(
                    thread_path.clone(),
                    WriteData::new()
                        .with("lastMessagePreview", preview.as_str())
                        .with_server_timestamp("lastMessageAt"),
                );
                Ok(())
            }))
            .await?;

        debug!("Message {} sent to {} by {}", message_id, thread_id, principal);
        self.spawn_index_refresh(thread_id.clone(), principal.clone());
        Ok(message_id)
    }

    fn spawn_index_refresh(&self, thread_id: ThreadId, principal: PrincipalId) {
        let store = self.store.clone();
        self.refreshes.spawn(async move {
            if let Err(e) = refresh_index_row(&*store, &thread_id, &principal).await {
                warn!("Mirror row refresh for {} in {} failed: {}", principal, thread_id, e);
            }
        });
    }

    /// Wait for every background index refresh started so far.
    pub async fn wait_for_index_refreshes(&self) {
        self.refreshes.close();
        self.refreshes.wait().await;
        self.refreshes.reopen();
    }

    /// Bring a principal's mirror index in line with their memberships:
    /// upsert a row per membership, delete rows without one.
    pub async fn reconcile_index(
        &self,
        principal: Option<&PrincipalId>,
    ) -> Result<ReconcileReport, SyncError> {
        let principal = require_principal(principal)?;

        let memberships = self
            .store
            .query(&Query::collection_group(layout::MEMBERS).where_document_id(principal.as_str()))
            .await?;
        let member_of: BTreeSet<String> = memberships
            .iter()
            .filter_map(|doc| match layout::locate(&doc.path) {
                Location::Member { thread_id, .. } => Some(thread_id.to_string()),
                _ => None,
            })
            .collect();

        let rows = self
            .store
            .query(&Query::collection(layout::mirror_rows(principal.as_str())?))
            .await?;

        let mut report = ReconcileReport::default();
        let mut ops = Vec::new();
        for row in rows.iter().filter(|row| !member_of.contains(row.id())) {
            ops.push(WriteOp::delete(row.path.clone()));
            report.removed += 1;
        }
        for thread_id in &member_of {
            let Some(thread) = self.store.get(&layout::thread(thread_id)?, Source::Server).await? else {
                warn!("{} is a member of missing thread {}", principal, thread_id);
                continue;
            };
            ops.push(WriteOp::set_merge(
                layout::mirror_row(principal.as_str(), thread_id)?,
                views::index_row_data(&thread),
            ));
            report.upserted += 1;
        }
        self.store.batch_write(ops).await?;

        info!(
            "Reconciled mirror index for {}: {} upserted, {} removed",
            principal, report.upserted, report.removed
        );
        Ok(report)
    }

    /// Reconcile every principal that has a membership or a mirror row.
    /// Needs an unrestricted store. A principal whose sweep fails is logged
    /// and skipped.
    pub async fn reconcile_all_indexes(&self) -> Result<ReconcileReport, SyncError> {
        let mut principals = BTreeSet::new();
        for doc in self.store.query(&Query::collection_group(layout::MEMBERS)).await? {
            if let Location::Member { principal, .. } = layout::locate(&doc.path) {
                principals.insert(principal.to_string());
            }
        }
        for doc in self.store.query(&Query::collection_group(layout::THREADS)).await? {
            if let Location::MirrorRow { principal, .. } = layout::locate(&doc.path) {
                principals.insert(principal.to_string());
            }
        }

        let mut total = ReconcileReport::default();
        for principal in principals.into_iter().map(PrincipalId::new) {
            match self.reconcile_index(Some(&principal)).await {
                Ok(report) => {
                    total.upserted += report.upserted;
                    total.removed += report.removed;
                }
                Err(e) => warn!("Mirror index sweep for {} failed: {}", principal, e),
            }
        }
        Ok(total)
    }

    /// One-shot read of the recent message window.
    pub async fn recent_messages(
        &self,
        thread_id: &ThreadId,
        principal: Option<&PrincipalId>,
    ) -> Result<Vec<ChatMessage>, SyncError> {
        require_principal(principal)?;
        require_thread_id(thread_id)?;

        let docs = self.store.query(&views::feed_window(thread_id)?).await?;
        Ok(docs.iter().map(views::chat_message_from).collect())
    }
}

async fn refresh_index_row(
    store: &dyn StoreGateway,
    thread_id: &ThreadId,
    principal: &PrincipalId,
) -> Result<(), SyncError> {
    let member_path = layout::member(thread_id.as_str(), principal.as_str())?;
    let thread_path = layout::thread(thread_id.as_str())?;
    let row_path = layout::mirror_row(principal.as_str(), thread_id.as_str())?;
    let missing = format!("thread {}", thread_id);
    store
        .transaction(Box::new(move |tx: &mut Transaction<'_>| {
            // Membership is read in the same transaction as the write, so a
            // leave either lands first and skips the row or removes it after.
            if tx.get(&member_path)?.is_none() {
                return Ok(());
            }
            let Some(thread) = tx.get(&thread_path)? else {
                return Err(StoreError::NotFound(missing.clone()));
            };
            tx.set_merge(row_path.clone(), views::index_row_data(&thread));
            Ok(())
        }))
        .await?;
    Ok(())
}
