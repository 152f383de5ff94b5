use std::sync::Arc;

use threadline_db::layout;
use threadline_db::{Source, StoreGateway, WriteData, WriteOp};
use threadline_types::models::{MemberRole, PrincipalId, ThreadId};
use tracing::{debug, info, warn};

use crate::error::{SyncError, require_principal, require_thread_id};
use crate::views;

#[derive(Clone)]
pub struct MembershipService {
    store: Arc<dyn StoreGateway>,
}

impl MembershipService {
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        Self { store }
    }

    /// Join a thread. Joining twice keeps the original record.
    pub async fn join(
        &self,
        thread_id: &ThreadId,
        principal: Option<&PrincipalId>,
    ) -> Result<(), SyncError> {
        let principal = require_principal(principal)?;
        require_thread_id(thread_id)?;

        let thread_path = layout::thread(thread_id.as_str())?;
        let Some(thread) = self.store.get(&thread_path, Source::Server).await? else {
            return Err(SyncError::NotFound(format!("thread {}", thread_id)));
        };

        let member_path = layout::member(thread_id.as_str(), principal.as_str())?;
        if self.store.get(&member_path, Source::Server).await?.is_some() {
            debug!("{} is already a member of {}", principal, thread_id);
        } else {
            self.store
                .batch_write(vec![WriteOp::set_merge(
                    member_path,
                    WriteData::new()
                        .with("role", MemberRole::Member.as_str())
                        .with_server_timestamp("joinedAt"),
                )])
                .await?;
            info!("{} joined thread {}", principal, thread_id);
        }

        // Best effort: the thread list works without it.
        let stub = layout::mirror_row(principal.as_str(), thread_id.as_str()).map(|row| {
            WriteOp::set_merge(row, views::index_row_data(&thread))
        });
        let seeded = match stub {
            Ok(op) => self.store.batch_write(vec![op]).await,
            Err(e) => Err(e),
        };
        if let Err(e) = seeded {
            warn!("Mirror row for {} in {} not written: {}", principal, thread_id, e);
        }
        Ok(())
    }

    /// Leave a thread. Leaving a thread one is not in succeeds.
    pub async fn leave(
        &self,
        thread_id: &ThreadId,
        principal: Option<&PrincipalId>,
    ) -> Result<(), SyncError> {
        let principal = require_principal(principal)?;
        require_thread_id(thread_id)?;

        self.store
            .batch_write(vec![
                WriteOp::delete(layout::member(thread_id.as_str(), principal.as_str())?),
                WriteOp::delete(layout::mirror_row(principal.as_str(), thread_id.as_str())?),
            ])
            .await?;
        info!("{} left thread {}", principal, thread_id);
        Ok(())
    }

    /// Authoritative membership check. Any failure reads as "not a member".
    pub async fn is_member(&self, thread_id: &ThreadId, principal: Option<&PrincipalId>) -> bool {
        let Ok(principal) = require_principal(principal) else {
            warn!("Membership check for {} without a principal", thread_id);
            return false;
        };
        let path = match layout::member(thread_id.as_str(), principal.as_str()) {
            Ok(path) => path,
            Err(e) => {
                warn!("Membership check for {} in {:?} failed: {}", principal, thread_id.as_str(), e);
                return false;
            }
        };

        match self.store.get(&path, Source::Server).await {
            Ok(doc) => doc.is_some(),
            Err(e) => {
                warn!("Membership check for {} in {} failed: {}", principal, thread_id, e);
                false
            }
        }
    }
}
