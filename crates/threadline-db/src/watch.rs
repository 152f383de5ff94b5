use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::debug;

use crate::document::Document;
use crate::error::StoreError;
use crate::gateway::{ListenerRegistration, QueryListener};
use crate::layout::{self, Location};
use crate::path::DocPath;
use crate::query::Query;

/// One live subscription.
pub(crate) struct Watch {
    /// Principal whose access rules gate delivery; `None` is unrestricted.
    pub reader: Option<String>,
    pub query: Query,
    pub listener: QueryListener,
    pub last: Vec<Document>,
}

impl Watch {
    /// Whether any changed path can alter what this watch delivers.
    /// A scoped watch also re-evaluates when its reader's membership changes,
    /// since that can revoke read access.
    pub fn is_affected_by(&self, changed: &[DocPath]) -> bool {
        changed.iter().any(|path| {
            self.query.covers(path)
                || self
                    .reader
                    .as_deref()
                    .is_some_and(|reader| is_membership_of(path, reader))
        })
    }

    /// Deliver a fresh evaluation. Returns false when the watch must be dropped.
    pub fn deliver(&mut self, outcome: Result<Vec<Document>, StoreError>) -> bool {
        match outcome {
            Ok(docs) if docs == self.last => true,
            Ok(docs) => {
                self.last = docs.clone();
                (self.listener)(Ok(docs));
                true
            }
            Err(err) => {
                (self.listener)(Err(err));
                false
            }
        }
    }
}

fn is_membership_of(path: &DocPath, reader: &str) -> bool {
    matches!(layout::locate(path), Location::Member { principal, .. } if principal == reader)
}

#[derive(Default)]
pub(crate) struct WatchRegistry {
    next_id: AtomicU64,
    watches: Mutex<BTreeMap<u64, Watch>>,
}

impl WatchRegistry {
    /// Held across evaluation and delivery so listeners observe changes in
    /// commit order. Always taken before the connection lock.
    pub fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<u64, Watch>>, StoreError> {
        self.watches
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("watch lock poisoned: {}", e)))
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn registration(self: &Arc<Self>, id: u64) -> ListenerRegistration {
        let registry: Weak<Self> = Arc::downgrade(self);
        ListenerRegistration::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    pub fn remove(&self, id: u64) {
        if let Ok(mut watches) = self.watches.lock() {
            if watches.remove(&id).is_some() {
                debug!("Listener {} removed", id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.watches.lock().map(|w| w.len()).unwrap_or(0)
    }
}
