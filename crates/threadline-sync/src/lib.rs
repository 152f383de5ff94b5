pub mod client;
pub mod error;
pub mod fanout;
pub mod feed_sync;
pub mod identity;
pub mod list_sync;
pub mod membership;
pub mod threads;
pub mod views;

use std::sync::Arc;

use threadline_db::StoreGateway;

pub use crate::client::ThreadlineClient;
pub use crate::error::SyncError;
pub use crate::feed_sync::ThreadFeedSync;
pub use crate::identity::{AuthState, Identity};
pub use crate::list_sync::ThreadListSync;
pub use crate::membership::MembershipService;
pub use crate::threads::{ReconcileReport, ThreadService};

/// The services over one store handle.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn StoreGateway>,
    pub membership: MembershipService,
    pub threads: ThreadService,
}

impl Services {
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        let membership = MembershipService::new(store.clone());
        let threads = ThreadService::new(store.clone());
        Self {
            store,
            membership,
            threads,
        }
    }
}
