//! Live, recency-ordered list of a principal's threads.
//!
//! The session subscribes to the principal's membership set and keeps one
//! thread-document subscription per membership. All state lives in one task;
//! store callbacks and caller requests reach it over channels.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use threadline_db::layout::{self, Location};
use threadline_db::{
    Document, DocumentListener, ListenerRegistration, Query, QueryListener, StoreError,
    StoreGateway,
};
use threadline_types::models::{PrincipalId, ThreadId, ThreadItem};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{SyncError, require_principal};
use crate::fanout::{Cancel, DerivedSubscriptions, SetDiff};
use crate::views;

/// Rows keyed by thread, plus the per-thread subscriptions backing them.
pub struct ThreadListState<H: Cancel> {
    subscriptions: DerivedSubscriptions<ThreadId, H>,
    rows: BTreeMap<ThreadId, ThreadItem>,
}

impl<H: Cancel> Default for ThreadListState<H> {
    fn default() -> Self {
        Self {
            subscriptions: DerivedSubscriptions::new(),
            rows: BTreeMap::new(),
        }
    }
}

impl<H: Cancel> ThreadListState<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new membership set. Rows of threads that left the set are
    /// dropped immediately.
    pub fn apply_memberships<F>(&mut self, member_of: &BTreeSet<ThreadId>, attach: F) -> SetDiff<ThreadId>
    where
        F: FnMut(&ThreadId, u64) -> Option<H>,
    {
        let diff = self.subscriptions.reconcile(member_of, attach);
        for thread_id in &diff.to_detach {
            self.rows.remove(thread_id);
        }
        diff
    }

    /// Apply a thread snapshot. Returns whether the rows changed; snapshots
    /// from a detached subscription are ignored.
    pub fn apply_thread(&mut self, thread_id: &ThreadId, generation: u64, item: Option<ThreadItem>) -> bool {
        if !self.subscriptions.is_current(thread_id, generation) {
            return false;
        }
        match item {
            Some(item) => self.rows.insert(thread_id.clone(), item.clone()) != Some(item),
            None => self.rows.remove(thread_id).is_some(),
        }
    }

    /// A thread subscription died. Drop its registration and row so the next
    /// membership snapshot attaches it again. Returns whether the rows
    /// changed; errors from a detached subscription are ignored.
    pub fn end_thread(&mut self, thread_id: &ThreadId, generation: u64) -> bool {
        if !self.subscriptions.is_current(thread_id, generation) {
            return false;
        }
        self.subscriptions.detach(thread_id);
        self.rows.remove(thread_id).is_some()
    }

    /// Most recent activity first; ties by id.
    pub fn items(&self) -> Vec<ThreadItem> {
        let mut items: Vec<ThreadItem> = self.rows.values().cloned().collect();
        items.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        items
    }

    pub fn attached(&self) -> BTreeSet<ThreadId> {
        self.subscriptions.keys().cloned().collect()
    }

    pub fn close(&mut self) {
        self.subscriptions.detach_all();
        self.rows.clear();
    }
}

enum ListEvent {
    Memberships(Result<Vec<Document>, StoreError>),
    Thread {
        thread_id: ThreadId,
        generation: u64,
        result: Result<Option<Document>, StoreError>,
    },
}

enum ListCommand {
    Items(oneshot::Sender<Vec<ThreadItem>>),
    Attached(oneshot::Sender<BTreeSet<ThreadId>>),
    Close(oneshot::Sender<()>),
}

/// Handle to a running thread-list session. Dropping it closes the session.
pub struct ThreadListSync {
    principal: PrincipalId,
    view: watch::Receiver<Vec<ThreadItem>>,
    commands: mpsc::Sender<ListCommand>,
}

impl ThreadListSync {
    pub fn open(
        store: Arc<dyn StoreGateway>,
        principal: Option<&PrincipalId>,
    ) -> Result<Self, SyncError> {
        let principal = require_principal(principal)?.clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (view_tx, view_rx) = watch::channel(Vec::new());

        let listener: QueryListener = {
            let events = events_tx.clone();
            Arc::new(move |result: Result<Vec<Document>, StoreError>| {
                let _ = events.send(ListEvent::Memberships(result));
            })
        };
        let memberships = store.subscribe_query(
            Query::collection_group(layout::MEMBERS).where_document_id(principal.as_str()),
            listener,
        )?;

        let session = ListSession {
            store,
            principal: principal.clone(),
            events: events_tx,
            memberships: Some(memberships),
            state: ThreadListState::new(),
            view: view_tx,
        };
        tokio::spawn(session.run(events_rx, commands_rx));

        info!("Thread list opened for {}", principal);
        Ok(Self {
            principal,
            view: view_rx,
            commands: commands_tx,
        })
    }

    pub fn principal(&self) -> &PrincipalId {
        &self.principal
    }

    /// Observe the ordered rows.
    pub fn view(&self) -> watch::Receiver<Vec<ThreadItem>> {
        self.view.clone()
    }

    /// Current rows, after every change already delivered by the store.
    pub async fn items(&self) -> Vec<ThreadItem> {
        match self.request(ListCommand::Items).await {
            Some(items) => items,
            None => self.view.borrow().clone(),
        }
    }

    /// Threads with a live metadata subscription.
    pub async fn attached_threads(&self) -> BTreeSet<ThreadId> {
        self.request(ListCommand::Attached).await.unwrap_or_default()
    }

    /// Tear down every subscription. Safe to call more than once.
    pub async fn close(&self) {
        let _ = self.request(ListCommand::Close).await;
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ListCommand) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(command(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}

struct ListSession {
    store: Arc<dyn StoreGateway>,
    principal: PrincipalId,
    events: mpsc::UnboundedSender<ListEvent>,
    memberships: Option<ListenerRegistration>,
    state: ThreadListState<ListenerRegistration>,
    view: watch::Sender<Vec<ThreadItem>>,
}

impl ListSession {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ListEvent>,
        mut commands: mpsc::Receiver<ListCommand>,
    ) {
        loop {
            tokio::select! {
                // Drain store notifications before answering a request.
                biased;

                Some(event) = events.recv() => self.handle_event(event),

                command = commands.recv() => match command {
                    Some(ListCommand::Items(reply)) => {
                        let _ = reply.send(self.state.items());
                    }
                    Some(ListCommand::Attached(reply)) => {
                        let _ = reply.send(self.state.attached());
                    }
                    Some(ListCommand::Close(reply)) => {
                        self.close();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.close();
                        break;
                    }
                },
            }
        }
    }

    fn handle_event(&mut self, event: ListEvent) {
        match event {
            ListEvent::Memberships(Ok(docs)) => {
                let member_of: BTreeSet<ThreadId> = docs
                    .iter()
                    .filter_map(|doc| match layout::locate(&doc.path) {
                        Location::Member { thread_id, .. } => Some(ThreadId::new(thread_id)),
                        _ => None,
                    })
                    .collect();

                let store = &self.store;
                let events = &self.events;
                let diff = self.state.apply_memberships(&member_of, |thread_id, generation| {
                    attach_thread(store.as_ref(), events, thread_id, generation)
                });
                if !diff.is_empty() {
                    debug!(
                        "Thread list for {}: +{} -{}",
                        self.principal,
                        diff.to_attach.len(),
                        diff.to_detach.len()
                    );
                }
                self.publish();
            }
            ListEvent::Memberships(Err(e)) => {
                warn!("Membership subscription for {} ended: {}", self.principal, e);
                self.memberships = None;
            }
            ListEvent::Thread {
                thread_id,
                generation,
                result: Ok(doc),
            } => {
                let item = doc.map(|doc| views::thread_item_from(&thread_id, &doc));
                if self.state.apply_thread(&thread_id, generation, item) {
                    self.publish();
                }
            }
            ListEvent::Thread {
                thread_id,
                generation,
                result: Err(e),
            } => {
                warn!("Subscription to thread {} ended: {}", thread_id, e);
                if self.state.end_thread(&thread_id, generation) {
                    self.publish();
                }
            }
        }
    }

    fn publish(&self) {
        let items = self.state.items();
        self.view.send_if_modified(|current| {
            if *current == items {
                return false;
            }
            *current = items;
            true
        });
    }

    fn close(&mut self) {
        if let Some(memberships) = self.memberships.take() {
            memberships.cancel();
        }
        self.state.close();
        self.publish();
        info!("Thread list closed for {}", self.principal);
    }
}

fn attach_thread(
    store: &dyn StoreGateway,
    events: &mpsc::UnboundedSender<ListEvent>,
    thread_id: &ThreadId,
    generation: u64,
) -> Option<ListenerRegistration> {
    let path = match layout::thread(thread_id.as_str()) {
        Ok(path) => path,
        Err(e) => {
            warn!("Cannot watch thread {:?}: {}", thread_id.as_str(), e);
            return None;
        }
    };

    let listener: DocumentListener = {
        let events = events.clone();
        let thread_id = thread_id.clone();
        Arc::new(move |result: Result<Option<Document>, StoreError>| {
            let _ = events.send(ListEvent::Thread {
                thread_id: thread_id.clone(),
                generation,
                result,
            });
        })
    };

    match store.subscribe_document(path, listener) {
        Ok(registration) => {
            debug!("Watching thread {} (generation {})", thread_id, generation);
            Some(registration)
        }
        Err(e) => {
            warn!("Cannot watch thread {}: {}", thread_id, e);
            None
        }
    }
}
