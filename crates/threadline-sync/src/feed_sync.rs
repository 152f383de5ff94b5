//! One thread's live message window, gated by membership.

use std::sync::Arc;

use threadline_db::{Document, ListenerRegistration, QueryListener, StoreError};
use threadline_types::models::{ChatMessage, FeedState, FeedView, MessageId, PrincipalId, ThreadId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::Services;
use crate::error::{SyncError, require_principal, require_thread_id};
use crate::views;

struct FeedEvent {
    generation: u64,
    result: Result<Vec<Document>, StoreError>,
}

enum FeedCommand {
    Refresh(oneshot::Sender<FeedState>),
    Toggle(oneshot::Sender<Result<FeedState, SyncError>>),
    Send {
        text: String,
        reply: oneshot::Sender<Result<MessageId, SyncError>>,
    },
    Snapshot(oneshot::Sender<FeedView>),
    SubscriptionCount(oneshot::Sender<usize>),
    Close(oneshot::Sender<()>),
}

/// Handle to a running thread feed. Dropping it closes the feed.
pub struct ThreadFeedSync {
    thread_id: ThreadId,
    view: watch::Receiver<FeedView>,
    commands: mpsc::Sender<FeedCommand>,
    draft: String,
}

impl ThreadFeedSync {
    /// Start a feed and run the first membership check.
    pub async fn open(
        services: &Services,
        thread_id: ThreadId,
        principal: Option<&PrincipalId>,
    ) -> Result<Self, SyncError> {
        let principal = require_principal(principal)?.clone();
        require_thread_id(&thread_id)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (view_tx, view_rx) = watch::channel(FeedView::checking(thread_id.clone()));

        let session = FeedSession {
            services: services.clone(),
            thread_id: thread_id.clone(),
            principal,
            state: FeedState::CheckingMembership,
            messages: Vec::new(),
            window: None,
            next_generation: 0,
            events: events_tx,
            view: view_tx,
        };
        tokio::spawn(session.run(events_rx, commands_rx));

        let feed = Self {
            thread_id,
            view: view_rx,
            commands: commands_tx,
            draft: String::new(),
        };
        feed.refresh().await;
        Ok(feed)
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn view(&self) -> watch::Receiver<FeedView> {
        self.view.clone()
    }

    /// State and messages after every change already delivered by the store.
    pub async fn snapshot(&self) -> FeedView {
        match self.request(FeedCommand::Snapshot).await {
            Some(view) => view,
            None => self.view.borrow().clone(),
        }
    }

    /// Re-check membership and attach or detach accordingly.
    pub async fn refresh(&self) -> FeedState {
        match self.request(FeedCommand::Refresh).await {
            Some(state) => state,
            None => self.view.borrow().state,
        }
    }

    /// Join when not a member, leave when a member. On failure the state is
    /// unchanged and the error is returned.
    pub async fn toggle_membership(&self) -> Result<FeedState, SyncError> {
        self.request(FeedCommand::Toggle).await.unwrap_or_else(closed)
    }

    pub async fn send(&self, text: &str) -> Result<MessageId, SyncError> {
        let text = text.to_string();
        self.request(|reply| FeedCommand::Send { text, reply })
            .await
            .unwrap_or_else(closed)
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Send the draft. The draft is cleared before the send completes,
    /// whatever its outcome.
    pub async fn submit(&mut self) -> Result<MessageId, SyncError> {
        let text = std::mem::take(&mut self.draft);
        self.send(&text).await
    }

    /// Live message-window subscriptions held by this feed (0 or 1).
    pub async fn subscription_count(&self) -> usize {
        self.request(FeedCommand::SubscriptionCount)
            .await
            .unwrap_or_default()
    }

    /// Detach. Safe to call more than once.
    pub async fn close(&self) {
        let _ = self.request(FeedCommand::Close).await;
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> FeedCommand) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(command(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}

fn closed<T>() -> Result<T, SyncError> {
    Err(SyncError::InvalidArgument("thread feed is closed".into()))
}

struct Window {
    generation: u64,
    registration: ListenerRegistration,
}

struct FeedSession {
    services: Services,
    thread_id: ThreadId,
    principal: PrincipalId,
    state: FeedState,
    messages: Vec<ChatMessage>,
    window: Option<Window>,
    next_generation: u64,
    events: mpsc::UnboundedSender<FeedEvent>,
    view: watch::Sender<FeedView>,
}

impl FeedSession {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<FeedEvent>,
        mut commands: mpsc::Receiver<FeedCommand>,
    ) {
        loop {
            tokio::select! {
                // Drain store notifications before answering a request.
                biased;

                Some(event) = events.recv() => self.handle_event(event),

                command = commands.recv() => match command {
                    Some(FeedCommand::Refresh(reply)) => {
                        let _ = reply.send(self.refresh().await);
                    }
                    Some(FeedCommand::Toggle(reply)) => {
                        let _ = reply.send(self.toggle().await);
                    }
                    Some(FeedCommand::Send { text, reply }) => {
                        let _ = reply.send(self.send(&text).await);
                    }
                    Some(FeedCommand::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(FeedCommand::SubscriptionCount(reply)) => {
                        let _ = reply.send(usize::from(self.window.is_some()));
                    }
                    Some(FeedCommand::Close(reply)) => {
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

    async fn refresh(&mut self) -> FeedState {
        self.state = FeedState::CheckingMembership;
        self.publish();

        let member = self
            .services
            .membership
            .is_member(&self.thread_id, Some(&self.principal))
            .await;
        if member {
            self.enter_member();
        } else {
            self.enter_not_member();
        }
        self.state
    }

    async fn toggle(&mut self) -> Result<FeedState, SyncError> {
        let membership = &self.services.membership;
        match self.state {
            FeedState::CheckingMembership => {
                return Err(SyncError::InvalidArgument(
                    "membership check in progress".into(),
                ));
            }
            FeedState::Member => {
                membership.leave(&self.thread_id, Some(&self.principal)).await?;
                self.enter_not_member();
            }
            FeedState::NotMember => {
                membership.join(&self.thread_id, Some(&self.principal)).await?;
                self.enter_member();
            }
        }
        Ok(self.state)
    }

    async fn send(&self, text: &str) -> Result<MessageId, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::InvalidArgument("message text is blank".into()));
        }
        if self.state != FeedState::Member {
            return Err(SyncError::PermissionDenied(format!(
                "not a member of thread {}",
                self.thread_id
            )));
        }
        self.services
            .threads
            .send_message(&self.thread_id, text, Some(&self.principal))
            .await
    }

    fn enter_member(&mut self) {
        self.state = FeedState::Member;
        self.attach();
        self.publish();
    }

    fn enter_not_member(&mut self) {
        self.state = FeedState::NotMember;
        self.detach();
        self.messages.clear();
        self.publish();
    }

    fn attach(&mut self) {
        if self.window.is_some() {
            return;
        }
        let query = match views::feed_window(&self.thread_id) {
            Ok(query) => query,
            Err(e) => {
                warn!("Cannot watch messages of {:?}: {}", self.thread_id.as_str(), e);
                return;
            }
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        let listener: QueryListener = {
            let events = self.events.clone();
            Arc::new(move |result: Result<Vec<Document>, StoreError>| {
                let _ = events.send(FeedEvent { generation, result });
            })
        };

        match self.services.store.subscribe_query(query, listener) {
            Ok(registration) => {
                debug!("Watching messages of {} (generation {})", self.thread_id, generation);
                self.window = Some(Window {
                    generation,
                    registration,
                });
            }
            Err(e) => warn!("Cannot watch messages of {}: {}", self.thread_id, e),
        }
    }

    fn detach(&mut self) {
        if let Some(window) = self.window.take() {
            window.registration.cancel();
            debug!("Stopped watching messages of {}", self.thread_id);
        }
    }

    fn handle_event(&mut self, event: FeedEvent) {
        let current = self
            .window
            .as_ref()
            .is_some_and(|w| w.generation == event.generation);
        if !current {
            return;
        }
        match event.result {
            Ok(docs) => {
                self.messages = docs.iter().map(views::chat_message_from).collect();
                self.publish();
            }
            Err(e) => {
                warn!("Message subscription for {} ended: {}", self.thread_id, e);
                self.window = None;
            }
        }
    }

    fn snapshot(&self) -> FeedView {
        FeedView {
            thread_id: self.thread_id.clone(),
            state: self.state,
            messages: self.messages.clone(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn close(&mut self) {
        self.detach();
        info!("Feed for {} closed", self.thread_id);
    }
}
