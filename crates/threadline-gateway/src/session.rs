//! Per-connection state behind the WebSocket: the principal's thread list
//! and at most one open thread feed.

use std::future;

use threadline_sync::{SyncError, ThreadFeedSync, ThreadListSync, ThreadlineClient};
use threadline_types::events::{GatewayCommand, GatewayEvent};
use threadline_types::models::{FeedView, PrincipalId, ThreadItem};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct GatewaySession {
    client: ThreadlineClient,
    principal: PrincipalId,
    list: Option<ThreadListSync>,
    list_view: Option<watch::Receiver<Vec<ThreadItem>>>,
    feed: Option<ThreadFeedSync>,
    feed_view: Option<watch::Receiver<FeedView>>,
}

impl GatewaySession {
    pub fn new(client: ThreadlineClient, principal: PrincipalId) -> Self {
        Self {
            client,
            principal,
            list: None,
            list_view: None,
            feed: None,
            feed_view: None,
        }
    }

    pub fn principal(&self) -> &PrincipalId {
        &self.principal
    }

    /// Run one client command. Failures come back as `GatewayEvent::Error`.
    pub async fn handle(&mut self, cmd: GatewayCommand) -> Vec<GatewayEvent> {
        match self.dispatch(cmd).await {
            Ok(events) => events,
            Err(e) => {
                debug!("Command from {} failed: {}", self.principal, e);
                vec![GatewayEvent::Error {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }]
            }
        }
    }

    async fn dispatch(&mut self, cmd: GatewayCommand) -> Result<Vec<GatewayEvent>, SyncError> {
        match cmd {
            GatewayCommand::Identify { .. } => {
                warn!("{} sent Identify twice, ignoring", self.principal);
                Ok(vec![])
            }

            GatewayCommand::WatchThreads => {
                self.unwatch_threads().await;
                let list = self.client.open_thread_list()?;
                let mut view = list.view();
                let items = view.borrow_and_update().clone();
                self.list = Some(list);
                self.list_view = Some(view);
                info!("{} watching thread list", self.principal);
                Ok(vec![GatewayEvent::ThreadList { items }])
            }

            GatewayCommand::UnwatchThreads => {
                self.unwatch_threads().await;
                Ok(vec![])
            }

            GatewayCommand::OpenThread { thread_id } => {
                self.close_thread().await;
                let feed = self.client.open_feed(thread_id).await?;
                let mut view = feed.view();
                let current = view.borrow_and_update().clone();
                self.feed = Some(feed);
                self.feed_view = Some(view);
                Ok(vec![feed_event(current)])
            }

            GatewayCommand::RefreshThread => {
                self.open_feed()?.refresh().await;
                Ok(vec![])
            }

            GatewayCommand::CloseThread => {
                self.close_thread().await;
                Ok(vec![])
            }

            GatewayCommand::SendMessage { text } => {
                let feed = self.open_feed()?;
                let message_id = feed.send(&text).await?;
                Ok(vec![GatewayEvent::MessageSent {
                    thread_id: feed.thread_id().clone(),
                    message_id,
                }])
            }

            GatewayCommand::ToggleMembership => {
                self.open_feed()?.toggle_membership().await?;
                Ok(vec![])
            }
        }
    }

    /// The next view change to push to the client. Pending while nothing is
    /// open.
    pub async fn next_update(&mut self) -> GatewayEvent {
        loop {
            tokio::select! {
                items = changed(&mut self.list_view) => match items {
                    Some(items) => return GatewayEvent::ThreadList { items },
                    None => self.list_view = None,
                },
                view = changed(&mut self.feed_view) => match view {
                    Some(view) => return feed_event(view),
                    None => self.feed_view = None,
                },
            }
        }
    }

    /// Stop every subscription held for this connection.
    pub async fn close(&mut self) {
        self.unwatch_threads().await;
        self.close_thread().await;
    }

    fn open_feed(&self) -> Result<&ThreadFeedSync, SyncError> {
        self.feed
            .as_ref()
            .ok_or_else(|| SyncError::InvalidArgument("no thread is open".into()))
    }

    async fn unwatch_threads(&mut self) {
        self.list_view = None;
        if let Some(list) = self.list.take() {
            list.close().await;
        }
    }

    async fn close_thread(&mut self) {
        self.feed_view = None;
        if let Some(feed) = self.feed.take() {
            feed.close().await;
        }
    }
}

fn feed_event(view: FeedView) -> GatewayEvent {
    GatewayEvent::Feed {
        thread_id: view.thread_id,
        state: view.state,
        messages: view.messages,
    }
}

/// Next value of an optional view. `None` once its session has ended.
async fn changed<T: Clone>(rx: &mut Option<watch::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => future::pending().await,
    }
}
