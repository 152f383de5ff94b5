use serde::{Deserialize, Serialize};

use crate::models::{FeedState, MessageId, PrincipalId, ThreadId, ThreadItem, ChatMessage};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { principal_id: PrincipalId },

    /// Full, sorted thread list. Sent on every change.
    ThreadList { items: Vec<ThreadItem> },

    /// Current state of the open thread view. Sent on every change.
    Feed {
        thread_id: ThreadId,
        state: FeedState,
        messages: Vec<ChatMessage>,
    },

    /// A message sent from this connection was committed
    MessageSent {
        thread_id: ThreadId,
        message_id: MessageId,
    },

    /// A command failed. `kind` is the error kind in snake_case.
    Error { kind: String, message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start streaming this principal's thread list
    WatchThreads,

    /// Stop streaming the thread list
    UnwatchThreads,

    /// Open a thread view, closing any previously open one
    OpenThread { thread_id: ThreadId },

    /// Re-check membership of the open thread
    RefreshThread,

    /// Close the open thread view
    CloseThread,

    /// Send a message to the open thread
    SendMessage { text: String },

    /// Join or leave the open thread
    ToggleMembership,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_adjacent_tagging() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"OpenThread","data":{"thread_id":"t1"}}"#).unwrap();
        match cmd {
            GatewayCommand::OpenThread { thread_id } => assert_eq!(thread_id.as_str(), "t1"),
            other => panic!("unexpected command: {:?}", other),
        }

        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"WatchThreads"}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::WatchThreads));
    }

    #[test]
    fn feed_event_serializes_state_in_snake_case() {
        let event = GatewayEvent::Feed {
            thread_id: ThreadId::new("t1"),
            state: FeedState::NotMember,
            messages: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Feed");
        assert_eq!(json["data"]["state"], "not_member");
    }
}
