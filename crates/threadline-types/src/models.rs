use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest preview kept on a thread, counted in characters.
pub const PREVIEW_MAX_CHARS: usize = 80;

/// Number of most recent messages a thread feed keeps live.
pub const FEED_WINDOW: usize = 50;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// An authenticated identity. Opaque; issued by the identity provider.
    PrincipalId
);
string_id!(
    /// Store-assigned thread id.
    ThreadId
);
string_id!(
    /// Store-assigned message id, unique within its thread.
    MessageId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    #[default]
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
        }
    }
}

/// Canonical thread metadata as stored at `threads/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
    pub created_by: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message_preview: String,
}

/// Stored at `threads/{thread}/members/{principal}`. Existence is membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub role: MemberRole,
}

/// Stored at `threads/{thread}/messages/{id}`. Never modified after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: PrincipalId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Per-principal denormalized copy of a thread's list fields, stored at
/// `user_threads/{principal}/threads/{thread}`. A freshly joined stub may
/// carry empty fields until the next thread update refreshes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorIndexRow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message_preview: String,
}

/// One row of a principal's thread list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadItem {
    pub id: ThreadId,
    pub name: String,
    pub last_message_preview: String,
    pub last_message_at: DateTime<Utc>,
}

/// One message as shown in a thread feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: PrincipalId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    CheckingMembership,
    Member,
    NotMember,
}

/// Everything a thread view renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedView {
    pub thread_id: ThreadId,
    pub state: FeedState,
    pub messages: Vec<ChatMessage>,
}

impl FeedView {
    pub fn checking(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            state: FeedState::CheckingMembership,
            messages: Vec::new(),
        }
    }
}

/// First `PREVIEW_MAX_CHARS` characters of a message body.
pub fn preview_of(text: &str) -> String {
    text.chars().take(PREVIEW_MAX_CHARS).collect()
}
