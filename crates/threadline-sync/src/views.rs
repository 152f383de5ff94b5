//! Conversions between stored documents and view models.

use chrono::{DateTime, Utc};
use threadline_db::layout;
use threadline_db::{Direction, Document, Query, StoreError, WriteData};
use threadline_types::models::{ChatMessage, FEED_WINDOW, MessageId, PrincipalId, ThreadId, ThreadItem};

pub const UNTITLED: &str = "Untitled";

/// The most recent `FEED_WINDOW` messages of a thread, oldest first.
pub fn feed_window(thread_id: &ThreadId) -> Result<Query, StoreError> {
    Ok(Query::collection(layout::messages(thread_id.as_str())?)
        .order_by("sentAt", Direction::Ascending)
        .limit_to_last(FEED_WINDOW))
}

pub fn thread_item_from(thread_id: &ThreadId, doc: &Document) -> ThreadItem {
    ThreadItem {
        id: thread_id.clone(),
        name: doc.get_str("name").unwrap_or(UNTITLED).to_string(),
        last_message_preview: doc.get_str("lastMessagePreview").unwrap_or_default().to_string(),
        last_message_at: doc
            .get_timestamp("lastMessageAt")
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

pub fn chat_message_from(doc: &Document) -> ChatMessage {
    ChatMessage {
        id: MessageId::new(doc.id()),
        sender_id: PrincipalId::new(doc.get_str("senderId").unwrap_or_default()),
        text: doc.get_str("text").unwrap_or_default().to_string(),
        sent_at: doc
            .get_timestamp("sentAt")
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

/// Mirror index fields copied from a thread document.
pub fn index_row_data(thread: &Document) -> WriteData {
    let mut data = WriteData::new()
        .with("name", thread.get_str("name").unwrap_or_default())
        .with(
            "lastMessagePreview",
            thread.get_str("lastMessagePreview").unwrap_or_default(),
        );
    if let Some(at) = thread.get("lastMessageAt") {
        data = data.with("lastMessageAt", at.clone());
    }
    data
}
