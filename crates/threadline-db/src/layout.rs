//! Where Threadline keeps its documents.
//!
//! ```text
//! threads/{thread}                        thread metadata
//! threads/{thread}/members/{principal}    membership
//! threads/{thread}/messages/{message}     message log
//! user_threads/{principal}/threads/{thread}  mirror index row
//! ```

use crate::error::StoreError;
use crate::path::{CollectionPath, DocPath};

pub const THREADS: &str = "threads";
pub const MEMBERS: &str = "members";
pub const MESSAGES: &str = "messages";
pub const USER_THREADS: &str = "user_threads";

pub fn threads() -> CollectionPath {
    CollectionPath::trusted(THREADS)
}

pub fn thread(thread_id: &str) -> Result<DocPath, StoreError> {
    threads().doc(thread_id)
}

pub fn members(thread_id: &str) -> Result<CollectionPath, StoreError> {
    thread(thread_id)?.child(MEMBERS)
}

pub fn member(thread_id: &str, principal: &str) -> Result<DocPath, StoreError> {
    members(thread_id)?.doc(principal)
}

pub fn messages(thread_id: &str) -> Result<CollectionPath, StoreError> {
    thread(thread_id)?.child(MESSAGES)
}

pub fn message(thread_id: &str, message_id: &str) -> Result<DocPath, StoreError> {
    messages(thread_id)?.doc(message_id)
}

pub fn mirror_rows(principal: &str) -> Result<CollectionPath, StoreError> {
    CollectionPath::root(USER_THREADS)?.doc(principal)?.child(THREADS)
}

pub fn mirror_row(principal: &str, thread_id: &str) -> Result<DocPath, StoreError> {
    mirror_rows(principal)?.doc(thread_id)
}

/// What a document path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location<'a> {
    Thread { thread_id: &'a str },
    Member { thread_id: &'a str, principal: &'a str },
    Message { thread_id: &'a str, message_id: &'a str },
    MirrorRow { principal: &'a str, thread_id: &'a str },
    Other,
}

pub fn locate(path: &DocPath) -> Location<'_> {
    let segments: Vec<&str> = path.segments().collect();
    match *segments.as_slice() {
        [THREADS, thread_id] => Location::Thread { thread_id },
        [THREADS, thread_id, MEMBERS, principal] => Location::Member {
            thread_id,
            principal,
        },
        [THREADS, thread_id, MESSAGES, message_id] => Location::Message {
            thread_id,
            message_id,
        },
        [USER_THREADS, principal, THREADS, thread_id] => Location::MirrorRow {
            principal,
            thread_id,
        },
        _ => Location::Other,
    }
}

/// What a collection path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionLocation<'a> {
    Threads,
    Members { thread_id: &'a str },
    Messages { thread_id: &'a str },
    MirrorRows { principal: &'a str },
    Other,
}

pub fn locate_collection(path: &CollectionPath) -> CollectionLocation<'_> {
    let segments: Vec<&str> = path.as_str().split('/').collect();
    match *segments.as_slice() {
        [THREADS] => CollectionLocation::Threads,
        [THREADS, thread_id, MEMBERS] => CollectionLocation::Members { thread_id },
        [THREADS, thread_id, MESSAGES] => CollectionLocation::Messages { thread_id },
        [USER_THREADS, principal, THREADS] => CollectionLocation::MirrorRows { principal },
        _ => CollectionLocation::Other,
    }
}
