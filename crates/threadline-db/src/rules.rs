//! Access rules for principal-scoped handles.
//!
//! - thread metadata is readable by anyone signed in, writable by members
//! - a member document is written only by the principal it names
//! - messages are read and created only by members, never changed
//! - mirror rows belong to the principal whose index they sit in

use rusqlite::Connection;
use serde_json::Value;

use crate::document::{FieldValue, WriteOp};
use crate::error::StoreError;
use crate::layout::{self, CollectionLocation, Location};
use crate::queries::read_document;
use crate::query::{Query, Selector};

fn denied(reason: impl Into<String>) -> StoreError {
    StoreError::PermissionDenied(reason.into())
}

pub(crate) fn check_read(
    conn: &Connection,
    reader: Option<&str>,
    query: &Query,
) -> Result<(), StoreError> {
    let Some(reader) = reader else {
        return Ok(());
    };

    match &query.selector {
        Selector::Collection(collection) => match layout::locate_collection(collection) {
            CollectionLocation::Threads => Ok(()),
            CollectionLocation::Members { thread_id } => {
                if query.document_id() == Some(reader) || is_member(conn, thread_id, reader)? {
                    Ok(())
                } else {
                    Err(denied(format!("{} is not a member of {}", reader, thread_id)))
                }
            }
            CollectionLocation::Messages { thread_id } => require_member(conn, thread_id, reader),
            CollectionLocation::MirrorRows { principal } => require_self(principal, reader),
            CollectionLocation::Other => Err(denied(format!("{} is not readable", collection))),
        },
        Selector::Group(name) if name == layout::MEMBERS && query.document_id() == Some(reader) => {
            Ok(())
        }
        Selector::Group(name) => Err(denied(format!("collection group {} is not readable", name))),
    }
}

pub(crate) fn check_writes(
    conn: &Connection,
    reader: Option<&str>,
    ops: &[WriteOp],
) -> Result<(), StoreError> {
    let Some(reader) = reader else {
        return Ok(());
    };

    for op in ops {
        let path = op.path();
        match layout::locate(path) {
            Location::Thread { thread_id } => {
                let Some(data) = op.data() else {
                    return Err(denied("threads cannot be deleted"));
                };
                let is_new = read_document(conn, path)?.is_none();
                if is_new && !field_is(data.get("createdBy"), reader) {
                    return Err(denied("createdBy must be the caller"));
                }
                if !is_member_after(conn, ops, thread_id, reader)? {
                    return Err(denied(format!("{} is not a member of {}", reader, thread_id)));
                }
            }
            Location::Member { principal, .. } => require_self(principal, reader)?,
            Location::Message { thread_id, .. } => {
                let WriteOp::Set { data, .. } = op else {
                    return Err(denied("messages are immutable"));
                };
                if read_document(conn, path)?.is_some() {
                    return Err(denied("messages are immutable"));
                }
                if !field_is(data.get("senderId"), reader) {
                    return Err(denied("senderId must be the caller"));
                }
                if !is_member_after(conn, ops, thread_id, reader)? {
                    return Err(denied(format!("{} is not a member of {}", reader, thread_id)));
                }
            }
            Location::MirrorRow { principal, .. } => require_self(principal, reader)?,
            Location::Other => return Err(denied(format!("{} is not writable", path))),
        }
    }
    Ok(())
}

fn field_is(value: Option<&FieldValue>, expected: &str) -> bool {
    matches!(value, Some(FieldValue::Value(Value::String(s))) if s == expected)
}

fn require_self(owner: &str, reader: &str) -> Result<(), StoreError> {
    if owner == reader {
        Ok(())
    } else {
        Err(denied(format!("{} cannot access data owned by {}", reader, owner)))
    }
}

fn require_member(conn: &Connection, thread_id: &str, reader: &str) -> Result<(), StoreError> {
    if is_member(conn, thread_id, reader)? {
        Ok(())
    } else {
        Err(denied(format!("{} is not a member of {}", reader, thread_id)))
    }
}

fn is_member(conn: &Connection, thread_id: &str, principal: &str) -> Result<bool, StoreError> {
    Ok(read_document(conn, &layout::member(thread_id, principal)?)?.is_some())
}

/// Membership as it will be once `ops` commit: the last op in the batch that
/// touches the member document wins.
fn is_member_after(
    conn: &Connection,
    ops: &[WriteOp],
    thread_id: &str,
    principal: &str,
) -> Result<bool, StoreError> {
    let path = layout::member(thread_id, principal)?;
    match ops.iter().rev().find(|op| *op.path() == path) {
        Some(WriteOp::Delete { .. }) => Ok(false),
        Some(_) => Ok(true),
        None => is_member(conn, thread_id, principal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::WriteData;
    use crate::migrations;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrations::run(&conn).unwrap();
        conn
    }

    #[test]
    fn creating_thread_with_owner_membership_is_allowed() {
        let conn = conn();
        let ops = vec![
            WriteOp::set(
                layout::thread("t1").unwrap(),
                WriteData::new().with("name", "Study").with("createdBy", "alice"),
            ),
            WriteOp::set(layout::member("t1", "alice").unwrap(), WriteData::new()),
        ];
        check_writes(&conn, Some("alice"), &ops).unwrap();
    }

    #[test]
    fn creating_thread_for_someone_else_is_denied() {
        let conn = conn();
        let ops = vec![
            WriteOp::set(
                layout::thread("t1").unwrap(),
                WriteData::new().with("createdBy", "bob"),
            ),
            WriteOp::set(layout::member("t1", "alice").unwrap(), WriteData::new()),
        ];
        let err = check_writes(&conn, Some("alice"), &ops).unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[test]
    fn deleting_a_thread_is_denied() {
        let conn = conn();
        let ops = vec![WriteOp::delete(layout::thread("t1").unwrap())];
        let err = check_writes(&conn, Some("alice"), &ops).unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[test]
    fn message_from_non_member_is_denied() {
        let conn = conn();
        let ops = vec![WriteOp::set(
            layout::message("t1", "m1").unwrap(),
            WriteData::new().with("senderId", "alice").with("text", "hi"),
        )];
        assert!(check_writes(&conn, Some("alice"), &ops).is_err());
        assert!(check_writes(&conn, None, &ops).is_ok());
    }

    #[test]
    fn leaving_then_writing_in_same_batch_is_denied() {
        let conn = conn();
        let ops = vec![
            WriteOp::set(layout::member("t1", "alice").unwrap(), WriteData::new()),
            WriteOp::delete(layout::member("t1", "alice").unwrap()),
            WriteOp::set(
                layout::message("t1", "m1").unwrap(),
                WriteData::new().with("senderId", "alice"),
            ),
        ];
        assert!(check_writes(&conn, Some("alice"), &ops).is_err());
    }

    #[test]
    fn mirror_rows_and_group_reads_are_owner_only() {
        let conn = conn();
        let own = Query::collection(layout::mirror_rows("alice").unwrap());
        let other = Query::collection(layout::mirror_rows("bob").unwrap());
        assert!(check_read(&conn, Some("alice"), &own).is_ok());
        assert!(check_read(&conn, Some("alice"), &other).is_err());

        let own_memberships = Query::collection_group(layout::MEMBERS).where_document_id("alice");
        let all_memberships = Query::collection_group(layout::MEMBERS);
        assert!(check_read(&conn, Some("alice"), &own_memberships).is_ok());
        assert!(check_read(&conn, Some("alice"), &all_memberships).is_err());
    }
}
