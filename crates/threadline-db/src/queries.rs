use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};

use crate::Database;
use crate::document::{Document, Fields, WriteOp, format_timestamp};
use crate::error::StoreError;
use crate::gateway::{ListenerRegistration, QueryListener, Source, Transaction, TransactionFn, TransactionReader};
use crate::models::DocumentRow;
use crate::path::DocPath;
use crate::query::{Query, Selector};
use crate::rules;
use crate::watch::Watch;

const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

impl Database {
    // -- Reads --

    pub(crate) fn get_as(
        &self,
        reader: Option<&str>,
        path: &DocPath,
        source: Source,
    ) -> Result<Option<Document>, StoreError> {
        let query = Query::document(path);
        if source == Source::Cache {
            if let Some(hit) = self.cached(path) {
                self.with_conn(|conn| rules::check_read(conn, reader, &query))?;
                return Ok(hit);
            }
        }

        let doc = self.with_conn(|conn| {
            rules::check_read(conn, reader, &query)?;
            read_document(conn, path)
        })?;
        self.remember(path, doc.clone());
        Ok(doc)
    }

    pub(crate) fn query_as(
        &self,
        reader: Option<&str>,
        query: &Query,
    ) -> Result<Vec<Document>, StoreError> {
        self.with_conn(|conn| {
            rules::check_read(conn, reader, query)?;
            run_query(conn, query)
        })
    }

    // -- Writes --

    pub(crate) fn commit_as(&self, reader: Option<&str>, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let changed = self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            rules::check_writes(&tx, reader, &ops)?;
            let changed = apply_writes(&tx, &ops, self.clock.next())?;
            tx.commit()?;
            Ok(changed)
        })?;

        debug!("Committed batch of {} writes", changed.len());
        self.after_commit(&changed);
        Ok(())
    }

    pub(crate) fn transact_as(
        &self,
        reader: Option<&str>,
        body: &mut TransactionFn,
    ) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_transaction(reader, body) {
                Ok(changed) => {
                    self.after_commit(&changed);
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < MAX_TRANSACTION_ATTEMPTS => {
                    warn!("Transaction attempt {} failed, retrying: {}", attempt, err);
                }
                Err(err) if err.is_transient() => {
                    return Err(StoreError::Aborted { attempts: attempt });
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_transaction(
        &self,
        reader: Option<&str>,
        body: &mut TransactionFn,
    ) -> Result<Vec<DocPath>, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let writes = {
                let view = TransactionView { conn: &tx, reader };
                let mut txn = Transaction::new(&view);
                body(&mut txn)?;
                txn.into_writes()
            };
            rules::check_writes(&tx, reader, &writes)?;
            let changed = apply_writes(&tx, &writes, self.clock.next())?;
            tx.commit()?;
            Ok(changed)
        })
    }

    // -- Subscriptions --

    pub(crate) fn subscribe_as(
        &self,
        reader: Option<&str>,
        query: Query,
        listener: QueryListener,
    ) -> Result<ListenerRegistration, StoreError> {
        let mut watches = self.watches.lock()?;
        let docs = self.query_as(reader, &query)?;
        listener(Ok(docs.clone()));

        let id = self.watches.next_id();
        watches.insert(
            id,
            Watch {
                reader: reader.map(str::to_string),
                query,
                listener,
                last: docs,
            },
        );
        drop(watches);

        debug!("Listener {} registered", id);
        Ok(self.watches.registration(id))
    }

    fn after_commit(&self, changed: &[DocPath]) {
        if let Ok(mut cache) = self.cache.lock() {
            for path in changed {
                cache.remove(path);
            }
        }
        self.notify(changed);
    }

    /// Re-evaluate every watch a commit may have affected and deliver the
    /// ones whose result changed.
    fn notify(&self, changed: &[DocPath]) {
        let mut watches = match self.watches.lock() {
            Ok(watches) => watches,
            Err(e) => {
                warn!("Skipping notification: {}", e);
                return;
            }
        };

        let affected: Vec<u64> = watches
            .iter()
            .filter(|(_, watch)| watch.is_affected_by(changed))
            .map(|(id, _)| *id)
            .collect();
        if affected.is_empty() {
            return;
        }

        let outcomes = self.with_conn(|conn| {
            Ok(affected
                .iter()
                .filter_map(|id| watches.get(id).map(|watch| (*id, evaluate(conn, watch))))
                .collect::<Vec<_>>())
        });
        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!("Skipping notification: {}", e);
                return;
            }
        };

        for (id, outcome) in outcomes {
            let keep = watches.get_mut(&id).is_none_or(|watch| watch.deliver(outcome));
            if !keep {
                watches.remove(&id);
                debug!("Listener {} dropped after error", id);
            }
        }
    }

    fn cached(&self, path: &DocPath) -> Option<Option<Document>> {
        self.cache.lock().ok()?.get(path).cloned()
    }

    fn remember(&self, path: &DocPath, doc: Option<Document>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.clone(), doc);
        }
    }
}

fn evaluate(conn: &Connection, watch: &Watch) -> Result<Vec<Document>, StoreError> {
    rules::check_read(conn, watch.reader.as_deref(), &watch.query)?;
    run_query(conn, &watch.query)
}

/// Reads inside a transaction, with the caller's read rules applied.
struct TransactionView<'c> {
    conn: &'c Connection,
    reader: Option<&'c str>,
}

impl TransactionReader for TransactionView<'_> {
    fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        rules::check_read(self.conn, self.reader, &Query::document(path))?;
        read_document(self.conn, path)
    }
}

pub fn read_document(conn: &Connection, path: &DocPath) -> Result<Option<Document>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM documents WHERE path = ?1",
        DocumentRow::COLUMNS
    ))?;
    stmt.query_row([path.as_str()], DocumentRow::from_row)
        .optional()?
        .map(DocumentRow::into_document)
        .transpose()
}

pub fn run_query(conn: &Connection, query: &Query) -> Result<Vec<Document>, StoreError> {
    let (scope, key) = match &query.selector {
        Selector::Collection(collection) => ("parent", collection.as_str()),
        Selector::Group(name) => ("collection", name.as_str()),
    };
    let mut params = vec![key];
    let mut sql = format!(
        "SELECT {} FROM documents WHERE {} = ?1",
        DocumentRow::COLUMNS,
        scope
    );
    if let Some(id) = query.document_id() {
        sql.push_str(" AND doc_id = ?2");
        params.push(id);
    }
    sql.push_str(" ORDER BY seq");

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), DocumentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let docs = rows
        .into_iter()
        .map(DocumentRow::into_document)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(query.apply(docs))
}

/// Apply `ops` in order. Returns the paths touched.
pub fn apply_writes(
    conn: &Connection,
    ops: &[WriteOp],
    commit_time: DateTime<Utc>,
) -> Result<Vec<DocPath>, StoreError> {
    let now = format_timestamp(commit_time);
    let mut changed = Vec::with_capacity(ops.len());

    for op in ops {
        match op {
            WriteOp::Set { path, data, merge } => {
                let mut fields = if *merge {
                    read_document(conn, path)?.map(|d| d.data).unwrap_or_default()
                } else {
                    Fields::new()
                };
                fields.extend(data.resolve(commit_time));
                upsert(conn, path, &fields, &now)?;
            }
            WriteOp::Update { path, data } => {
                let Some(existing) = read_document(conn, path)? else {
                    return Err(StoreError::NotFound(path.to_string()));
                };
                let mut fields = existing.data;
                fields.extend(data.resolve(commit_time));
                upsert(conn, path, &fields, &now)?;
            }
            WriteOp::Delete { path } => {
                conn.execute("DELETE FROM documents WHERE path = ?1", [path.as_str()])?;
            }
        }
        changed.push(op.path().clone());
    }
    Ok(changed)
}

/// Overwrites keep the original `seq`, so a document's position in
/// tie-broken orderings is fixed at creation.
fn upsert(conn: &Connection, path: &DocPath, fields: &Fields, now: &str) -> Result<(), StoreError> {
    let collection = path.collection();
    conn.execute(
        "INSERT INTO documents (path, parent, collection, doc_id, data, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        rusqlite::params![
            path.as_str(),
            collection.as_str(),
            collection.name(),
            path.id(),
            serde_json::to_string(fields)?,
            now,
        ],
    )?;
    Ok(())
}
