use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            path        TEXT NOT NULL UNIQUE,
            parent      TEXT NOT NULL,
            collection  TEXT NOT NULL,
            doc_id      TEXT NOT NULL,
            data        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_parent
            ON documents(parent, seq);

        -- Collection-group lookups (e.g. every members/{principal} across threads)
        CREATE INDEX IF NOT EXISTS idx_documents_group
            ON documents(collection, doc_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
