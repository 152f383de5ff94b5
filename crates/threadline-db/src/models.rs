use serde_json::Value;

use crate::document::Document;
use crate::error::StoreError;
use crate::path::DocPath;

/// A `documents` row as read from SQLite, before JSON decoding.
pub struct DocumentRow {
    pub seq: i64,
    pub path: String,
    pub data: String,
}

impl DocumentRow {
    pub const COLUMNS: &'static str = "seq, path, data";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            path: row.get(1)?,
            data: row.get(2)?,
        })
    }

    pub fn into_document(self) -> Result<Document, StoreError> {
        let data = match serde_json::from_str::<Value>(&self.data)? {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::InvalidData(format!(
                    "{} holds {} instead of an object",
                    self.path, other
                )));
            }
        };
        Ok(Document {
            path: DocPath::parse(&self.path)?,
            data,
            seq: self.seq,
        })
    }
}
