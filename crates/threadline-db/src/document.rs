use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::path::DocPath;

pub type Fields = Map<String, Value>;

/// A stored document as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub data: Fields,
    /// Insertion order within the store. Breaks ties between equal sort keys.
    pub seq: i64,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    pub fn get_timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get_str(field).and_then(decode_timestamp)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.data.clone()))
            .map_err(|e| StoreError::InvalidData(format!("{}: {}", self.path, e)))
    }
}

/// Timestamps are stored as fixed-width RFC 3339 strings so that string
/// order and time order agree.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn encode_timestamp(ts: DateTime<Utc>) -> Value {
    Value::String(format_timestamp(ts))
}

pub fn decode_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// A field value in a write.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the commit time when the write is applied.
    ServerTimestamp,
}

/// Field map for set/update operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteData {
    fields: BTreeMap<String, FieldValue>,
}

impl WriteData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields
            .insert(field.to_string(), FieldValue::Value(value.into()));
        self
    }

    pub fn with_server_timestamp(mut self, field: &str) -> Self {
        self.fields
            .insert(field.to_string(), FieldValue::ServerTimestamp);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn resolve(&self, commit_time: DateTime<Utc>) -> Fields {
        self.fields
            .iter()
            .map(|(field, value)| {
                let value = match value {
                    FieldValue::Value(v) => v.clone(),
                    FieldValue::ServerTimestamp => encode_timestamp(commit_time),
                };
                (field.clone(), value)
            })
            .collect()
    }
}

/// One operation of a batch or transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or overwrite. With `merge`, fields not named are kept.
    Set {
        path: DocPath,
        data: WriteData,
        merge: bool,
    },
    /// Merge fields into an existing document; fails if it does not exist.
    Update { path: DocPath, data: WriteData },
    /// Remove the document. Removing a missing document is not an error.
    Delete { path: DocPath },
}

impl WriteOp {
    pub fn set(path: DocPath, data: WriteData) -> Self {
        Self::Set {
            path,
            data,
            merge: false,
        }
    }

    pub fn set_merge(path: DocPath, data: WriteData) -> Self {
        Self::Set {
            path,
            data,
            merge: true,
        }
    }

    pub fn update(path: DocPath, data: WriteData) -> Self {
        Self::Update { path, data }
    }

    pub fn delete(path: DocPath) -> Self {
        Self::Delete { path }
    }

    pub fn path(&self) -> &DocPath {
        match self {
            Self::Set { path, .. } | Self::Update { path, .. } | Self::Delete { path } => path,
        }
    }

    /// Field data for set/update, `None` for delete.
    pub fn data(&self) -> Option<&WriteData> {
        match self {
            Self::Set { data, .. } | Self::Update { data, .. } => Some(data),
            Self::Delete { .. } => None,
        }
    }
}
