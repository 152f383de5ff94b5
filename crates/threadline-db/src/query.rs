use std::cmp::Ordering;

use serde_json::Value;

use crate::document::Document;
use crate::path::{CollectionPath, DocPath};

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Documents directly inside one collection.
    Collection(CollectionPath),
    /// Documents in every collection with this name, under any parent.
    Group(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    FieldEquals { field: String, value: Value },
    DocumentId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    First(usize),
    /// The last N documents of the ordered result, still returned in order.
    Last(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub selector: Selector,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<Limit>,
}

impl Query {
    pub fn collection(path: CollectionPath) -> Self {
        Self {
            selector: Selector::Collection(path),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn collection_group(name: &str) -> Self {
        Self {
            selector: Selector::Group(name.to_string()),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Zero or one result: the document at `path`.
    pub fn document(path: &DocPath) -> Self {
        Self::collection(path.collection()).where_document_id(path.id())
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::FieldEquals {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_document_id(mut self, id: &str) -> Self {
        self.filters.push(Filter::DocumentId(id.to_string()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }

    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }

    /// Id required by a `DocumentId` filter, if any.
    pub fn document_id(&self) -> Option<&str> {
        self.filters.iter().find_map(|f| match f {
            Filter::DocumentId(id) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Whether a document at `path` could belong to this query's result.
    pub fn covers(&self, path: &DocPath) -> bool {
        let collection = path.collection();
        let in_scope = match &self.selector {
            Selector::Collection(c) => *c == collection,
            Selector::Group(name) => collection.name() == name,
        };
        in_scope && self.document_id().is_none_or(|id| path.id() == id)
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.covers(&doc.path)
            && self.filters.iter().all(|f| match f {
                Filter::FieldEquals { field, value } => doc.get(field) == Some(value),
                Filter::DocumentId(id) => doc.id() == id,
            })
    }

    /// Filter, order and window candidate documents.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();

        match &self.order_by {
            Some(order) => docs.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.field), b.get(&order.field))
                    .then(a.seq.cmp(&b.seq));
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            }),
            None => docs.sort_by(|a, b| a.path.cmp(&b.path)),
        }

        match self.limit {
            Some(Limit::First(n)) => docs.truncate(n),
            Some(Limit::Last(n)) => {
                let skip = docs.len().saturating_sub(n);
                docs.drain(..skip);
            }
            None => {}
        }
        docs
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Total order over field values: missing < null < bool < number < string,
/// then arrays and objects (compared by rank only).
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
