use std::fmt;

use crate::error::StoreError;

/// Slash-separated path to a document: `collection/id[/collection/id...]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath(String);

/// Slash-separated path to a collection: `collection[/id/collection...]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPath(String);

fn check_segment(segment: &str) -> Result<(), StoreError> {
    if segment.trim().is_empty() || segment.contains('/') {
        return Err(StoreError::InvalidPath(format!("bad path segment {:?}", segment)));
    }
    Ok(())
}

fn count_segments(path: &str) -> Result<usize, StoreError> {
    let mut count = 0;
    for segment in path.split('/') {
        check_segment(segment)?;
        count += 1;
    }
    Ok(count)
}

impl DocPath {
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let count = count_segments(path)?;
        if count % 2 != 0 {
            return Err(StoreError::InvalidPath(format!("{} is not a document path", path)));
        }
        Ok(Self(path.to_string()))
    }

    /// Document id: the last segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// The collection this document lives in.
    pub fn collection(&self) -> CollectionPath {
        let (parent, _) = self.0.rsplit_once('/').unwrap_or_default();
        CollectionPath(parent.to_string())
    }

    pub fn child(&self, collection: &str) -> Result<CollectionPath, StoreError> {
        check_segment(collection)?;
        Ok(CollectionPath(format!("{}/{}", self.0, collection)))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CollectionPath {
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let count = count_segments(path)?;
        if count % 2 != 1 {
            return Err(StoreError::InvalidPath(format!("{} is not a collection path", path)));
        }
        Ok(Self(path.to_string()))
    }

    pub(crate) fn trusted(path: &'static str) -> Self {
        Self(path.to_string())
    }

    pub fn root(name: &str) -> Result<Self, StoreError> {
        check_segment(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn doc(&self, id: &str) -> Result<DocPath, StoreError> {
        check_segment(id)?;
        Ok(DocPath(format!("{}/{}", self.0, id)))
    }

    /// Collection name: the last segment. Collection-group queries match on it.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Owning document, `None` for root collections.
    pub fn parent(&self) -> Option<DocPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DocPath(parent.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
