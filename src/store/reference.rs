//! Logical paths and the references they resolve to.
//!
//! A path is a slash-delimited list of names. Collections have an odd number
//! of names (`todos`, `users/u1/todos`), documents an even number
//! (`todos/a1`, `users/u1/profile/main`).

use std::fmt;

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::error::StoreError;

/// Length of store-generated document ids.
pub const AUTO_ID_LEN: usize = 20;

/// Generates a fresh random document id without writing anything.
pub fn auto_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LEN)
        .map(char::from)
        .collect()
}

fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::invalid_argument("path must not be empty"));
    }
    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(StoreError::invalid_argument(format!(
            "path '{}' contains an empty segment",
            path
        )));
    }
    Ok(parts)
}

/// Reference to a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    path: String,
}

impl DocumentRef {
    /// Parses a document path; the number of names must be even.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let parts = segments(path)?;
        if parts.len() % 2 != 0 {
            return Err(StoreError::invalid_argument(format!(
                "invalid document reference '{}': document paths need an even number of segments, got {}",
                path,
                parts.len()
            )));
        }
        Ok(Self {
            path: parts.join("/"),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// The collection containing this document.
    pub fn parent(&self) -> CollectionRef {
        let (parent, _) = self.path.rsplit_once('/').unwrap_or(("", &self.path));
        CollectionRef {
            path: parent.to_string(),
        }
    }

    /// A subcollection below this document.
    pub fn collection(&self, id: &str) -> Result<CollectionRef, StoreError> {
        CollectionRef::parse(&format!("{}/{}", self.path, id))
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Reference to a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRef {
    path: String,
}

impl CollectionRef {
    /// Parses a collection path; the number of names must be odd.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let parts = segments(path)?;
        if parts.len() % 2 == 0 {
            return Err(StoreError::invalid_argument(format!(
                "invalid collection reference '{}': collection paths need an odd number of segments, got {}",
                path,
                parts.len()
            )));
        }
        Ok(Self {
            path: parts.join("/"),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// The document owning this subcollection, if any.
    pub fn parent(&self) -> Option<DocumentRef> {
        self.path.rsplit_once('/').map(|(parent, _)| DocumentRef {
            path: parent.to_string(),
        })
    }

    /// A document in this collection.
    pub fn doc(&self, id: &str) -> Result<DocumentRef, StoreError> {
        DocumentRef::parse(&format!("{}/{}", self.path, id))
    }

    /// A document in this collection with a freshly generated id.
    pub fn new_doc(&self) -> DocumentRef {
        DocumentRef {
            path: format!("{}/{}", self.path, auto_id()),
        }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Either kind of reference, chosen by path shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Document(DocumentRef),
    Collection(CollectionRef),
}

impl Reference {
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        if segments(path)?.len() % 2 == 0 {
            DocumentRef::parse(path).map(Reference::Document)
        } else {
            CollectionRef::parse(path).map(Reference::Collection)
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Reference::Document(doc) => doc.path(),
            Reference::Collection(col) => col.path(),
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Reference::Document(_))
    }
}
