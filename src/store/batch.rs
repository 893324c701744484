//! Write batch accumulator.

use super::reference::DocumentRef;
use super::value::Fields;
use super::{SetOptions, Write};

/// Most writes a single batch may carry.
pub const MAX_BATCH_WRITES: usize = 500;

/// Collects writes that are later committed atomically.
///
/// The batch itself does no validation; the store checks everything at
/// commit and applies all writes or none.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, doc: &DocumentRef, data: Fields) -> &mut Self {
        self.set_with(doc, data, SetOptions::default())
    }

    pub fn set_with(&mut self, doc: &DocumentRef, data: Fields, options: SetOptions) -> &mut Self {
        self.writes.push(Write::Set {
            doc: doc.clone(),
            data,
            options,
        });
        self
    }

    pub fn update(&mut self, doc: &DocumentRef, data: Fields) -> &mut Self {
        self.writes.push(Write::Update {
            doc: doc.clone(),
            data,
        });
        self
    }

    pub fn delete(&mut self, doc: &DocumentRef) -> &mut Self {
        self.writes.push(Write::Delete { doc: doc.clone() });
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}
