//! Query constraints and their evaluation.
//!
//! The binding layer treats constraints as opaque and forwards them to the
//! store untouched. Evaluation lives here so that stores built on in-process
//! data share one interpretation.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::reference::CollectionRef;
use super::value::{compare_values, field, same_type, values_equal, Value};
use super::Document;
use crate::error::StoreError;

/// Pseudo field naming the document id in filters and orderings.
pub const DOCUMENT_ID: &str = "__name__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOp {
    fn is_range(self) -> bool {
        matches!(
            self,
            FilterOp::LessThan
                | FilterOp::LessThanOrEqual
                | FilterOp::GreaterThan
                | FilterOp::GreaterThanOrEqual
        )
    }
}

impl FromStr for FilterOp {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(FilterOp::Equal),
            "!=" => Ok(FilterOp::NotEqual),
            "<" => Ok(FilterOp::LessThan),
            "<=" => Ok(FilterOp::LessThanOrEqual),
            ">" => Ok(FilterOp::GreaterThan),
            ">=" => Ok(FilterOp::GreaterThanOrEqual),
            "array-contains" => Ok(FilterOp::ArrayContains),
            "array-contains-any" => Ok(FilterOp::ArrayContainsAny),
            "in" => Ok(FilterOp::In),
            "not-in" => Ok(FilterOp::NotIn),
            other => Err(StoreError::invalid_argument(format!(
                "unknown filter operator '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            FilterOp::Equal => "==",
            FilterOp::NotEqual => "!=",
            FilterOp::LessThan => "<",
            FilterOp::LessThanOrEqual => "<=",
            FilterOp::GreaterThan => ">",
            FilterOp::GreaterThanOrEqual => ">=",
            FilterOp::ArrayContains => "array-contains",
            FilterOp::ArrayContainsAny => "array-contains-any",
            FilterOp::In => "in",
            FilterOp::NotIn => "not-in",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for Direction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(Direction::Ascending),
            "desc" | "descending" => Ok(Direction::Descending),
            other => Err(StoreError::invalid_argument(format!(
                "unknown order direction '{}'",
                other
            ))),
        }
    }
}

/// Where a pagination cursor sits: explicit order-by values or a document.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorPosition {
    Values(Vec<Value>),
    Document(Document),
}

impl From<Vec<Value>> for CursorPosition {
    fn from(values: Vec<Value>) -> Self {
        CursorPosition::Values(values)
    }
}

impl From<Document> for CursorPosition {
    fn from(doc: Document) -> Self {
        CursorPosition::Document(doc)
    }
}

impl From<&Document> for CursorPosition {
    fn from(doc: &Document) -> Self {
        CursorPosition::Document(doc.clone())
    }
}

/// One filter, ordering, limit or cursor unit of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Where {
        field: String,
        op: FilterOp,
        value: Value,
    },
    OrderBy {
        field: String,
        direction: Direction,
    },
    Limit(usize),
    StartAt(CursorPosition),
    StartAfter(CursorPosition),
    EndAt(CursorPosition),
    EndBefore(CursorPosition),
}

pub fn where_field(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Constraint {
    Constraint::Where {
        field: field.into(),
        op,
        value: value.into(),
    }
}

pub fn order_by(field: impl Into<String>, direction: Direction) -> Constraint {
    Constraint::OrderBy {
        field: field.into(),
        direction,
    }
}

pub fn limit(n: usize) -> Constraint {
    Constraint::Limit(n)
}

pub fn start_at(position: impl Into<CursorPosition>) -> Constraint {
    Constraint::StartAt(position.into())
}

pub fn start_after(position: impl Into<CursorPosition>) -> Constraint {
    Constraint::StartAfter(position.into())
}

pub fn end_at(position: impl Into<CursorPosition>) -> Constraint {
    Constraint::EndAt(position.into())
}

pub fn end_before(position: impl Into<CursorPosition>) -> Constraint {
    Constraint::EndBefore(position.into())
}

/// A collection plus the constraints applied to it. No constraints means the
/// whole collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: CollectionRef,
    constraints: Vec<Constraint>,
}

struct Bound<'a> {
    position: &'a CursorPosition,
    inclusive: bool,
}

impl Query {
    pub fn new(collection: CollectionRef) -> Self {
        Self {
            collection,
            constraints: Vec::new(),
        }
    }

    pub fn with(mut self, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Applies the constraints to the documents of the collection.
    pub fn execute(&self, mut docs: Vec<Document>) -> Vec<Document> {
        let orderings = self.orderings();
        let mut limit = None;
        let mut start = None;
        let mut end = None;
        for constraint in &self.constraints {
            match constraint {
                Constraint::Limit(n) => limit = Some(*n),
                Constraint::StartAt(p) => start = Some(Bound { position: p, inclusive: true }),
                Constraint::StartAfter(p) => start = Some(Bound { position: p, inclusive: false }),
                Constraint::EndAt(p) => end = Some(Bound { position: p, inclusive: true }),
                Constraint::EndBefore(p) => end = Some(Bound { position: p, inclusive: false }),
                Constraint::Where { .. } | Constraint::OrderBy { .. } => {}
            }
        }

        docs.retain(|doc| {
            self.filters_match(doc)
                && orderings
                    .iter()
                    .all(|(name, _)| field_of(doc, name).is_some())
        });
        docs.sort_by(|a, b| compare_docs(a, b, &orderings));

        if let Some(bound) = &start {
            docs.retain(|doc| {
                let ord = compare_to_cursor(doc, bound.position, &orderings);
                ord == Ordering::Greater || (bound.inclusive && ord == Ordering::Equal)
            });
        }
        if let Some(bound) = &end {
            docs.retain(|doc| {
                let ord = compare_to_cursor(doc, bound.position, &orderings);
                ord == Ordering::Less || (bound.inclusive && ord == Ordering::Equal)
            });
        }
        if let Some(n) = limit {
            docs.truncate(n);
        }
        docs
    }

    /// Explicit orderings, then the implicit ordering the store adds: the
    /// first range-filtered field when nothing is ordered, and finally the
    /// document id in the direction of the last ordering.
    fn orderings(&self) -> Vec<(String, Direction)> {
        let mut orderings: Vec<(String, Direction)> = self
            .constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::OrderBy { field, direction } => Some((field.clone(), *direction)),
                _ => None,
            })
            .collect();
        if orderings.is_empty() {
            let range_field = self.constraints.iter().find_map(|c| match c {
                Constraint::Where { field, op, .. } if op.is_range() => Some(field.clone()),
                _ => None,
            });
            if let Some(field) = range_field {
                orderings.push((field, Direction::Ascending));
            }
        }
        if !orderings.iter().any(|(name, _)| name == DOCUMENT_ID) {
            let direction = orderings.last().map(|(_, d)| *d).unwrap_or_default();
            orderings.push((DOCUMENT_ID.to_string(), direction));
        }
        orderings
    }

    fn filters_match(&self, doc: &Document) -> bool {
        self.constraints.iter().all(|c| match c {
            Constraint::Where { field, op, value } => filter_matches(doc, field, *op, value),
            _ => true,
        })
    }
}

fn field_of(doc: &Document, name: &str) -> Option<Value> {
    if name == DOCUMENT_ID {
        Some(Value::from(doc.id()))
    } else {
        field(doc.fields(), name).cloned()
    }
}

fn filter_matches(doc: &Document, name: &str, op: FilterOp, expected: &Value) -> bool {
    let Some(actual) = field_of(doc, name) else {
        return false;
    };
    match op {
        FilterOp::Equal => values_equal(&actual, expected),
        FilterOp::NotEqual => !actual.is_null() && !values_equal(&actual, expected),
        FilterOp::LessThan
        | FilterOp::LessThanOrEqual
        | FilterOp::GreaterThan
        | FilterOp::GreaterThanOrEqual => {
            if !same_type(&actual, expected) {
                return false;
            }
            let ord = compare_values(&actual, expected);
            match op {
                FilterOp::LessThan => ord == Ordering::Less,
                FilterOp::LessThanOrEqual => ord != Ordering::Greater,
                FilterOp::GreaterThan => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }
        }
        FilterOp::ArrayContains => actual
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(item, expected))),
        FilterOp::ArrayContainsAny => match (actual.as_array(), expected.as_array()) {
            (Some(items), Some(wanted)) => items
                .iter()
                .any(|item| wanted.iter().any(|w| values_equal(item, w))),
            _ => false,
        },
        FilterOp::In => expected
            .as_array()
            .is_some_and(|wanted| wanted.iter().any(|w| values_equal(&actual, w))),
        FilterOp::NotIn => {
            !actual.is_null()
                && expected
                    .as_array()
                    .is_some_and(|wanted| !wanted.iter().any(|w| values_equal(&actual, w)))
        }
    }
}

fn directed(ord: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Ascending => ord,
        Direction::Descending => ord.reverse(),
    }
}

fn compare_docs(a: &Document, b: &Document, orderings: &[(String, Direction)]) -> Ordering {
    for (name, direction) in orderings {
        let left = field_of(a, name).unwrap_or(Value::Null);
        let right = field_of(b, name).unwrap_or(Value::Null);
        let ord = directed(compare_values(&left, &right), *direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_to_cursor(
    doc: &Document,
    position: &CursorPosition,
    orderings: &[(String, Direction)],
) -> Ordering {
    let values: Vec<Value> = match position {
        CursorPosition::Values(values) => values.clone(),
        CursorPosition::Document(anchor) => orderings
            .iter()
            .map(|(name, _)| field_of(anchor, name).unwrap_or(Value::Null))
            .collect(),
    };
    for ((name, direction), cursor) in orderings.iter().zip(values.iter()) {
        let actual = field_of(doc, name).unwrap_or(Value::Null);
        let ord = directed(compare_values(&actual, cursor), *direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
