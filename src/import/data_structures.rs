//! In-memory shapes that flow through the import pipeline.
//!
//! Rows are positional: value `i` belongs to column `i` of the [`ColumnSet`]
//! derived from the header row, so duplicate original header names never
//! shadow each other.

use crate::import::sanitizer;
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars::JsonSchema;

/// Column name reserved for the destination table's primary key.
pub const RESERVED_ID_COLUMN: &str = "id";

/// A header string paired with the identifier it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDescriptor {
    pub original: String,
    pub sanitized: String,
}

/// Ordered column mapping for one import. Fixed once the header is read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    columns: Vec<ColumnDescriptor>,
}

impl ColumnSet {
    /// Derive the column mapping from a raw header row.
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Self {
        let sanitized =
            sanitizer::sanitize_column_names_reserving(headers, &[RESERVED_ID_COLUMN]);

        let columns = headers
            .iter()
            .zip(sanitized)
            .map(|(original, sanitized)| ColumnDescriptor {
                original: original.as_ref().to_string(),
                sanitized,
            })
            .collect();

        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnDescriptor> {
        self.columns.iter()
    }

    pub fn sanitized_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.sanitized.as_str())
    }

    pub fn as_slice(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn into_vec(self) -> Vec<ColumnDescriptor> {
        self.columns
    }
}

/// One data row, one slot per column. `None` is stored as SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    /// Build a row from raw CSV fields, aligned to `column_count`.
    ///
    /// Missing trailing fields and empty fields become NULL; fields beyond the
    /// header width are dropped.
    pub fn from_fields<I, S>(fields: I, column_count: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values: Vec<Option<String>> = fields
            .into_iter()
            .take(column_count)
            .map(|field| {
                let field = field.as_ref();
                if field.is_empty() {
                    None
                } else {
                    Some(field.to_string())
                }
            })
            .collect();
        values.resize(column_count, None);
        Self { values }
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|value| value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rows per insert statement that keep `rows * columns` within `max_params`.
///
/// Never less than one row, so a single wide row still gets its own statement.
pub fn rows_per_batch(max_params: usize, column_count: usize) -> usize {
    if column_count == 0 {
        return max_params.max(1);
    }
    (max_params / column_count).max(1)
}

/// Bounded buffer of rows awaiting one insert statement.
#[derive(Debug)]
pub struct Batch {
    rows: Vec<Row>,
    limit: usize,
}

impl Batch {
    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            rows: Vec::with_capacity(limit.min(4096)),
            limit,
        }
    }

    pub fn push(&mut self, row: Row) {
        debug_assert!(self.rows.len() < self.limit, "batch overfilled");
        self.rows.push(row);
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.limit
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Move the buffered rows out, leaving the batch empty.
    pub fn take(&mut self) -> Vec<Row> {
        std::mem::replace(&mut self.rows, Vec::with_capacity(self.limit.min(4096)))
    }

    /// Discard buffered rows without writing them.
    pub fn abandon(&mut self) -> usize {
        let dropped = self.rows.len();
        self.rows.clear();
        dropped
    }
}
