//! Import results and aggregate statistics.

use crate::import::data_structures::ColumnDescriptor;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Result of one successful import.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImportOutcome {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "tableName")]
    pub table_name: String,
    /// Rows durably inserted; equals the number of data rows in the file.
    #[serde(rename = "rowsImported")]
    pub rows_imported: u64,
    /// Insert statements issued.
    pub batches: u64,
    #[serde(rename = "rowsPerBatch")]
    pub rows_per_batch: usize,
    /// Whether this import created the destination table.
    #[serde(rename = "tableCreated")]
    pub table_created: bool,
    pub columns: Vec<ColumnDescriptor>,
}

/// Totals across several imports.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ImportStats {
    pub files: usize,
    pub rows: u64,
    pub batches: u64,
    #[serde(rename = "tablesCreated")]
    pub tables_created: usize,
}

impl ImportStats {
    /// Fold one finished import into the totals.
    pub fn record(&mut self, outcome: &ImportOutcome) {
        self.files += 1;
        self.rows += outcome.rows_imported;
        self.batches += outcome.batches;
        if outcome.table_created {
            self.tables_created += 1;
        }
    }
}
