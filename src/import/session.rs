//! Database seams used by the import pipeline.
//!
//! The coordinator only talks to the database through these traits, so the
//! whole pipeline can run against an in-memory session in tests. The
//! PostgreSQL implementation lives in [`crate::db`].

use crate::import::data_structures::{ColumnDescriptor, Row};
use crate::import::recorder::NewUploadRecord;

/// One exclusively owned database session for the lifetime of an import.
#[rocket::async_trait]
pub trait DatabaseSession: Send {
    /// Whether `table` exists in the current schema.
    async fn table_exists(&mut self, table: &str) -> Result<bool, sqlx::Error>;

    /// Column names of an existing `table`, in ordinal order.
    async fn table_columns(&mut self, table: &str) -> Result<Vec<String>, sqlx::Error>;

    /// Create `table` with an identity key and one text column per descriptor.
    async fn create_table(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        column_width: u32,
    ) -> Result<(), sqlx::Error>;

    /// Insert all `rows` with a single statement, returning rows affected.
    async fn insert_rows(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        rows: &[Row],
    ) -> Result<u64, sqlx::Error>;

    /// Append one provenance record.
    async fn record_upload(&mut self, record: &NewUploadRecord) -> Result<(), sqlx::Error>;

    /// Give the session back. Called exactly once on every exit path.
    async fn release(self);
}

/// Source of fresh sessions, one per import.
#[rocket::async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: DatabaseSession;

    async fn open(&self) -> Result<Self::Session, sqlx::Error>;
}
