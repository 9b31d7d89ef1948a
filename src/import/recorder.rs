//! Upload provenance: one append-only record per completed import.

use crate::import::session::DatabaseSession;
use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// Provenance for an import that just finished writing rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUploadRecord {
    pub table_name: String,
    pub file_name: String,
    pub row_count: u64,
    /// Identifier of whoever submitted the file; may be empty.
    pub submitted_by: String,
}

/// A persisted provenance record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct UploadRecord {
    pub id: i32,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "tableName")]
    pub table_name: String,
    #[serde(rename = "rowCount")]
    pub row_count: i64,
    #[serde(rename = "submittedBy")]
    pub submitted_by: String,
    #[serde(rename = "uploadedAt")]
    pub uploaded_at: DateTime<Utc>,
}

/// Append the provenance record for a finished import.
///
/// Runs after every batch is confirmed. A failure here does not undo the
/// rows already inserted.
pub async fn record_upload<S: DatabaseSession>(
    session: &mut S,
    record: &NewUploadRecord,
) -> Result<(), sqlx::Error> {
    session.record_upload(record).await?;
    log::info!(
        "upload history logged: {} -> {} ({} rows)",
        record.file_name,
        record.table_name,
        record.row_count
    );
    Ok(())
}

/// Most recent provenance records, newest first.
pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<UploadRecord>, sqlx::Error> {
    sqlx::query_as::<_, UploadRecord>(
        r#"SELECT id, file_name, table_name, row_count, submitted_by, uploaded_at
           FROM upload_history
           ORDER BY uploaded_at DESC, id DESC
           LIMIT $1"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
