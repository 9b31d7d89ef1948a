//! Destination table provisioning.
//!
//! Creates the table for an import when it does not exist yet. An existing
//! table is never altered: by default its columns are not compared with the
//! incoming header, so a re-import with a different header shape fails later
//! at insert time. Setting `verify_existing` turns that into an early
//! [`SchemaError::ColumnMismatch`].

use crate::import::data_structures::ColumnSet;
use crate::import::error::SchemaError;
use crate::import::session::DatabaseSession;
use std::collections::HashSet;

/// What provisioning did to the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Created,
    Existing,
}

/// Ensure `table` exists with one text column per sanitized header.
pub async fn ensure_table<S: DatabaseSession>(
    session: &mut S,
    table: &str,
    columns: &ColumnSet,
    column_width: u32,
    verify_existing: bool,
) -> Result<TableStatus, SchemaError> {
    if session.table_exists(table).await? {
        if verify_existing {
            verify_columns(session, table, columns).await?;
        }
        log::info!("table \"{}\" already exists, leaving schema untouched", table);
        return Ok(TableStatus::Existing);
    }

    session
        .create_table(table, columns.as_slice(), column_width)
        .await?;

    log::info!("table \"{}\" is ready ({} columns)", table, columns.len());
    Ok(TableStatus::Created)
}

async fn verify_columns<S: DatabaseSession>(
    session: &mut S,
    table: &str,
    columns: &ColumnSet,
) -> Result<(), SchemaError> {
    let existing: HashSet<String> = session.table_columns(table).await?.into_iter().collect();

    let missing: Vec<String> = columns
        .sanitized_names()
        .filter(|name| !existing.contains(*name))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::ColumnMismatch {
            table: table.to_string(),
            missing,
        })
    }
}
