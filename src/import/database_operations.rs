//! SQL for the import pipeline.
//!
//! Table and column names cannot be bound as parameters, so they are always
//! passed through [`quote_identifier`]; every value is bound.

use crate::import::data_structures::{ColumnDescriptor, Row};
use crate::import::recorder::NewUploadRecord;
use sqlx::{PgConnection, Postgres, QueryBuilder};

/// Quote an identifier for PostgreSQL, doubling embedded quotes.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// `CREATE TABLE IF NOT EXISTS` for an import destination.
pub fn create_table_sql(table: &str, columns: &[ColumnDescriptor], column_width: u32) -> String {
    let mut definitions = Vec::with_capacity(columns.len() + 1);
    definitions.push("id INTEGER GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY".to_string());
    for column in columns {
        definitions.push(format!(
            "{} VARCHAR({}) NULL",
            quote_identifier(&column.sanitized),
            column_width
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_identifier(table),
        definitions.join(", ")
    )
}

/// Build one multi-row `INSERT ... VALUES` covering every row in `rows`.
///
/// Binds `rows.len() * columns.len()` parameters; callers size batches so
/// this stays within the parameter budget.
pub fn build_insert<'a>(
    table: &str,
    columns: &[ColumnDescriptor],
    rows: &'a [Row],
) -> QueryBuilder<'a, Postgres> {
    let column_list = columns
        .iter()
        .map(|column| quote_identifier(&column.sanitized))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        quote_identifier(table),
        column_list
    ));

    let width = columns.len();
    builder.push_values(rows, |mut values, row| {
        for index in 0..width {
            values.push_bind(row.get(index));
        }
    });

    builder
}

pub async fn table_exists(conn: &mut PgConnection, table: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT EXISTS (
               SELECT 1 FROM information_schema.tables
               WHERE table_schema = current_schema() AND table_name = $1
           )"#,
    )
    .bind(table)
    .fetch_one(conn)
    .await
}

pub async fn table_columns(
    conn: &mut PgConnection,
    table: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT column_name::text FROM information_schema.columns
           WHERE table_schema = current_schema() AND table_name = $1
           ORDER BY ordinal_position"#,
    )
    .bind(table)
    .fetch_all(conn)
    .await
}

pub async fn create_table(
    conn: &mut PgConnection,
    table: &str,
    columns: &[ColumnDescriptor],
    column_width: u32,
) -> Result<(), sqlx::Error> {
    let sql = create_table_sql(table, columns, column_width);
    log::trace!("create table: {}", sql);
    sqlx::query(&sql).execute(conn).await?;
    Ok(())
}

/// Insert a batch of rows with one statement.
///
/// # Returns
/// Number of rows inserted
pub async fn insert_rows_batch(
    conn: &mut PgConnection,
    table: &str,
    columns: &[ColumnDescriptor],
    rows: &[Row],
) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut builder = build_insert(table, columns, rows);
    let result = builder.build().execute(conn).await?;

    log::trace!("bulk inserted {} rows into {}", result.rows_affected(), table);
    Ok(result.rows_affected())
}

pub async fn insert_upload_record(
    conn: &mut PgConnection,
    record: &NewUploadRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO upload_history (file_name, table_name, row_count, submitted_by)
           VALUES ($1, $2, $3, $4)"#,
    )
    .bind(&record.file_name)
    .bind(&record.table_name)
    .bind(record.row_count as i64)
    .bind(&record.submitted_by)
    .execute(conn)
    .await?;

    Ok(())
}
