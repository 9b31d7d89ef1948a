//! PostgreSQL pool and the per-import session built on it.

use crate::config::DatabaseConfig;
use crate::import::data_structures::{ColumnDescriptor, Row};
use crate::import::database_operations;
use crate::import::recorder::NewUploadRecord;
use crate::import::session::{DatabaseSession, SessionFactory};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use std::time::Duration;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open the shared connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    log::info!(
        "connecting to postgres at {}:{}/{} (sslmode {:?})",
        config.host,
        config.port,
        config.database,
        config.ssl_mode()
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(config.connect_options())
        .await
}

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

/// Hands out one pooled connection per import.
#[derive(Debug, Clone)]
pub struct PgSessionFactory {
    pool: PgPool,
}

impl PgSessionFactory {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[rocket::async_trait]
impl SessionFactory for PgSessionFactory {
    type Session = PgSession;

    async fn open(&self) -> Result<PgSession, sqlx::Error> {
        let conn = self.pool.acquire().await?;
        Ok(PgSession { conn })
    }
}

/// A connection held exclusively by one import.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

#[rocket::async_trait]
impl DatabaseSession for PgSession {
    async fn table_exists(&mut self, table: &str) -> Result<bool, sqlx::Error> {
        database_operations::table_exists(&mut self.conn, table).await
    }

    async fn table_columns(&mut self, table: &str) -> Result<Vec<String>, sqlx::Error> {
        database_operations::table_columns(&mut self.conn, table).await
    }

    async fn create_table(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        column_width: u32,
    ) -> Result<(), sqlx::Error> {
        database_operations::create_table(&mut self.conn, table, columns, column_width).await
    }

    async fn insert_rows(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        rows: &[Row],
    ) -> Result<u64, sqlx::Error> {
        database_operations::insert_rows_batch(&mut self.conn, table, columns, rows).await
    }

    async fn record_upload(&mut self, record: &NewUploadRecord) -> Result<(), sqlx::Error> {
        database_operations::insert_upload_record(&mut self.conn, record).await
    }

    async fn release(self) {
        // Closed rather than returned: an import that failed mid-statement
        // may leave the connection in an unknown state.
        if let Err(err) = self.conn.close().await {
            log::warn!("failed to close import session: {}", err);
        }
    }
}
