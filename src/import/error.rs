use rocket::http::Status;
use thiserror::Error;

pub type ImportResult<T> = Result<T, ImportError>;

/// Failures raised while reading the source file.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv_async::Error),
    #[error("row source stopped without signalling end of input")]
    Disconnected,
    #[error("row source events arrived out of order")]
    OutOfOrder,
}

/// Failures raised while provisioning the destination table.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("existing table {table} is missing columns: {}", .missing.join(", "))]
    ColumnMismatch { table: String, missing: Vec<String> },
}

/// Terminal failure of one import. Every variant aborts the whole import.
///
/// Variants raised after rows started landing carry `rows_written`, the
/// number of rows durably inserted before the failure.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file has no header row")]
    EmptyHeader,
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
    #[error("failed to open database session: {0}")]
    Session(#[source] sqlx::Error),
    #[error("failed to read source after {rows_written} rows: {source}")]
    SourceRead {
        rows_written: u64,
        #[source]
        source: SourceError,
    },
    #[error("failed to provision table {table}: {source}")]
    Schema {
        table: String,
        #[source]
        source: SchemaError,
    },
    /// Batches land in order, so `batch_offset` is also the count of rows
    /// already written.
    #[error("insert of batch starting at row {batch_offset} failed: {source}")]
    Insert {
        batch_offset: u64,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to record upload after writing {rows_written} rows: {source}")]
    Record {
        rows_written: u64,
        #[source]
        source: sqlx::Error,
    },
    #[error("import cancelled after {rows_written} rows")]
    Cancelled { rows_written: u64 },
}

impl ImportError {
    /// Rows persisted before the failure.
    pub fn rows_written(&self) -> u64 {
        match self {
            ImportError::SourceRead { rows_written, .. }
            | ImportError::Insert {
                batch_offset: rows_written,
                ..
            }
            | ImportError::Record { rows_written, .. }
            | ImportError::Cancelled { rows_written } => *rows_written,
            ImportError::EmptyHeader
            | ImportError::InvalidTableName(_)
            | ImportError::Session(_)
            | ImportError::Schema { .. } => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::EmptyHeader => "EmptyHeader",
            ImportError::InvalidTableName(_) => "InvalidTableName",
            ImportError::Session(_) => "SessionError",
            ImportError::SourceRead { .. } => "SourceReadError",
            ImportError::Schema { .. } => "SchemaError",
            ImportError::Insert { .. } => "InsertError",
            ImportError::Record { .. } => "RecordError",
            ImportError::Cancelled { .. } => "Cancelled",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ImportError::EmptyHeader | ImportError::InvalidTableName(_) => Status::BadRequest,
            ImportError::SourceRead {
                source: SourceError::Csv(_),
                ..
            } => Status::BadRequest,
            ImportError::Schema {
                source: SchemaError::ColumnMismatch { .. },
                ..
            } => Status::Conflict,
            ImportError::Cancelled { .. } => Status::ServiceUnavailable,
            ImportError::SourceRead { .. }
            | ImportError::Session(_)
            | ImportError::Schema { .. }
            | ImportError::Insert { .. }
            | ImportError::Record { .. } => Status::InternalServerError,
        }
    }
}
