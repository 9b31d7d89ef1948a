//! Streaming CSV import pipeline.
//!
//! Each uploaded file becomes (or appends to) its own table:
//!
//! 1. **Source** (`source`) - Background reader parsing the file into rows
//! 2. **Sanitizing** (`sanitizer`) - Header and file names to safe identifiers
//! 3. **Schema** (`schema`) - Creates the destination table on first import
//! 4. **Database Operations** (`database_operations`) - Multi-row parameterized inserts
//! 5. **Coordination** (`coordinator`) - Drives one file from header to provenance record
//! 6. **Tracking** (`tracker`) - Progress snapshots and cancellation of running imports
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use crate::import::{CsvImporter, ImportRequest};
//!
//! let importer = CsvImporter::new(PgSessionFactory::from_pool(pool), ImportConfig::from_env());
//! let request = ImportRequest::new("uploads/people.csv", "people", "ops@example.com");
//!
//! let outcome = importer.import(&request).await?;
//! println!("Imported {} rows into {}", outcome.rows_imported, outcome.table_name);
//! ```

pub mod coordinator;
pub mod data_structures;
pub mod database_operations;
pub mod error;
pub mod recorder;
pub mod sanitizer;
pub mod schema;
pub mod session;
pub mod source;
pub mod stats;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{CsvImporter, ImportRequest};
pub use error::{ImportError, ImportResult, SchemaError, SourceError};
pub use recorder::{NewUploadRecord, UploadRecord};
pub use session::{DatabaseSession, SessionFactory};
pub use stats::{ImportOutcome, ImportStats};
pub use tracker::{ImportPhase, ImportRegistry, ImportStatus, ImportTracker};
