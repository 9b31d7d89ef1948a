//! Streaming import coordination.
//!
//! [`CsvImporter`] drives one file through the pipeline:
//! 1. Read the header row and derive sanitized columns and the batch size
//! 2. Open a database session and provision the destination table
//! 3. Stream rows into a bounded batch, inserting each full batch before
//!    reading further
//! 4. Flush the final partial batch once the reader signals end of input
//! 5. Record upload provenance and release the session
//!
//! The reader task and this loop only communicate through a bounded
//! channel. End of input is queued behind the rows before it, so it is seen
//! only after every earlier batch has been written, and batches are never
//! inserted concurrently.

use crate::config::ImportConfig;
use crate::import::data_structures::{Batch, ColumnSet, rows_per_batch};
use crate::import::error::{ImportError, ImportResult};
use crate::import::recorder::{self, NewUploadRecord};
use crate::import::schema::{self, TableStatus};
use crate::import::session::{DatabaseSession, SessionFactory};
use crate::import::source::RowSource;
use crate::import::stats::ImportOutcome;
use crate::import::tracker::{ImportPhase, ImportTracker};
use std::path::PathBuf;

/// What to import and where.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub file_path: PathBuf,
    pub table_name: String,
    /// Identifier of the submitter; may be empty.
    pub submitted_by: String,
    /// Name recorded in upload history. Defaults to the file's base name.
    pub file_name: String,
}

impl ImportRequest {
    pub fn new(
        file_path: impl Into<PathBuf>,
        table_name: impl Into<String>,
        submitted_by: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            file_path,
            table_name: table_name.into(),
            submitted_by: submitted_by.into(),
            file_name,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }
}

/// Imports CSV files into per-file tables, one session per import.
pub struct CsvImporter<F> {
    factory: F,
    config: ImportConfig,
}

impl<F: SessionFactory> CsvImporter<F> {
    pub fn new(factory: F, config: ImportConfig) -> Self {
        Self { factory, config }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Import `request` with a private tracker.
    pub async fn import(&self, request: &ImportRequest) -> ImportResult<ImportOutcome> {
        let tracker = ImportTracker::new(&request.file_name, &request.table_name);
        self.import_tracked(request, &tracker).await
    }

    /// Import `request`, reporting progress to and honouring cancellation
    /// from `tracker`.
    ///
    /// Returns exactly one terminal outcome. On failure nothing is rolled
    /// back; the error carries how many rows were already written.
    pub async fn import_tracked(
        &self,
        request: &ImportRequest,
        tracker: &ImportTracker,
    ) -> ImportResult<ImportOutcome> {
        log::info!(
            "import {}: {} -> \"{}\"",
            tracker.id(),
            request.file_name,
            request.table_name
        );

        let result = self.run(request, tracker).await;

        match &result {
            Ok(outcome) => {
                tracker.set_phase(ImportPhase::Done).await;
                log::info!(
                    "import {}: complete, {} rows in {} batches",
                    tracker.id(),
                    outcome.rows_imported,
                    outcome.batches
                );
            }
            Err(err) => {
                tracker.fail(err.to_string()).await;
                log::error!("import {}: {} failed: {}", tracker.id(), request.file_name, err);
            }
        }

        result
    }

    async fn run(
        &self,
        request: &ImportRequest,
        tracker: &ImportTracker,
    ) -> ImportResult<ImportOutcome> {
        if request.table_name.trim().is_empty() {
            return Err(ImportError::InvalidTableName(request.table_name.clone()));
        }

        let mut source = RowSource::spawn(request.file_path.clone(), self.config.channel_capacity);
        let result = self.drive(&mut source, request, tracker).await;
        source.abort();
        result
    }

    async fn drive(
        &self,
        source: &mut RowSource,
        request: &ImportRequest,
        tracker: &ImportTracker,
    ) -> ImportResult<ImportOutcome> {
        let cancel = tracker.cancellation_token().clone();

        let headers = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ImportError::Cancelled { rows_written: 0 }),
            headers = source.header() => headers
                .map_err(|err| ImportError::SourceRead { rows_written: 0, source: err })?,
        };

        let columns = ColumnSet::from_headers(&headers);
        if columns.is_empty() {
            return Err(ImportError::EmptyHeader);
        }

        let limit = rows_per_batch(self.config.max_bind_params, columns.len());
        log::debug!(
            "import {}: {} columns, {} rows per batch (budget {} parameters)",
            tracker.id(),
            columns.len(),
            limit,
            self.config.max_bind_params
        );

        let mut session = self.factory.open().await.map_err(ImportError::Session)?;

        let run = ImportRun {
            session: &mut session,
            tracker,
            request,
            columns,
            batch: Batch::with_limit(limit),
            rows_written: 0,
            batches_written: 0,
            phase: ImportPhase::AwaitingHeader,
        };
        let result = run.execute(source, &self.config).await;

        session.release().await;
        result
    }
}

/// State of one import between opening and releasing its session.
struct ImportRun<'a, S> {
    session: &'a mut S,
    tracker: &'a ImportTracker,
    request: &'a ImportRequest,
    columns: ColumnSet,
    batch: Batch,
    /// Rows confirmed written. Only advanced after an insert succeeds.
    rows_written: u64,
    batches_written: u64,
    phase: ImportPhase,
}

impl<S: DatabaseSession> ImportRun<'_, S> {
    async fn execute(
        mut self,
        source: &mut RowSource,
        config: &ImportConfig,
    ) -> ImportResult<ImportOutcome> {
        let table_status = self.provision(config).await?;
        self.stream(source).await?;
        self.drain().await?;
        self.finalize().await?;

        Ok(ImportOutcome {
            file_name: self.request.file_name.clone(),
            table_name: self.request.table_name.clone(),
            rows_imported: self.rows_written,
            batches: self.batches_written,
            rows_per_batch: self.batch.limit(),
            table_created: table_status == TableStatus::Created,
            columns: self.columns.into_vec(),
        })
    }

    async fn advance(&mut self, next: ImportPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid import transition {:?} -> {:?}",
            self.phase,
            next
        );
        log::debug!("import {}: {:?} -> {:?}", self.tracker.id(), self.phase, next);
        self.phase = next;
        self.tracker.set_phase(next).await;
    }

    async fn provision(&mut self, config: &ImportConfig) -> ImportResult<TableStatus> {
        self.advance(ImportPhase::Provisioning).await;

        let table = self.request.table_name.as_str();
        schema::ensure_table(
            &mut *self.session,
            table,
            &self.columns,
            config.column_width,
            config.verify_existing_schema,
        )
        .await
        .map_err(|err| ImportError::Schema {
            table: table.to_string(),
            source: err,
        })
    }

    async fn stream(&mut self, source: &mut RowSource) -> ImportResult<()> {
        self.advance(ImportPhase::Streaming).await;
        let cancel = self.tracker.cancellation_token().clone();

        loop {
            // Rows are only pulled while no insert is pending, so a full
            // channel holds the reader back until the batch is written.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.abandon()),
                next = source.next_row() => next,
            };

            let rows_written = self.rows_written;
            let row = next.map_err(|err| ImportError::SourceRead {
                rows_written,
                source: err,
            })?;

            match row {
                Some(row) => {
                    self.batch.push(row);
                    if self.batch.is_full() {
                        self.flush().await?;
                    }
                }
                None => return Ok(()),
            }
        }
    }

    async fn drain(&mut self) -> ImportResult<()> {
        self.advance(ImportPhase::Draining).await;
        self.flush().await
    }

    async fn finalize(&mut self) -> ImportResult<()> {
        self.advance(ImportPhase::Finalizing).await;

        let record = NewUploadRecord {
            table_name: self.request.table_name.clone(),
            file_name: self.request.file_name.clone(),
            row_count: self.rows_written,
            submitted_by: self.request.submitted_by.clone(),
        };

        let rows_written = self.rows_written;
        recorder::record_upload(&mut *self.session, &record)
            .await
            .map_err(|err| ImportError::Record {
                rows_written,
                source: err,
            })
    }

    /// Write the buffered rows, if any, as one insert statement.
    async fn flush(&mut self) -> ImportResult<()> {
        let rows = self.batch.take();
        if rows.is_empty() {
            return Ok(());
        }

        let batch_offset = self.rows_written;
        let inserted = self
            .session
            .insert_rows(&self.request.table_name, self.columns.as_slice(), &rows)
            .await
            .map_err(|err| ImportError::Insert {
                batch_offset,
                source: err,
            })?;

        if inserted != rows.len() as u64 {
            log::warn!(
                "import {}: batch at row {} reported {} rows affected for {} rows",
                self.tracker.id(),
                batch_offset,
                inserted,
                rows.len()
            );
        }

        self.rows_written += rows.len() as u64;
        self.batches_written += 1;
        self.tracker.set_rows_written(self.rows_written).await;

        log::debug!(
            "import {}: batch {} wrote {} rows ({} total)",
            self.tracker.id(),
            self.batches_written,
            rows.len(),
            self.rows_written
        );
        Ok(())
    }

    fn abandon(&mut self) -> ImportError {
        let dropped = self.batch.abandon();
        log::warn!(
            "import {}: cancelled after {} rows, {} buffered rows abandoned",
            self.tracker.id(),
            self.rows_written,
            dropped
        );
        ImportError::Cancelled {
            rows_written: self.rows_written,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::error::{SchemaError, SourceError};
    use crate::import::testing::{MockFactory, write_csv};
    use std::time::Duration;

    fn config(max_bind_params: usize) -> ImportConfig {
        ImportConfig {
            max_bind_params,
            channel_capacity: 16,
            ..ImportConfig::default()
        }
    }

    fn people_csv(rows: usize) -> tempfile::NamedTempFile {
        let mut contents = String::from("Name,Age\n");
        for i in 0..rows {
            contents.push_str(&format!("person{},{}\n", i, 20 + i));
        }
        write_csv(contents.as_bytes())
    }

    #[tokio::test]
    async fn test_small_file_single_batch() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(2100));
        let file = write_csv(b"Name,Age\nAda,36\nGrace,85\nLinus,\n");

        let request = ImportRequest::new(file.path(), "people", "ops@example.com")
            .with_file_name("people.csv");
        let outcome = importer.import(&request).await.expect("import succeeds");

        assert_eq!(outcome.rows_imported, 3);
        assert_eq!(outcome.batches, 1);
        assert_eq!(outcome.rows_per_batch, 1050);
        assert!(outcome.table_created);

        let state = factory.state();
        assert_eq!(state.tables["people"], vec!["Name", "Age"]);
        assert_eq!(state.batch_sizes(), vec![3]);
        assert_eq!(state.inserts[0].1[2].values(), &[Some("Linus".to_string()), None]);

        assert_eq!(state.records.len(), 1);
        let record = &state.records[0];
        assert_eq!(record.row_count, 3);
        assert_eq!(record.file_name, "people.csv");
        assert_eq!(record.table_name, "people");
        assert_eq!(record.submitted_by, "ops@example.com");

        assert_eq!(state.opened, 1);
        assert_eq!(state.released, 1);
    }

    #[tokio::test]
    async fn test_batches_respect_parameter_budget() {
        let factory = MockFactory::new();
        // 2 columns, 7 parameters -> 3 rows per batch
        let importer = CsvImporter::new(factory.clone(), config(7));
        let file = people_csv(10);

        let outcome = importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect("import succeeds");

        assert_eq!(outcome.rows_per_batch, 3);
        let state = factory.state();
        assert_eq!(state.batch_sizes(), vec![3, 3, 3, 1]);
        assert!(state.batch_sizes().iter().all(|size| *size <= 3));
        assert_eq!(state.records[0].row_count, 10);
        assert_eq!(state.batch_sizes().iter().sum::<usize>(), 10);
    }

    #[tokio::test]
    async fn test_exact_multiple_issues_no_empty_insert() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(4));
        let file = people_csv(4);

        importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect("import succeeds");

        let state = factory.state();
        assert_eq!(state.batch_sizes(), vec![2, 2]);
        assert_eq!(state.records[0].row_count, 4);
    }

    #[tokio::test]
    async fn test_wide_file_inserts_row_by_row() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(2100));

        let header: Vec<String> = (0..2100).map(|i| format!("c{}", i)).collect();
        let row: Vec<String> = (0..2100).map(|i| i.to_string()).collect();
        let mut contents = header.join(",");
        contents.push('\n');
        for _ in 0..3 {
            contents.push_str(&row.join(","));
            contents.push('\n');
        }
        let file = write_csv(contents.as_bytes());

        let outcome = importer
            .import(&ImportRequest::new(file.path(), "wide", ""))
            .await
            .expect("import succeeds");

        assert_eq!(outcome.rows_per_batch, 1);
        assert_eq!(factory.state().batch_sizes(), vec![1, 1, 1]);
        assert_eq!(outcome.rows_imported, 3);
    }

    #[tokio::test]
    async fn test_insert_failure_keeps_earlier_batches() {
        let factory = MockFactory::new();
        factory.fail_insert_on(2);
        let importer = CsvImporter::new(factory.clone(), config(4));
        let file = people_csv(6);

        let err = importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect_err("second batch fails");

        match &err {
            ImportError::Insert { batch_offset, .. } => {
                assert_eq!(*batch_offset, 2);
                assert_eq!(err.rows_written(), 2);
            }
            other => panic!("expected insert error, got {other:?}"),
        }

        let state = factory.state();
        assert_eq!(state.batch_sizes(), vec![2]);
        assert!(state.records.is_empty());
        assert_eq!(state.released, 1);
    }

    #[tokio::test]
    async fn test_end_of_input_during_slow_insert() {
        let factory = MockFactory::new();
        factory.set_insert_delay(Duration::from_millis(50));
        let importer = CsvImporter::new(factory.clone(), config(4));
        let file = people_csv(5);

        let outcome = importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect("import succeeds");

        assert_eq!(outcome.rows_imported, 5);
        let state = factory.state();
        assert_eq!(state.batch_sizes(), vec![2, 2, 1]);
        assert_eq!(state.records.len(), 1);
        assert_eq!(state.records[0].row_count, 5);

        let names: Vec<Option<&str>> = state
            .inserts
            .iter()
            .flat_map(|(_, rows)| rows.iter().map(|row| row.get(0)))
            .collect();
        assert_eq!(
            names,
            vec![
                Some("person0"),
                Some("person1"),
                Some("person2"),
                Some("person3"),
                Some("person4"),
            ]
        );
        assert_eq!(
            state.events,
            vec!["open", "create", "insert", "insert", "insert", "record", "release"]
        );
    }

    #[tokio::test]
    async fn test_header_only_file_records_zero_rows() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(2100));
        let file = write_csv(b"Name,Age\n");

        let outcome = importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect("import succeeds");

        assert_eq!(outcome.rows_imported, 0);
        let state = factory.state();
        assert!(state.inserts.is_empty());
        assert_eq!(state.records[0].row_count, 0);
    }

    #[tokio::test]
    async fn test_empty_file_never_opens_session() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(2100));
        let file = write_csv(b"");

        let err = importer
            .import(&ImportRequest::new(file.path(), "empty", ""))
            .await
            .expect_err("empty header");

        assert!(matches!(err, ImportError::EmptyHeader));
        assert_eq!(factory.state().opened, 0);
    }

    #[tokio::test]
    async fn test_blank_table_name_rejected() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(2100));
        let file = people_csv(1);

        let err = importer
            .import(&ImportRequest::new(file.path(), "  ", ""))
            .await
            .expect_err("invalid table");

        assert!(matches!(err, ImportError::InvalidTableName(_)));
        assert_eq!(factory.state().opened, 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_source_error() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(2100));

        let err = importer
            .import(&ImportRequest::new("/nonexistent/people.csv", "people", ""))
            .await
            .expect_err("missing file");

        assert!(matches!(
            err,
            ImportError::SourceRead {
                source: SourceError::Io(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_latin1_file_imports_with_replacement_chars() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(4));
        let file = write_csv(b"Pr\xe9nom,Age\nJos\xe9,3\nb,2\nc,3\n\xff\xfe,4\n");

        let outcome = importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect("non-utf-8 bytes are decoded lossily");

        assert_eq!(outcome.rows_imported, 4);
        assert_eq!(outcome.columns[0].sanitized, "Pr_nom");
        assert_eq!(outcome.columns[0].original, "Pr\u{FFFD}nom");

        let state = factory.state();
        assert_eq!(state.tables["people"], vec!["Pr_nom", "Age"]);
        assert_eq!(state.inserts[0].1[0].get(0), Some("Jos\u{FFFD}"));
        assert_eq!(state.inserts[1].1[1].get(0), Some("\u{FFFD}\u{FFFD}"));
        assert_eq!(state.records[0].row_count, 4);
        assert_eq!(state.released, 1);
    }

    #[tokio::test]
    async fn test_schema_failure_aborts_before_rows() {
        let factory = MockFactory::new();
        factory.fail_create();
        let importer = CsvImporter::new(factory.clone(), config(2100));
        let file = people_csv(3);

        let err = importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect_err("create fails");

        assert!(matches!(
            err,
            ImportError::Schema {
                source: SchemaError::Database(_),
                ..
            }
        ));
        let state = factory.state();
        assert!(state.inserts.is_empty());
        assert_eq!(state.released, 1);
    }

    #[tokio::test]
    async fn test_existing_table_left_untouched() {
        let factory = MockFactory::new();
        factory.add_table("people", &["Name", "Age"]);
        let importer = CsvImporter::new(factory.clone(), config(2100));
        let file = people_csv(2);

        let outcome = importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect("import succeeds");

        assert!(!outcome.table_created);
        assert!(!factory.state().events.contains(&"create"));
    }

    #[tokio::test]
    async fn test_verify_existing_schema_detects_mismatch() {
        let factory = MockFactory::new();
        factory.add_table("people", &["Name"]);
        let importer = CsvImporter::new(
            factory.clone(),
            ImportConfig {
                verify_existing_schema: true,
                ..config(2100)
            },
        );
        let file = people_csv(2);

        let err = importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect_err("mismatch");

        match err {
            ImportError::Schema {
                source: SchemaError::ColumnMismatch { missing, .. },
                ..
            } => assert_eq!(missing, vec!["Age"]),
            other => panic!("expected column mismatch, got {other:?}"),
        }
        assert!(factory.state().inserts.is_empty());
    }

    #[tokio::test]
    async fn test_record_failure_keeps_rows() {
        let factory = MockFactory::new();
        factory.fail_record();
        let importer = CsvImporter::new(factory.clone(), config(2100));
        let file = people_csv(3);

        let err = importer
            .import(&ImportRequest::new(file.path(), "people", ""))
            .await
            .expect_err("record fails");

        assert!(matches!(err, ImportError::Record { rows_written: 3, .. }));
        let state = factory.state();
        assert_eq!(state.batch_sizes(), vec![3]);
        assert_eq!(state.released, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_header() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(2100));
        let file = people_csv(3);

        let request = ImportRequest::new(file.path(), "people", "");
        let tracker = ImportTracker::new(&request.file_name, &request.table_name);
        tracker.cancel();

        let err = importer
            .import_tracked(&request, &tracker)
            .await
            .expect_err("cancelled");

        assert!(matches!(err, ImportError::Cancelled { rows_written: 0 }));
        assert_eq!(factory.state().opened, 0);
        assert_eq!(tracker.status().await.phase, ImportPhase::Errored);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_abandons_buffer() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(4));
        let file = people_csv(10);

        let request = ImportRequest::new(file.path(), "people", "");
        let tracker = ImportTracker::new(&request.file_name, &request.table_name);
        factory.cancel_after_insert(1, tracker.cancellation_token().clone());

        let err = importer
            .import_tracked(&request, &tracker)
            .await
            .expect_err("cancelled");

        assert!(matches!(err, ImportError::Cancelled { rows_written: 2 }));
        let state = factory.state();
        assert_eq!(state.batch_sizes(), vec![2]);
        assert!(state.records.is_empty());
        assert_eq!(state.released, 1);
    }

    #[tokio::test]
    async fn test_tracker_reports_completion() {
        let factory = MockFactory::new();
        let importer = CsvImporter::new(factory.clone(), config(2100));
        let file = people_csv(3);

        let request = ImportRequest::new(file.path(), "people", "");
        let tracker = ImportTracker::new(&request.file_name, &request.table_name);
        importer
            .import_tracked(&request, &tracker)
            .await
            .expect("import succeeds");

        let status = tracker.status().await;
        assert_eq!(status.phase, ImportPhase::Done);
        assert_eq!(status.rows_written, 3);
    }
}
