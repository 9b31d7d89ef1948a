//! In-memory session for exercising the pipeline without PostgreSQL.

use crate::import::data_structures::{ColumnDescriptor, Row};
use crate::import::recorder::NewUploadRecord;
use crate::import::session::{DatabaseSession, SessionFactory};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn write_csv(contents: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents).expect("write csv");
    file.flush().expect("flush csv");
    file
}

#[derive(Debug, Default)]
pub struct MockState {
    pub tables: HashMap<String, Vec<String>>,
    /// Successful inserts, in order.
    pub inserts: Vec<(String, Vec<Row>)>,
    pub records: Vec<NewUploadRecord>,
    pub events: Vec<&'static str>,
    pub opened: usize,
    pub released: usize,
    insert_attempts: usize,
    fail_insert_on: Option<usize>,
    fail_create: bool,
    fail_record: bool,
    insert_delay: Option<Duration>,
    cancel_after_insert: Option<(usize, CancellationToken)>,
}

impl MockState {
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inserts.iter().map(|(_, rows)| rows.len()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    pub fn add_table(&self, table: &str, columns: &[&str]) {
        self.state().tables.insert(
            table.to_string(),
            columns.iter().map(|column| column.to_string()).collect(),
        );
    }

    /// Fail the `n`th insert (1-based).
    pub fn fail_insert_on(&self, n: usize) {
        self.state().fail_insert_on = Some(n);
    }

    pub fn fail_create(&self) {
        self.state().fail_create = true;
    }

    pub fn fail_record(&self) {
        self.state().fail_record = true;
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        self.state().insert_delay = Some(delay);
    }

    /// Cancel `token` once the `n`th insert has completed.
    pub fn cancel_after_insert(&self, n: usize, token: CancellationToken) {
        self.state().cancel_after_insert = Some((n, token));
    }
}

#[rocket::async_trait]
impl SessionFactory for MockFactory {
    type Session = MockSession;

    async fn open(&self) -> Result<MockSession, sqlx::Error> {
        let mut state = self.state();
        state.opened += 1;
        state.events.push("open");
        Ok(MockSession {
            state: self.state.clone(),
        })
    }
}

pub struct MockSession {
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

#[rocket::async_trait]
impl DatabaseSession for MockSession {
    async fn table_exists(&mut self, table: &str) -> Result<bool, sqlx::Error> {
        Ok(self.state().tables.contains_key(table))
    }

    async fn table_columns(&mut self, table: &str) -> Result<Vec<String>, sqlx::Error> {
        Ok(self.state().tables.get(table).cloned().unwrap_or_default())
    }

    async fn create_table(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        _column_width: u32,
    ) -> Result<(), sqlx::Error> {
        let mut state = self.state();
        if state.fail_create {
            return Err(sqlx::Error::Protocol("create table refused".into()));
        }
        state.events.push("create");
        state.tables.insert(
            table.to_string(),
            columns.iter().map(|column| column.sanitized.clone()).collect(),
        );
        Ok(())
    }

    async fn insert_rows(
        &mut self,
        table: &str,
        _columns: &[ColumnDescriptor],
        rows: &[Row],
    ) -> Result<u64, sqlx::Error> {
        let delay = {
            let mut state = self.state();
            state.insert_attempts += 1;
            if state.fail_insert_on == Some(state.insert_attempts) {
                return Err(sqlx::Error::Protocol("insert rejected".into()));
            }
            state.insert_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.events.push("insert");
        state.inserts.push((table.to_string(), rows.to_vec()));
        if let Some((n, token)) = &state.cancel_after_insert {
            if state.inserts.len() == *n {
                token.cancel();
            }
        }
        Ok(rows.len() as u64)
    }

    async fn record_upload(&mut self, record: &NewUploadRecord) -> Result<(), sqlx::Error> {
        let mut state = self.state();
        if state.fail_record {
            return Err(sqlx::Error::Protocol("history table unavailable".into()));
        }
        state.events.push("record");
        state.records.push(record.clone());
        Ok(())
    }

    async fn release(self) {
        let mut state = self.state();
        state.released += 1;
        state.events.push("release");
    }
}
