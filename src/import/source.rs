//! Background CSV reader feeding the import coordinator.
//!
//! The reader runs as its own task and hands events over a bounded channel:
//! one `Header`, then every data `Row`, then `End` (or an error). Once the
//! channel is full the reader waits, so at most `capacity` parsed rows sit
//! between the file and the inserter.

use crate::import::data_structures::Row;
use crate::import::error::SourceError;
use csv_async::{AsyncReaderBuilder, ByteRecord};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One event produced by the reader, in file order.
#[derive(Debug)]
pub enum SourceEvent {
    Header(Vec<String>),
    Row(Row),
    End,
}

type EventSender = mpsc::Sender<Result<SourceEvent, SourceError>>;

/// Handle to the background reader task.
pub struct RowSource {
    rx: mpsc::Receiver<Result<SourceEvent, SourceError>>,
    handle: JoinHandle<()>,
}

impl RowSource {
    /// Spawn a reader for the CSV file at `path`.
    pub fn spawn(path: PathBuf, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(Self::run(path, tx));
        Self { rx, handle }
    }

    /// Wait for the header row. An empty file yields an empty header.
    pub async fn header(&mut self) -> Result<Vec<String>, SourceError> {
        match self.rx.recv().await {
            Some(Ok(SourceEvent::Header(headers))) => Ok(headers),
            Some(Ok(SourceEvent::End)) => Ok(Vec::new()),
            Some(Ok(SourceEvent::Row(_))) => Err(SourceError::OutOfOrder),
            Some(Err(err)) => Err(err),
            None => Err(SourceError::Disconnected),
        }
    }

    /// Next data row, or `None` once the reader signalled end of input.
    ///
    /// Cancel safe: dropping the future never loses a row.
    pub async fn next_row(&mut self) -> Result<Option<Row>, SourceError> {
        match self.rx.recv().await {
            Some(Ok(SourceEvent::Row(row))) => Ok(Some(row)),
            Some(Ok(SourceEvent::End)) => Ok(None),
            Some(Ok(SourceEvent::Header(_))) => Err(SourceError::OutOfOrder),
            Some(Err(err)) => Err(err),
            None => Err(SourceError::Disconnected),
        }
    }

    /// Stop the reader task and discard anything it already parsed.
    pub fn abort(self) {
        drop(self.rx);
        self.handle.abort();
    }

    async fn run(path: PathBuf, tx: EventSender) {
        log::debug!("[source] reading {}", path.display());
        if let Err(err) = Self::read(&path, &tx).await {
            log::debug!("[source] {} failed: {}", path.display(), err);
            let _ = tx.send(Err(err)).await;
        }
    }

    async fn read(path: &PathBuf, tx: &EventSender) -> Result<(), SourceError> {
        let file = File::open(path).await?;
        let mut reader = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .create_reader(file);

        // Spreadsheet exports are often Latin-1; undecodable bytes become U+FFFD
        // and are sanitized like any other illegal character.
        let headers: Vec<String> = reader
            .byte_headers()
            .await?
            .iter()
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect();
        let column_count = headers.len();

        if tx.send(Ok(SourceEvent::Header(headers))).await.is_err() {
            return Ok(());
        }

        let mut record = ByteRecord::new();
        let mut rows = 0u64;
        while reader.read_byte_record(&mut record).await? {
            let row = Row::from_fields(record.iter().map(String::from_utf8_lossy), column_count);
            if tx.send(Ok(SourceEvent::Row(row))).await.is_err() {
                // Receiver gone: the import finished or was abandoned.
                return Ok(());
            }
            rows += 1;
        }

        log::debug!("[source] {} exhausted after {} rows", path.display(), rows);
        let _ = tx.send(Ok(SourceEvent::End)).await;
        Ok(())
    }
}
