//! Progress tracking and cancellation for in-flight imports.

use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle of a single import.
///
/// `AwaitingHeader -> Provisioning -> Streaming -> Draining -> Finalizing -> Done`,
/// with `Errored` reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    AwaitingHeader,
    Provisioning,
    Streaming,
    Draining,
    Finalizing,
    Done,
    Errored,
}

impl ImportPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ImportPhase::Done | ImportPhase::Errored)
    }

    pub fn can_transition_to(self, next: ImportPhase) -> bool {
        use ImportPhase::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (_, Errored)
                | (AwaitingHeader, Provisioning)
                | (Provisioning, Streaming)
                | (Streaming, Draining)
                | (Draining, Finalizing)
                | (Finalizing, Done)
        )
    }
}

/// Snapshot of one import's progress.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImportStatus {
    pub id: Uuid,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "tableName")]
    pub table_name: String,
    pub phase: ImportPhase,
    #[serde(rename = "rowsWritten")]
    pub rows_written: u64,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

/// Shared handle onto one import's status and cancellation signal.
#[derive(Debug, Clone)]
pub struct ImportTracker {
    id: Uuid,
    status: Arc<Mutex<ImportStatus>>,
    cancellation_token: CancellationToken,
}

impl ImportTracker {
    /// A tracker that is not registered anywhere.
    pub fn new(file_name: &str, table_name: &str) -> Self {
        Self::with_token(file_name, table_name, CancellationToken::new())
    }

    fn with_token(file_name: &str, table_name: &str, cancellation_token: CancellationToken) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            status: Arc::new(Mutex::new(ImportStatus {
                id,
                file_name: file_name.to_string(),
                table_name: table_name.to_string(),
                phase: ImportPhase::AwaitingHeader,
                rows_written: 0,
                started_at: Utc::now(),
                error_message: None,
            })),
            cancellation_token,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn status(&self) -> ImportStatus {
        self.status.lock().await.clone()
    }

    pub async fn set_phase(&self, phase: ImportPhase) {
        self.status.lock().await.phase = phase;
    }

    pub async fn set_rows_written(&self, rows_written: u64) {
        self.status.lock().await.rows_written = rows_written;
    }

    pub async fn fail(&self, error: String) {
        let mut status = self.status.lock().await;
        status.phase = ImportPhase::Errored;
        status.error_message = Some(error);
    }

    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }
}

/// Server-wide registry of imports that are currently running.
#[derive(Debug, Clone, Default)]
pub struct ImportRegistry {
    imports: Arc<Mutex<HashMap<Uuid, ImportTracker>>>,
    shutdown: CancellationToken,
}

impl ImportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new import. Its token is cancelled on [`ImportRegistry::shutdown`].
    pub async fn register(&self, file_name: &str, table_name: &str) -> ImportTracker {
        let tracker =
            ImportTracker::with_token(file_name, table_name, self.shutdown.child_token());
        self.imports.lock().await.insert(tracker.id(), tracker.clone());
        tracker
    }

    /// Status of every registered import, oldest first.
    pub async fn list(&self) -> Vec<ImportStatus> {
        let trackers: Vec<ImportTracker> = self.imports.lock().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(trackers.len());
        for tracker in trackers {
            statuses.push(tracker.status().await);
        }
        statuses.sort_by_key(|status| status.started_at);
        statuses
    }

    /// Cancel one import. Returns false when the id is unknown.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.imports.lock().await.get(&id) {
            Some(tracker) => {
                tracker.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a finished import from the registry.
    pub async fn finish(&self, id: Uuid) {
        self.imports.lock().await.remove(&id);
    }

    /// Cancel every running import and any registered later.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
