//! Multipart CSV upload endpoint.

use crate::config::UploadConfig;
use crate::db::PgSessionFactory;
use crate::error::ApiError;
use crate::import::sanitizer::sanitize_table_name;
use crate::import::{CsvImporter, ImportRegistry, ImportRequest, ImportStats};
use crate::models::UploadResponse;
use crate::notify::Notifications;
use rocket::State;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use std::path::Path;
use uuid::Uuid;

/// Multipart body of `POST /upload`.
#[derive(FromForm)]
pub struct UploadForm<'r> {
    #[field(name = "csvFile", default = Vec::new())]
    files: Vec<TempFile<'r>>,
    /// Identifier of the submitter, stored with each upload record.
    email: Option<String>,
}

/// Import every uploaded file, one after another, into its own table.
///
/// The first failing file aborts the request; files imported before it
/// stay committed. Each committed file triggers a completion email when
/// notifications are configured.
#[post("/upload", data = "<form>")]
pub async fn upload(
    mut form: Form<UploadForm<'_>>,
    importer: &State<CsvImporter<PgSessionFactory>>,
    registry: &State<ImportRegistry>,
    config: &State<UploadConfig>,
    notifications: &State<Notifications>,
) -> Result<Json<UploadResponse>, ApiError> {
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".to_string()));
    }
    if form.files.len() > config.max_files {
        return Err(ApiError::BadRequest(format!(
            "At most {} files may be uploaded at once",
            config.max_files
        )));
    }

    let submitted_by = form.email.as_deref().unwrap_or_default().trim().to_string();

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to prepare upload directory: {e}")))?;

    let mut files = Vec::with_capacity(form.files.len());
    let mut totals = ImportStats::default();

    for file in form.files.iter_mut() {
        let request = persist_upload(file, &config.upload_dir, &submitted_by).await?;

        let tracker = registry
            .register(&request.file_name, &request.table_name)
            .await;
        let result = importer.import_tracked(&request, &tracker).await;
        registry.finish(tracker.id()).await;

        let outcome = result?;
        notifications.upload_succeeded(&outcome);
        totals.record(&outcome);
        files.push(outcome);
    }

    log::info!(
        "upload complete: {} files, {} rows (submitted by {:?})",
        totals.files,
        totals.rows,
        submitted_by
    );

    Ok(Json(UploadResponse {
        message: "All CSV files uploaded and inserted successfully!".to_string(),
        files,
        totals,
    }))
}

/// Move an uploaded part into the upload directory and describe its import.
async fn persist_upload(
    file: &mut TempFile<'_>,
    upload_dir: &Path,
    submitted_by: &str,
) -> Result<ImportRequest, ApiError> {
    let original_name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .or_else(|| file.name().map(str::to_string))
        .unwrap_or_default();

    let table_name = sanitize_table_name(&original_name);
    let stored_path = upload_dir.join(format!("{}-{}.csv", Uuid::new_v4(), table_name));

    file.move_copy_to(&stored_path)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to store {original_name}: {e}")))?;

    log::debug!("stored upload {} at {}", original_name, stored_path.display());

    Ok(ImportRequest::new(stored_path, table_name, submitted_by).with_file_name(original_name))
}
