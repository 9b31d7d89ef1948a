//! Inspection and cancellation of running imports.

use crate::error::ApiError;
use crate::import::{ImportRegistry, ImportStatus};
use crate::models::{DataResponse, MessageResponse};
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use uuid::Uuid;

/// Imports currently in progress.
#[openapi(tag = "Imports")]
#[get("/imports")]
pub async fn list_imports(registry: &State<ImportRegistry>) -> Json<DataResponse<Vec<ImportStatus>>> {
    Json(DataResponse {
        data: registry.list().await,
    })
}

/// Cancel a running import. Rows already written are kept.
#[openapi(tag = "Imports")]
#[post("/imports/<id>/cancel")]
pub async fn cancel_import(
    id: String,
    registry: &State<ImportRegistry>,
) -> Result<Json<MessageResponse>, ApiError> {
    let import_id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("Invalid import id '{id}'")))?;

    if registry.cancel(import_id).await {
        Ok(Json(MessageResponse {
            message: format!("Cancellation requested for import {import_id}"),
        }))
    } else {
        Err(ApiError::NotFound(format!("Import '{import_id}' not found")))
    }
}
