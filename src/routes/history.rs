//! Upload provenance listing.

use crate::error::ApiError;
use crate::import::UploadRecord;
use crate::import::recorder;
use crate::models::DataResponse;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use sqlx::PgPool;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// Most recent uploads, newest first.
#[openapi(tag = "Uploads")]
#[get("/uploads?<limit>")]
pub async fn list_uploads(
    limit: Option<i64>,
    pool: &State<PgPool>,
) -> Result<Json<DataResponse<Vec<UploadRecord>>>, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let records = recorder::list_recent(pool.inner(), limit).await?;
    Ok(Json(DataResponse { data: records }))
}
