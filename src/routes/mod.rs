//! HTTP route handlers.
//!
//! JSON endpoints under `/api/v1` are annotated with `#[openapi]` so
//! `rocket_okapi` can derive the OpenAPI document. The multipart upload
//! endpoint is mounted at the root outside the generated document.

pub mod health;
pub mod history;
pub mod imports;
pub mod uploads;
