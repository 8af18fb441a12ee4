use super::AppState;
use crate::document::Document;
use crate::error::{IngestError, OcrError, StoreError};
use crate::output::{OcrResult, PipelineRun};
use crate::pipeline::store::ResultStore;
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Upload field names accepted for the PDF.
const UPLOAD_FIELDS: [&str; 2] = ["pdf", "file"];

/// `{ images: [...] }` returned by the upload endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImagesResponse {
    pub images: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTextRequest {
    /// Base64 image bytes, optionally as a `data:` URI.
    pub image_data: String,
}

/// An error rendered as `{ "error": message }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{} {}", self.status, self.message);
        } else {
            debug!("{} {}", self.status, self.message);
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        let status = match &e {
            IngestError::MalformedInput { .. } | IngestError::EmptyDocument => {
                StatusCode::BAD_REQUEST
            }
            IngestError::AllPagesFailed { .. } | IngestError::PartialFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            IngestError::OcrNotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<OcrError> for ApiError {
    fn from(e: OcrError) -> Self {
        let status = match &e {
            OcrError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::InvalidKey { .. } => StatusCode::BAD_REQUEST,
            StoreError::Io { .. } | StoreError::Corrupt { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), format!("Failed to read upload: {}", e.body_text()))
    }
}

pub(super) async fn health() -> &'static str {
    "ok"
}

pub(super) async fn convert_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ImagesResponse>, ApiError> {
    let doc = read_upload(multipart).await?;
    let images = state.coordinator.rasterize_data_uris(&doc).await?;
    Ok(Json(ImagesResponse { images }))
}

pub(super) async fn extract_text(
    State(state): State<AppState>,
    Json(req): Json<ExtractTextRequest>,
) -> Result<Json<OcrResult>, ApiError> {
    let image = decode_image_data(&req.image_data)?;
    let result = state.coordinator.recognize_image(&image).await?;
    Ok(Json(result))
}

pub(super) async fn ingest(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PipelineRun>, ApiError> {
    let doc = read_upload(multipart).await?;
    let run = state.coordinator.run(&doc).await?;
    Ok(Json(run))
}

pub(super) async fn get_result(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Json<OcrResult>, ApiError> {
    let result = result_store(&state)?.get(&image_id).await?;
    Ok(Json(result))
}

pub(super) async fn put_result(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    Json(result): Json<OcrResult>,
) -> Result<StatusCode, ApiError> {
    result_store(&state)?.put(&image_id, &result).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn delete_result(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if result_store(&state)?.delete(&image_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StoreError::NotFound { image_id }.into())
    }
}

fn result_store(state: &AppState) -> Result<&Arc<dyn ResultStore>, ApiError> {
    state.coordinator.store().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Result store is not configured",
        )
    })
}

/// First non-empty `pdf`/`file` field as a [`Document`].
async fn read_upload(mut multipart: Multipart) -> Result<Document, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        if !UPLOAD_FIELDS.contains(&name.as_str()) {
            debug!("Skipping multipart field '{}'", name);
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            continue;
        }
        debug!(
            "Received upload '{}' ({} bytes)",
            file_name.as_deref().unwrap_or("<unnamed>"),
            bytes.len()
        );
        return Ok(match file_name {
            Some(f) => Document::named(&f, bytes.to_vec()),
            None => Document::new(bytes.to_vec()),
        });
    }
    warn!("Upload without a '{}' or '{}' field", UPLOAD_FIELDS[0], UPLOAD_FIELDS[1]);
    Err(ApiError::bad_request("No PDF file uploaded"))
}

/// Accept raw base64 or a `data:<mime>;base64,<payload>` URI.
fn decode_image_data(data: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(";base64,")
            .map(|(_, b64)| b64)
            .ok_or_else(|| ApiError::bad_request("imageData data URI is not base64"))?,
        None => data,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::bad_request(format!("imageData is not valid base64: {}", e)))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("imageData is empty"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_raw_base64_and_data_uri() {
        assert_eq!(decode_image_data("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_image_data("data:image/png;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
    }

    #[test]
    fn rejects_bad_image_data() {
        for bad in ["", "%%%", "data:image/png,aGVsbG8="] {
            let err = decode_image_data(bad).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{bad:?}");
        }
    }

    #[test]
    fn error_status_mapping() {
        let e: ApiError = IngestError::MalformedInput {
            detail: "x".into(),
        }
        .into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e: ApiError = IngestError::AllPagesFailed {
            total: 2,
            first_error: "x".into(),
        }
        .into();
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);

        let e: ApiError = StoreError::NotFound {
            image_id: "a".into(),
        }
        .into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e: ApiError = OcrError::Timeout {
            attempts: 60,
            waited_ms: 60_000,
        }
        .into();
        assert_eq!(e.status, StatusCode::GATEWAY_TIMEOUT);
    }
}
