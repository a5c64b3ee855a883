//! Generic upload endpoint: `POST /api/uploads/:purpose`.
//!
//! Accepts either a multipart form with a `file` field or a JSON body
//! `{"data": "<base64>"}` (data-URL prefixes tolerated), mirroring the
//! two ways clients ship binary payloads.

use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::header,
    routing::post,
    Router,
};

use super::{ok, ApiError, ApiResult, AppState};
use crate::auth::Session;
use crate::uploads::{self, UploadPurpose, MAX_UPLOAD_BYTES};

/// Read the upload body from a request, whatever its encoding.
pub(crate) async fn read_upload_body(
    state: &AppState,
    request: Request,
) -> Result<Vec<u8>, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid multipart field: {e}")))?
        {
            if field.name() == Some("file") {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
                return Ok(bytes.to_vec());
            }
        }
        return Err(ApiError::bad_request("Multipart body has no 'file' field"));
    }

    // JSON base64 fallback
    let bytes = axum::body::to_bytes(request.into_body(), MAX_UPLOAD_BYTES * 2)
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read body: {e}")))?;
    let json: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|_| ApiError::bad_request("Expected multipart form data or JSON"))?;
    let data = crate::value_str(&json, &["data", "file", "content"])
        .ok_or_else(|| ApiError::bad_request("JSON upload needs a base64 'data' field"))?;
    uploads::decode_base64_payload(&data).map_err(ApiError::bad_request)
}

async fn upload(
    State(state): State<AppState>,
    _session: Session,
    Path(purpose): Path<String>,
    request: Request,
) -> ApiResult {
    let purpose = UploadPurpose::parse(&purpose)?;
    let bytes = read_upload_body(&state, request).await?;
    let saved = state.uploads.save(purpose, &bytes)?;

    Ok(ok(serde_json::json!({
        "path": saved.relative_path,
        "mimeType": saved.mime_type,
        "size": saved.size,
        "url": format!("/uploads/{}", saved.relative_path),
    })))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/:purpose", post(upload))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{login_as, send_json, test_app};
    use axum::http::StatusCode;
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use base64::Engine as _;
    use serde_json::{json, Value};

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n____image-data____";

    #[tokio::test]
    async fn base64_json_upload_lands_in_purpose_dir() {
        let (state, app) = test_app();
        let cookie = login_as(&state, "staff");

        let encoded = BASE64_STANDARD.encode(PNG_MAGIC);
        let (status, body) = send_json(
            &app,
            "POST",
            "/api/uploads/products",
            Some(&cookie),
            Some(json!({ "data": encoded })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "upload failed: {body}");

        let path = body
            .pointer("/data/path")
            .and_then(Value::as_str)
            .expect("path");
        assert!(path.starts_with("products/"), "unexpected path: {path}");
        assert!(state.uploads.root().join(path).exists());
    }

    #[tokio::test]
    async fn invalid_purpose_is_rejected() {
        let (state, app) = test_app();
        let cookie = login_as(&state, "staff");

        let encoded = BASE64_STANDARD.encode(PNG_MAGIC);
        let (status, _) = send_json(
            &app,
            "POST",
            "/api/uploads/invoices",
            Some(&cookie),
            Some(json!({ "data": encoded })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn garbage_content_is_rejected() {
        let (state, app) = test_app();
        let cookie = login_as(&state, "staff");

        let encoded = BASE64_STANDARD.encode(b"plain text pretending to be an image");
        let (status, body) = send_json(
            &app,
            "POST",
            "/api/uploads/products",
            Some(&cookie),
            Some(json!({ "data": encoded })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error = body.get("error").and_then(Value::as_str).unwrap_or_default();
        assert!(error.contains("Unrecognized"), "unexpected: {error}");
    }
}
