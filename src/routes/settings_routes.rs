//! Store settings endpoints (admin only): profile fields and the QRIS
//! image used in payment instructions.

use axum::{
    extract::{Request, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use super::upload_routes::read_upload_body;
use super::{ok, require, ApiError, ApiResult, AppState};
use crate::auth::Session;
use crate::db;
use crate::uploads::UploadPurpose;

/// Store profile keys that can be written through the API.
const STORE_KEYS: &[&str] = &[
    "name",
    "address",
    "phone",
    "email",
    "receipt_footer",
    "bank_name",
    "bank_account",
    "bank_holder",
];

async fn get_store(State(state): State<AppState>, session: Session) -> ApiResult {
    require(&session, "manage_settings")?;
    let conn = state.db.conn.lock().map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(ok(db::get_settings_in_category(&conn, "store")))
}

async fn update_store(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<Value>,
) -> ApiResult {
    require(&session, "manage_settings")?;

    let conn = state.db.conn.lock().map_err(|e| ApiError::bad_request(e.to_string()))?;
    let mut written = 0;
    for &key in STORE_KEYS {
        // Accept either snake_case or camelCase spellings
        let camel = key
            .split('_')
            .enumerate()
            .map(|(i, part)| {
                if i == 0 {
                    part.to_string()
                } else {
                    let mut c = part.chars();
                    match c.next() {
                        Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
                        None => String::new(),
                    }
                }
            })
            .collect::<String>();
        if let Some(value) = crate::value_str(&payload, &[key, camel.as_str()]) {
            db::set_setting(&conn, "store", key, value.trim())?;
            written += 1;
        }
    }
    if written == 0 {
        return Err(ApiError::bad_request(format!(
            "No recognized settings in payload. Known keys: {}",
            STORE_KEYS.join(", ")
        )));
    }

    Ok(ok(db::get_settings_in_category(&conn, "store")))
}

async fn upload_qris(
    State(state): State<AppState>,
    session: Session,
    request: Request,
) -> ApiResult {
    require(&session, "manage_settings")?;

    let bytes = read_upload_body(&state, request).await?;
    let saved = state.uploads.save(UploadPurpose::Qris, &bytes)?;

    let conn = state.db.conn.lock().map_err(|e| ApiError::bad_request(e.to_string()))?;
    // Replace the previous QRIS image, if any
    if let Some(previous) = db::get_setting(&conn, "store", "qris_image_path") {
        if previous != saved.relative_path {
            let _ = state.uploads.remove(&previous);
        }
    }
    db::set_setting(&conn, "store", "qris_image_path", &saved.relative_path)?;

    Ok(ok(serde_json::json!({
        "qrisImagePath": saved.relative_path,
        "url": format!("/uploads/{}", saved.relative_path),
    })))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/store", get(get_store).put(update_store))
        .route("/qris", post(upload_qris))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{login_as, send_json, test_app};
    use axum::http::StatusCode;
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use base64::Engine as _;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn store_profile_roundtrip_accepts_camel_case() {
        let (state, app) = test_app();
        let admin = login_as(&state, "admin");

        let (status, body) = send_json(
            &app,
            "PUT",
            "/api/settings/store",
            Some(&admin),
            Some(json!({
                "name": "Inkwell Print & Copy",
                "bankName": "BCA",
                "bankAccount": "1234567890",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "update store: {body}");
        assert_eq!(
            body.pointer("/data/bank_name").and_then(Value::as_str),
            Some("BCA")
        );

        let (_, read_back) =
            send_json(&app, "GET", "/api/settings/store", Some(&admin), None).await;
        assert_eq!(
            read_back.pointer("/data/name").and_then(Value::as_str),
            Some("Inkwell Print & Copy")
        );
    }

    #[tokio::test]
    async fn unknown_keys_are_rejected() {
        let (state, app) = test_app();
        let admin = login_as(&state, "admin");

        let (status, _) = send_json(
            &app,
            "PUT",
            "/api/settings/store",
            Some(&admin),
            Some(json!({ "theme": "dark" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn qris_upload_replaces_previous_image() {
        let (state, app) = test_app();
        let admin = login_as(&state, "admin");

        let encoded = BASE64_STANDARD.encode(b"\x89PNG\r\n\x1a\n____qr-one____");
        let (status, first) = send_json(
            &app,
            "POST",
            "/api/settings/qris",
            Some(&admin),
            Some(json!({ "data": encoded })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "first qris: {first}");
        let first_path = first
            .pointer("/data/qrisImagePath")
            .and_then(Value::as_str)
            .unwrap()
            .to_string();
        assert!(state.uploads.root().join(&first_path).exists());

        let encoded = BASE64_STANDARD.encode(b"\x89PNG\r\n\x1a\n____qr-two____");
        let (_, second) = send_json(
            &app,
            "POST",
            "/api/settings/qris",
            Some(&admin),
            Some(json!({ "data": encoded })),
        )
        .await;
        let second_path = second
            .pointer("/data/qrisImagePath")
            .and_then(Value::as_str)
            .unwrap()
            .to_string();

        assert_ne!(first_path, second_path);
        assert!(!state.uploads.root().join(&first_path).exists());
        assert!(state.uploads.root().join(&second_path).exists());
    }
}
