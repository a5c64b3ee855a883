//! HTTP route handlers for Inkwell POS.
//!
//! Handlers follow one shape: parse the payload, authorize the session,
//! call the service, wrap the result as `{"success": true, "data": ...}`.
//! Service errors become an `ApiError` whose status is derived from the
//! message (missing rows map to 404, everything else to 400).

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AuthState, Session, SESSION_COOKIE};
use crate::db::DbState;
use crate::uploads::UploadStore;

mod auth_routes;
mod catalog_routes;
mod customer_routes;
mod expense_routes;
mod notification_routes;
mod order_routes;
mod payment_routes;
mod report_routes;
mod settings_routes;
mod token_routes;
mod upload_routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbState>,
    pub auth: Arc<AuthState>,
    pub uploads: Arc<UploadStore>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// An HTTP error response: status code plus a user-facing message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

/// Service-layer errors carry no status; infer one from the message.
impl From<String> for ApiError {
    fn from(message: String) -> Self {
        if message.contains("not found") || message.contains("Not found") {
            Self::not_found(message)
        } else {
            Self::bad_request(message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

pub type ApiResult = Result<Json<Value>, ApiError>;

/// Wrap a service result in the standard success envelope.
pub fn ok(data: Value) -> Json<Value> {
    Json(serde_json::json!({ "success": true, "data": data }))
}

/// Check a permission on the current session.
pub fn require(session: &Session, permission: &str) -> Result<(), ApiError> {
    if session.has_permission(permission) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "Missing permission: {permission}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Session extraction
// ---------------------------------------------------------------------------

/// Pull the session cookie value out of a Cookie header.
fn parse_session_cookie(header: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name.trim() == SESSION_COOKIE {
            let value = value.trim();
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        } else {
            None
        }
    })
}

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookie_token = parts
            .headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_session_cookie);
        let bearer_token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        auth::authenticate(
            &state.db,
            &state.auth,
            cookie_token.as_deref(),
            bearer_token,
        )
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

// ---------------------------------------------------------------------------
// Router assembly
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn router(state: AppState) -> Router {
    let uploads_root = state.uploads.root().to_path_buf();

    Router::new()
        .route("/health", get(health))
        .nest("/api/auth", auth_routes::routes())
        .nest("/api/customers", customer_routes::routes())
        .nest("/api", catalog_routes::routes())
        .nest("/api/orders", order_routes::routes())
        .nest("/api/payments", payment_routes::routes())
        .nest("/api/expenses", expense_routes::routes())
        .nest("/api/notifications", notification_routes::routes())
        .nest("/api/reports", report_routes::routes())
        .nest("/api/settings", settings_routes::routes())
        .nest("/api/tokens", token_routes::routes())
        .nest("/api/uploads", upload_routes::routes())
        .nest_service("/uploads", ServeDir::new(uploads_root))
        // Base64 bodies inflate uploads by ~4/3, so the limit sits above
        // the raw upload cap
        .layer(DefaultBodyLimit::max(crate::uploads::MAX_UPLOAD_BYTES * 2))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    /// Build a full router over an in-memory database.
    pub(crate) fn test_app() -> (AppState, Router) {
        let db = Arc::new(crate::db::test_db_state());
        let uploads_dir = std::env::temp_dir()
            .join("inkwell_pos_route_tests")
            .join(uuid::Uuid::new_v4().to_string());
        let state = AppState {
            db,
            auth: Arc::new(AuthState::new()),
            uploads: Arc::new(UploadStore::new(uploads_dir)),
        };
        let app = router(state.clone());
        (state, app)
    }

    /// Insert a staff/admin user and return a session cookie header value.
    pub(crate) fn login_as(state: &AppState, role: &str) -> String {
        let email = format!("{role}@test.local");
        {
            let conn = state.db.conn.lock().expect("db lock");
            let hash = bcrypt::hash("test-password-1", 4).expect("hash");
            conn.execute(
                "INSERT INTO users (id, name, email, role, password_hash, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, datetime('now'), datetime('now'))",
                rusqlite::params![
                    uuid::Uuid::new_v4().to_string(),
                    format!("Test {role}"),
                    email,
                    role,
                    hash
                ],
            )
            .expect("insert user");
        }
        let session =
            auth::login(&state.db, &state.auth, &email, "test-password-1").expect("login");
        format!("{SESSION_COOKIE}={}", session.session_id)
    }

    pub(crate) async fn send_json(
        app: &Router,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_endpoint_is_public() {
        let (_state, app) = test_app();
        let (status, body) = send_json(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.get("status").and_then(Value::as_str), Some("ok"));
    }

    #[tokio::test]
    async fn protected_routes_reject_anonymous_requests() {
        let (_state, app) = test_app();
        let (status, body) = send_json(&app, "GET", "/api/orders", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.get("success").and_then(Value::as_bool), Some(false));
    }

    #[tokio::test]
    async fn staff_cannot_reach_admin_surfaces() {
        let (state, app) = test_app();
        let cookie = login_as(&state, "staff");

        let (status, _) = send_json(
            &app,
            "GET",
            "/api/reports/financial?period=daily",
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn bearer_token_authenticates_requests() {
        let (state, app) = test_app();
        let _ = login_as(&state, "admin");

        // Issue a token for the admin user
        let user_id: String = {
            let conn = state.db.conn.lock().expect("db lock");
            conn.query_row(
                "SELECT id FROM users WHERE role = 'admin' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .expect("admin row")
        };
        let issued = auth::issue_api_token(&state.db, &user_id, "integration").expect("token");
        let token = issued.get("token").and_then(Value::as_str).unwrap();

        let request = Request::builder()
            .method("GET")
            .uri("/api/orders")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn session_cookie_parsing_handles_multiple_cookies() {
        assert_eq!(
            parse_session_cookie("theme=dark; pos_session=abc123; lang=id"),
            Some("abc123".to_string())
        );
        assert_eq!(parse_session_cookie("theme=dark"), None);
        assert_eq!(parse_session_cookie("pos_session="), None);
    }
}
