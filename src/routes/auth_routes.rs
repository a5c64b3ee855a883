//! Authentication endpoints: login/logout, session introspection,
//! password changes.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use super::{ok, ApiError, ApiResult, AppState};
use crate::auth::{self, Session, SESSION_COOKIE};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordPayload {
    current_password: String,
    new_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaffPayload {
    name: String,
    email: String,
    password: String,
    #[serde(default)]
    role: Option<String>,
}

fn session_cookie(value: &str, max_age_secs: i64) -> String {
    format!("{SESSION_COOKIE}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}")
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Response, ApiError> {
    let session = auth::login(&state.db, &state.auth, &payload.email, &payload.password)
        .map_err(ApiError::unauthorized)?;

    let cookie = session_cookie(&session.session_id, 12 * 60 * 60);
    let body = Json(serde_json::json!({
        "success": true,
        "data": { "user": session.to_user_json() },
    }));
    Ok(([(header::SET_COOKIE, cookie)], body).into_response())
}

async fn logout(State(state): State<AppState>, session: Session) -> Response {
    auth::logout(&state.auth, &session.session_id);
    let cookie = session_cookie("", 0);
    let body = Json(serde_json::json!({ "success": true, "data": Value::Null }));
    ([(header::SET_COOKIE, cookie)], body).into_response()
}

async fn current_session(session: Session) -> ApiResult {
    Ok(ok(serde_json::json!({ "user": session.to_user_json() })))
}

async fn change_password(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<ChangePasswordPayload>,
) -> ApiResult {
    auth::change_password(
        &state.db,
        &session.user_id,
        &payload.current_password,
        &payload.new_password,
    )?;
    Ok(ok(Value::Null))
}

async fn create_staff(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<StaffPayload>,
) -> ApiResult {
    super::require(&session, "manage_users")?;
    Ok(ok(auth::create_staff_account(
        &state.db,
        &payload.name,
        &payload.email,
        &payload.password,
        payload.role.as_deref().unwrap_or("staff"),
    )?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/session", get(current_session))
        .route("/password", post(change_password))
        .route("/staff", post(create_staff))
}
