//! API token management endpoints (admin only).

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use super::{ok, require, ApiResult, AppState};
use crate::auth::{self, Session};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuePayload {
    user_id: String,
    label: String,
}

async fn list(State(state): State<AppState>, session: Session) -> ApiResult {
    require(&session, "manage_users")?;
    Ok(ok(auth::list_api_tokens(&state.db)?))
}

async fn issue(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<IssuePayload>,
) -> ApiResult {
    require(&session, "manage_users")?;
    Ok(ok(auth::issue_api_token(
        &state.db,
        &payload.user_id,
        &payload.label,
    )?))
}

async fn revoke(
    State(state): State<AppState>,
    session: Session,
    Path(token_id): Path<String>,
) -> ApiResult {
    require(&session, "manage_users")?;
    auth::revoke_api_token(&state.db, &token_id)?;
    Ok(ok(Value::Null))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(issue))
        .route("/:id", axum::routing::delete(revoke))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{login_as, send_json, test_app};
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn issue_list_revoke_roundtrip() {
        let (state, app) = test_app();
        let admin = login_as(&state, "admin");

        let user_id: String = {
            let conn = state.db.conn.lock().expect("db lock");
            conn.query_row(
                "SELECT id FROM users WHERE role = 'admin' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .expect("admin row")
        };

        let (status, issued) = send_json(
            &app,
            "POST",
            "/api/tokens",
            Some(&admin),
            Some(json!({ "userId": user_id, "label": "kiosk" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "issue: {issued}");
        assert!(issued
            .pointer("/data/token")
            .and_then(Value::as_str)
            .map(|t| t.contains('.'))
            .unwrap_or(false));
        let token_id = issued
            .pointer("/data/id")
            .and_then(Value::as_str)
            .unwrap()
            .to_string();

        let (_, listed) = send_json(&app, "GET", "/api/tokens", Some(&admin), None).await;
        let rows = listed.get("data").and_then(Value::as_array).expect("rows");
        assert_eq!(rows.len(), 1);
        // The plaintext secret is never listed
        assert!(rows[0].get("token").is_none());

        let (status, _) = send_json(
            &app,
            "DELETE",
            &format!("/api/tokens/{token_id}"),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn staff_cannot_manage_tokens() {
        let (state, app) = test_app();
        let staff = login_as(&state, "staff");

        let (status, _) = send_json(&app, "GET", "/api/tokens", Some(&staff), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
