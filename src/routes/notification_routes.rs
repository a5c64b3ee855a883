//! Notification queue endpoints (admin only): inspection and manual
//! requeue of failed messages.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;

use super::{ok, require, ApiResult, AppState};
use crate::auth::Session;
use crate::notifications;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    require(&session, "manage_notifications")?;
    Ok(ok(notifications::list_notifications(
        &state.db,
        query.status.as_deref(),
        query.limit.unwrap_or(100),
    )?))
}

async fn retry(
    State(state): State<AppState>,
    session: Session,
    Path(notification_id): Path<String>,
) -> ApiResult {
    require(&session, "manage_notifications")?;
    notifications::retry_notification(&state.db, &notification_id)?;
    Ok(ok(Value::Null))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/:id/retry", post(retry))
}
