//! Customer registration and lookup endpoints.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use super::{ok, require, ApiResult, AppState};
use crate::auth::Session;
use crate::customers::{self, CustomerPayload, CustomerUpdatePayload};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    require(&session, "manage_customers")?;
    let data = match query.q {
        Some(ref q) if !q.trim().is_empty() => customers::search_customers(&state.db, q)?,
        _ => customers::list_customers(
            &state.db,
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )?,
    };
    Ok(ok(data))
}

async fn register(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CustomerPayload>,
) -> ApiResult {
    require(&session, "manage_customers")?;
    Ok(ok(customers::register_customer(&state.db, &payload)?))
}

async fn detail(
    State(state): State<AppState>,
    session: Session,
    Path(customer_id): Path<String>,
) -> ApiResult {
    require(&session, "manage_customers")?;
    Ok(ok(customers::get_customer(&state.db, &customer_id)?))
}

async fn update(
    State(state): State<AppState>,
    session: Session,
    Path(customer_id): Path<String>,
    Json(payload): Json<CustomerUpdatePayload>,
) -> ApiResult {
    require(&session, "manage_customers")?;
    Ok(ok(customers::update_customer(
        &state.db,
        &customer_id,
        &payload,
    )?))
}

async fn by_phone(
    State(state): State<AppState>,
    session: Session,
    Path(phone): Path<String>,
) -> ApiResult {
    require(&session, "manage_customers")?;
    Ok(ok(customers::lookup_by_phone(&state.db, &phone)?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(register))
        .route("/:id", get(detail).put(update))
        .route("/phone/:phone", get(by_phone))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{login_as, send_json, test_app};
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn register_and_lookup_roundtrip() {
        let (state, app) = test_app();
        let cookie = login_as(&state, "staff");

        let (status, body) = send_json(
            &app,
            "POST",
            "/api/customers",
            Some(&cookie),
            Some(json!({ "name": "Budi", "phone": "0812-3456-7890" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "register failed: {body}");
        let id = body
            .pointer("/data/id")
            .and_then(Value::as_str)
            .expect("id")
            .to_string();

        let (status, body) = send_json(
            &app,
            "GET",
            &format!("/api/customers/{id}"),
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.pointer("/data/phone").and_then(Value::as_str),
            Some("6281234567890")
        );

        let (status, body) = send_json(
            &app,
            "GET",
            "/api/customers/phone/081234567890",
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.pointer("/data/name").and_then(Value::as_str),
            Some("Budi")
        );
    }

    #[tokio::test]
    async fn unknown_customer_is_404() {
        let (state, app) = test_app();
        let cookie = login_as(&state, "staff");

        let (status, _) =
            send_json(&app, "GET", "/api/customers/nope", Some(&cookie), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
