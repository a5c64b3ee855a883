//! Order endpoints: creation, listing, detail, status transitions, and
//! per-order payment recording.

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use super::{ok, require, ApiResult, AppState};
use crate::auth::Session;
use crate::orders::{self, OrderListFilter, OrderPayload};
use crate::payments::{self, PaymentPayload};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    status: String,
}

async fn list(
    State(state): State<AppState>,
    session: Session,
    Query(filter): Query<OrderListFilter>,
) -> ApiResult {
    require(&session, "view_orders")?;
    Ok(ok(orders::list_orders(&state.db, &filter)?))
}

async fn create(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<OrderPayload>,
) -> ApiResult {
    require(&session, "create_order")?;
    Ok(ok(orders::create_order(
        &state.db,
        &payload,
        Some(&session.user_id),
    )?))
}

async fn detail(
    State(state): State<AppState>,
    session: Session,
    Path(order_id): Path<String>,
) -> ApiResult {
    require(&session, "view_orders")?;
    Ok(ok(orders::get_order(&state.db, &order_id)?))
}

async fn update_status(
    State(state): State<AppState>,
    session: Session,
    Path(order_id): Path<String>,
    Json(payload): Json<StatusPayload>,
) -> ApiResult {
    require(&session, "update_order_status")?;
    Ok(ok(orders::update_status(&state.db, &order_id, &payload.status)?))
}

async fn list_payments(
    State(state): State<AppState>,
    session: Session,
    Path(order_id): Path<String>,
) -> ApiResult {
    require(&session, "view_orders")?;
    Ok(ok(payments::get_order_payments(&state.db, &order_id)?))
}

async fn record_payment(
    State(state): State<AppState>,
    session: Session,
    Path(order_id): Path<String>,
    Json(payload): Json<PaymentPayload>,
) -> ApiResult {
    require(&session, "record_payment")?;
    Ok(ok(payments::record_payment(
        &state.db,
        &order_id,
        &payload,
        Some(&session.user_id),
    )?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(detail))
        .route("/:id/status", put(update_status))
        .route("/:id/payments", get(list_payments).post(record_payment))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{login_as, send_json, test_app};
    use super::*;
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    /// Create a customer + product via the API, return their ids.
    async fn seed(app: &Router, admin: &str) -> (String, String) {
        let (_, customer) = send_json(
            app,
            "POST",
            "/api/customers",
            Some(admin),
            Some(json!({ "name": "Budi", "phone": "081234567890" })),
        )
        .await;
        let customer_id = customer
            .pointer("/data/id")
            .and_then(Value::as_str)
            .expect("customer id")
            .to_string();

        let (_, product) = send_json(
            app,
            "POST",
            "/api/products",
            Some(admin),
            Some(json!({ "name": "Flyer A5", "basePrice": 1000.0 })),
        )
        .await;
        let product_id = product
            .pointer("/data/id")
            .and_then(Value::as_str)
            .expect("product id")
            .to_string();

        (customer_id, product_id)
    }

    #[tokio::test]
    async fn create_order_then_pay_it_off() {
        let (state, app) = test_app();
        let admin = login_as(&state, "admin");
        let (customer_id, product_id) = seed(&app, &admin).await;

        let (status, order) = send_json(
            &app,
            "POST",
            "/api/orders",
            Some(&admin),
            Some(json!({
                "customerId": customer_id,
                "items": [{ "productId": product_id, "quantity": 100.0 }],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "create order: {order}");
        let order_id = order
            .pointer("/data/id")
            .and_then(Value::as_str)
            .expect("order id")
            .to_string();
        assert_eq!(
            order.pointer("/data/totalAmount").and_then(Value::as_f64),
            Some(100000.0)
        );

        let (status, paid) = send_json(
            &app,
            "POST",
            &format!("/api/orders/{order_id}/payments"),
            Some(&admin),
            Some(json!({ "method": "cash", "amount": 100000.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "record payment: {paid}");

        let (_, detail) = send_json(
            &app,
            "GET",
            &format!("/api/orders/{order_id}"),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(
            detail.pointer("/data/paymentStatus").and_then(Value::as_str),
            Some("paid")
        );
        assert_eq!(
            detail
                .pointer("/data/payments")
                .and_then(Value::as_array)
                .map(Vec::len),
            Some(1)
        );
    }

    #[tokio::test]
    async fn status_updates_validate_transitions() {
        let (state, app) = test_app();
        let admin = login_as(&state, "admin");
        let (customer_id, product_id) = seed(&app, &admin).await;

        let (_, order) = send_json(
            &app,
            "POST",
            "/api/orders",
            Some(&admin),
            Some(json!({
                "customerId": customer_id,
                "items": [{ "productId": product_id, "quantity": 10.0 }],
            })),
        )
        .await;
        let order_id = order
            .pointer("/data/id")
            .and_then(Value::as_str)
            .expect("order id")
            .to_string();

        let (status, _) = send_json(
            &app,
            "PUT",
            &format!("/api/orders/{order_id}/status"),
            Some(&admin),
            Some(json!({ "status": "completed" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send_json(
            &app,
            "PUT",
            &format!("/api/orders/{order_id}/status"),
            Some(&admin),
            Some(json!({ "status": "processing" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (state, app) = test_app();
        let admin = login_as(&state, "admin");
        let (customer_id, product_id) = seed(&app, &admin).await;

        for _ in 0..2 {
            send_json(
                &app,
                "POST",
                "/api/orders",
                Some(&admin),
                Some(json!({
                    "customerId": customer_id,
                    "items": [{ "productId": product_id, "quantity": 1.0 }],
                })),
            )
            .await;
        }

        let (status, body) = send_json(
            &app,
            "GET",
            "/api/orders?status=pending",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.get("data").and_then(Value::as_array).map(Vec::len),
            Some(2)
        );

        let (status, _) =
            send_json(&app, "GET", "/api/orders?status=bogus", Some(&admin), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
