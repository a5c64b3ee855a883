//! Expense endpoints (admin only).

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use super::{ok, require, ApiResult, AppState};
use crate::auth::Session;
use crate::expenses::{self, ExpenseListFilter, ExpensePayload};
use crate::uploads::{self, UploadPurpose};

/// Create/update payload with an optional inline base64 proof.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpenseRequest {
    #[serde(flatten)]
    expense: ExpensePayload,
    #[serde(default)]
    proof_base64: Option<String>,
}

/// Store an inline proof, if present, and return the expense payload
/// with its proof path filled in.
fn resolve_proof(
    state: &AppState,
    mut payload: ExpensePayload,
    proof_base64: Option<&str>,
) -> Result<ExpensePayload, String> {
    if let Some(encoded) = proof_base64 {
        let bytes = uploads::decode_base64_payload(encoded)?;
        let saved = state.uploads.save(UploadPurpose::Expenses, &bytes)?;
        payload.proof_path = Some(saved.relative_path);
    }
    Ok(payload)
}

async fn list(
    State(state): State<AppState>,
    session: Session,
    Query(filter): Query<ExpenseListFilter>,
) -> ApiResult {
    require(&session, "manage_expenses")?;
    Ok(ok(expenses::list_expenses(&state.db, &filter)?))
}

async fn create(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<ExpenseRequest>,
) -> ApiResult {
    require(&session, "manage_expenses")?;
    let payload = resolve_proof(&state, request.expense, request.proof_base64.as_deref())?;
    Ok(ok(expenses::record_expense(
        &state.db,
        &payload,
        Some(&session.user_id),
    )?))
}

async fn update(
    State(state): State<AppState>,
    session: Session,
    Path(expense_id): Path<String>,
    Json(request): Json<ExpenseRequest>,
) -> ApiResult {
    require(&session, "manage_expenses")?;
    let payload = resolve_proof(&state, request.expense, request.proof_base64.as_deref())?;
    Ok(ok(expenses::update_expense(&state.db, &expense_id, &payload)?))
}

async fn delete(
    State(state): State<AppState>,
    session: Session,
    Path(expense_id): Path<String>,
) -> ApiResult {
    require(&session, "manage_expenses")?;
    expenses::delete_expense(&state.db, &expense_id)?;
    Ok(ok(Value::Null))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", axum::routing::put(update).delete(delete))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{login_as, send_json, test_app};
    use axum::http::StatusCode;
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use base64::Engine as _;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn expenses_are_admin_only() {
        let (state, app) = test_app();
        let staff = login_as(&state, "staff");

        let (status, _) = send_json(&app, "GET", "/api/expenses", Some(&staff), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn create_with_inline_proof_stores_file() {
        let (state, app) = test_app();
        let admin = login_as(&state, "admin");

        let encoded = BASE64_STANDARD.encode(b"%PDF-1.4 receipt scan");
        let (status, body) = send_json(
            &app,
            "POST",
            "/api/expenses",
            Some(&admin),
            Some(json!({
                "description": "Paper stock",
                "category": "materials",
                "amount": 500000.0,
                "expenseDate": "2025-03-01",
                "proofBase64": encoded,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "create expense: {body}");

        let proof = body
            .pointer("/data/proofPath")
            .and_then(Value::as_str)
            .expect("proof path");
        assert!(proof.starts_with("expenses/"), "unexpected: {proof}");
        assert!(proof.ends_with(".pdf"));
        assert!(state.uploads.root().join(proof).exists());
    }

    #[tokio::test]
    async fn list_totals_filtered_expenses() {
        let (state, app) = test_app();
        let admin = login_as(&state, "admin");

        for (desc, amount) in [("Ink", 100000.0), ("Rent", 2000000.0)] {
            send_json(
                &app,
                "POST",
                "/api/expenses",
                Some(&admin),
                Some(json!({
                    "description": desc,
                    "amount": amount,
                    "expenseDate": "2025-03-10",
                })),
            )
            .await;
        }

        let (status, body) = send_json(
            &app,
            "GET",
            "/api/expenses?dateFrom=2025-03-01&dateTo=2025-03-31",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.pointer("/data/total").and_then(Value::as_f64),
            Some(2100000.0)
        );
    }
}
