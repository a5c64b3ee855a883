//! Payment lifecycle endpoints: confirmation, rejection, refunds, and
//! proof-of-payment uploads.

use axum::{
    extract::{Path, Request, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use super::upload_routes::read_upload_body;
use super::{ok, require, ApiResult, AppState};
use crate::auth::Session;
use crate::payments;
use crate::uploads::UploadPurpose;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ReasonPayload {
    #[serde(default)]
    reason: Option<String>,
}

async fn confirm(
    State(state): State<AppState>,
    session: Session,
    Path(payment_id): Path<String>,
) -> ApiResult {
    require(&session, "confirm_payment")?;
    Ok(ok(payments::confirm_payment(
        &state.db,
        &payment_id,
        Some(&session.user_id),
    )?))
}

async fn reject(
    State(state): State<AppState>,
    session: Session,
    Path(payment_id): Path<String>,
    payload: Option<Json<ReasonPayload>>,
) -> ApiResult {
    require(&session, "confirm_payment")?;
    let reason = payload.as_ref().and_then(|p| p.reason.as_deref());
    Ok(ok(payments::reject_payment(&state.db, &payment_id, reason)?))
}

async fn refund(
    State(state): State<AppState>,
    session: Session,
    Path(payment_id): Path<String>,
    Json(payload): Json<ReasonPayload>,
) -> ApiResult {
    require(&session, "confirm_payment")?;
    let reason = payload
        .reason
        .as_deref()
        .ok_or("A refund reason is required".to_string())?;
    Ok(ok(payments::refund_payment(&state.db, &payment_id, reason)?))
}

async fn upload_proof(
    State(state): State<AppState>,
    session: Session,
    Path(payment_id): Path<String>,
    request: Request,
) -> ApiResult {
    require(&session, "record_payment")?;

    let bytes = read_upload_body(&state, request).await?;
    let saved = state.uploads.save(UploadPurpose::Payments, &bytes)?;

    let attached = payments::attach_proof(
        &state.db,
        &payment_id,
        &saved.relative_path,
        saved.mime_type,
        Some(&session.user_id),
    );

    // The file is orphaned if the payment refuses it; clean it up
    match attached {
        Ok(proof) => Ok(ok(proof)),
        Err(e) => {
            let _ = state.uploads.remove(&saved.relative_path);
            Err(e.into())
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:id/confirm", post(confirm))
        .route("/:id/reject", post(reject))
        .route("/:id/refund", post(refund))
        .route("/:id/proofs", post(upload_proof))
}
