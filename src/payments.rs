//! Payment management for Inkwell POS.
//!
//! Payments progress through pending -> confirmed/failed -> refunded.
//! Cash confirms on the spot; transfer and QRIS payments wait for an
//! uploaded proof and a manual confirmation. Every confirmation or
//! refund recomputes the order's cached payment-status rollup in the
//! same transaction.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::notifications::{self, StoreProfile};
use crate::orders;

pub const PAYMENT_METHODS: &[&str] = &["cash", "transfer", "qris"];

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub method: String,
    pub amount: f64,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// Rollup
// ---------------------------------------------------------------------------

/// Recompute `orders.payment_status` from confirmed payments.
///
/// Returns the new status and the remaining balance.
fn recompute_rollup(conn: &Connection, order_id: &str) -> Result<(String, f64), String> {
    let total: f64 = conn
        .query_row(
            "SELECT total_amount FROM orders WHERE id = ?1",
            params![order_id],
            |row| row.get(0),
        )
        .map_err(|_| format!("Order not found: {order_id}"))?;

    let confirmed: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM payments
             WHERE order_id = ?1 AND status = 'confirmed'",
            params![order_id],
            |row| row.get(0),
        )
        .map_err(|e| format!("sum confirmed payments: {e}"))?;

    let status = if confirmed <= 0.0 {
        "unpaid"
    } else if confirmed >= total - 0.005 {
        "paid"
    } else {
        "partial"
    };

    conn.execute(
        "UPDATE orders SET payment_status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status, Utc::now().to_rfc3339(), order_id],
    )
    .map_err(|e| format!("update payment rollup: {e}"))?;

    Ok((status.to_string(), (total - confirmed).max(0.0)))
}

// ---------------------------------------------------------------------------
// Record payment
// ---------------------------------------------------------------------------

/// Record a payment against an order.
///
/// Cash is confirmed immediately (counter sale); transfer and QRIS
/// start pending until a proof is reviewed and confirmed.
pub fn record_payment(
    db: &DbState,
    order_id: &str,
    payload: &PaymentPayload,
    recorded_by: Option<&str>,
) -> Result<Value, String> {
    let method = payload.method.trim().to_lowercase();
    if !PAYMENT_METHODS.contains(&method.as_str()) {
        return Err(format!(
            "Invalid method: {method}. Must be cash, transfer, or qris"
        ));
    }
    if payload.amount <= 0.0 {
        return Err("Amount must be positive".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let (order_status, total_amount): (String, f64) = conn
        .query_row(
            "SELECT status, total_amount FROM orders WHERE id = ?1",
            params![order_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|_| format!("Order not found: {order_id}"))?;
    if order_status == "cancelled" {
        return Err("Cannot record a payment on a cancelled order".into());
    }

    let confirmed: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM payments
             WHERE order_id = ?1 AND status = 'confirmed'",
            params![order_id],
            |row| row.get(0),
        )
        .map_err(|e| format!("sum confirmed payments: {e}"))?;
    let remaining = total_amount - confirmed;
    if payload.amount > remaining + 0.005 {
        return Err(format!(
            "Amount exceeds the remaining balance of {remaining:.2}"
        ));
    }

    let payment_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let is_cash = method == "cash";
    let initial_status = if is_cash { "confirmed" } else { "pending" };

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;

    let result = (|| -> Result<(), String> {
        conn.execute(
            "INSERT INTO payments (
                id, order_id, method, amount, status, reference, note,
                recorded_by, confirmed_by, confirmed_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                payment_id,
                order_id,
                method,
                payload.amount,
                initial_status,
                payload.reference.as_deref().map(str::trim),
                payload.note.as_deref().map(str::trim),
                recorded_by,
                if is_cash { recorded_by } else { None },
                if is_cash { Some(now.as_str()) } else { None },
                now,
            ],
        )
        .map_err(|e| format!("insert payment: {e}"))?;

        if is_cash {
            let (_, remaining_after) = recompute_rollup(&conn, order_id)?;
            enqueue_confirmed_message(&conn, order_id, payload.amount, &method, remaining_after)?;
        }

        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(
        payment_id = %payment_id,
        order_id = %order_id,
        method = %method,
        amount = %payload.amount,
        status = %initial_status,
        "payment recorded"
    );

    Ok(serde_json::json!({
        "id": payment_id,
        "orderId": order_id,
        "method": method,
        "amount": payload.amount,
        "status": initial_status,
        "createdAt": now,
    }))
}

fn enqueue_confirmed_message(
    conn: &Connection,
    order_id: &str,
    amount: f64,
    method: &str,
    remaining: f64,
) -> Result<(), String> {
    let (message_ctx, phone) = orders::load_order_message(conn, order_id)?;
    if phone.is_empty() {
        return Ok(());
    }
    let store = StoreProfile::load(conn);
    let message =
        notifications::format_payment_confirmed(&store, &message_ctx, amount, method, remaining);
    notifications::enqueue(conn, Some(order_id), &phone, "payment_confirmed", &message)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Lifecycle transitions
// ---------------------------------------------------------------------------

fn load_payment(
    conn: &Connection,
    payment_id: &str,
) -> Result<(String, String, f64, String), String> {
    conn.query_row(
        "SELECT order_id, method, amount, status FROM payments WHERE id = ?1",
        params![payment_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        },
    )
    .map_err(|_| format!("Payment not found: {payment_id}"))
}

/// Confirm a pending payment after reviewing its proof.
pub fn confirm_payment(
    db: &DbState,
    payment_id: &str,
    confirmed_by: Option<&str>,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let (order_id, method, amount, status) = load_payment(&conn, payment_id)?;

    if status != "pending" {
        return Err(format!("Only pending payments can be confirmed (status: {status})"));
    }

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;

    let result = (|| -> Result<(String, f64), String> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE payments
             SET status = 'confirmed', confirmed_by = ?1, confirmed_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![confirmed_by, now, payment_id],
        )
        .map_err(|e| format!("confirm payment: {e}"))?;

        let (rollup, remaining) = recompute_rollup(&conn, &order_id)?;
        enqueue_confirmed_message(&conn, &order_id, amount, &method, remaining)?;
        Ok((rollup, remaining))
    })();

    let (rollup, remaining) = match result {
        Ok(v) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
            v
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    };

    info!(payment_id = %payment_id, order_id = %order_id, "payment confirmed");

    Ok(serde_json::json!({
        "id": payment_id,
        "orderId": order_id,
        "status": "confirmed",
        "orderPaymentStatus": rollup,
        "remainingBalance": remaining,
    }))
}

/// Mark a pending payment as failed (unverifiable proof, bounced transfer).
pub fn reject_payment(
    db: &DbState,
    payment_id: &str,
    reason: Option<&str>,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let (order_id, method, amount, status) = load_payment(&conn, payment_id)?;

    if status != "pending" {
        return Err(format!("Only pending payments can be rejected (status: {status})"));
    }

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;

    let result = (|| -> Result<(), String> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE payments
             SET status = 'failed',
                 note = COALESCE(?1, note),
                 updated_at = ?2
             WHERE id = ?3",
            params![reason.map(str::trim), now, payment_id],
        )
        .map_err(|e| format!("reject payment: {e}"))?;

        let (message_ctx, phone) = orders::load_order_message(&conn, &order_id)?;
        if !phone.is_empty() {
            let message = notifications::format_payment_rejected(&message_ctx, amount, &method);
            notifications::enqueue(&conn, Some(&order_id), &phone, "payment_rejected", &message)?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(payment_id = %payment_id, order_id = %order_id, "payment rejected");

    Ok(serde_json::json!({
        "id": payment_id,
        "orderId": order_id,
        "status": "failed",
    }))
}

/// Refund a confirmed payment and revert the order rollup.
pub fn refund_payment(db: &DbState, payment_id: &str, reason: &str) -> Result<Value, String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err("A refund reason is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let (order_id, _method, _amount, status) = load_payment(&conn, payment_id)?;

    if status != "confirmed" {
        return Err(format!(
            "Only confirmed payments can be refunded (status: {status})"
        ));
    }

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;

    let result = (|| -> Result<String, String> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE payments
             SET status = 'refunded', note = ?1, updated_at = ?2
             WHERE id = ?3",
            params![reason, now, payment_id],
        )
        .map_err(|e| format!("refund payment: {e}"))?;

        let (rollup, _) = recompute_rollup(&conn, &order_id)?;
        Ok(rollup)
    })();

    let rollup = match result {
        Ok(v) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
            v
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    };

    info!(payment_id = %payment_id, order_id = %order_id, reason = %reason, "payment refunded");

    Ok(serde_json::json!({
        "id": payment_id,
        "orderId": order_id,
        "status": "refunded",
        "orderPaymentStatus": rollup,
    }))
}

// ---------------------------------------------------------------------------
// Proofs
// ---------------------------------------------------------------------------

/// Attach an uploaded proof file to a transfer/QRIS payment.
pub fn attach_proof(
    db: &DbState,
    payment_id: &str,
    file_path: &str,
    mime_type: &str,
    uploaded_by: Option<&str>,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let (order_id, method, _amount, status) = load_payment(&conn, payment_id)?;

    if method == "cash" {
        return Err("Cash payments do not take proof files".into());
    }
    if status != "pending" && status != "confirmed" {
        return Err(format!("Cannot attach proof to a {status} payment"));
    }

    let proof_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO payment_proofs (id, payment_id, file_path, mime_type, uploaded_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![proof_id, payment_id, file_path, mime_type, uploaded_by, now],
    )
    .map_err(|e| format!("insert proof: {e}"))?;

    info!(payment_id = %payment_id, proof_id = %proof_id, "payment proof attached");

    Ok(serde_json::json!({
        "id": proof_id,
        "paymentId": payment_id,
        "orderId": order_id,
        "filePath": file_path,
        "mimeType": mime_type,
        "createdAt": now,
    }))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Get all payments for an order, proofs joined in.
pub fn get_order_payments(db: &DbState, order_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare(
            "SELECT id, order_id, method, amount, status, reference, note,
                    recorded_by, confirmed_by, confirmed_at, created_at, updated_at
             FROM payments
             WHERE order_id = ?1
             ORDER BY created_at DESC",
        )
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map(params![order_id], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "orderId": row.get::<_, String>(1)?,
                "method": row.get::<_, String>(2)?,
                "amount": row.get::<_, f64>(3)?,
                "status": row.get::<_, String>(4)?,
                "reference": row.get::<_, Option<String>>(5)?,
                "note": row.get::<_, Option<String>>(6)?,
                "recordedBy": row.get::<_, Option<String>>(7)?,
                "confirmedBy": row.get::<_, Option<String>>(8)?,
                "confirmedAt": row.get::<_, Option<String>>(9)?,
                "createdAt": row.get::<_, String>(10)?,
                "updatedAt": row.get::<_, String>(11)?,
            }))
        })
        .map_err(|e| e.to_string())?;

    let mut payments = Vec::new();
    for row in rows {
        match row {
            Ok(p) => payments.push(p),
            Err(e) => warn!("skipping malformed payment row: {e}"),
        }
    }

    for payment in &mut payments {
        let pid = payment
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut proof_stmt = conn
            .prepare(
                "SELECT id, file_path, mime_type, uploaded_by, created_at
                 FROM payment_proofs WHERE payment_id = ?1 ORDER BY created_at",
            )
            .map_err(|e| e.to_string())?;
        let proofs: Vec<Value> = proof_stmt
            .query_map(params![pid], |row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, String>(0)?,
                    "filePath": row.get::<_, String>(1)?,
                    "mimeType": row.get::<_, String>(2)?,
                    "uploadedBy": row.get::<_, Option<String>>(3)?,
                    "createdAt": row.get::<_, String>(4)?,
                }))
            })
            .map_err(|e| e.to_string())?
            .filter_map(|r| r.ok())
            .collect();
        if let Value::Object(ref mut map) = payment {
            map.insert("proofs".into(), serde_json::json!(proofs));
        }
    }

    Ok(serde_json::json!(payments))
}

// ===========================================================================
// Tests
// ===========================================================================
