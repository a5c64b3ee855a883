//! Outbound WhatsApp notifications.
//!
//! State changes on orders and payments enqueue a message row in the
//! same transaction; a background worker drains the queue through the
//! configured gateway with bounded retries. Messages are formatted
//! from data snapshotted on the order so later catalog edits do not
//! change what the customer was told.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::wagateway::Gateway;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum delivery attempts before a notification is marked failed.
const MAX_ATTEMPTS: i64 = 5;
/// Base retry delay; doubles per attempt.
const BASE_RETRY_SECS: i64 = 30;
/// Retry delay ceiling.
const MAX_RETRY_SECS: i64 = 1800;
/// Rows pulled from the queue per dispatcher tick.
const DISPATCH_BATCH: i64 = 10;

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Format an amount as Indonesian rupiah: `Rp 1.500.000`.
pub fn format_idr(amount: f64) -> String {
    let rounded = amount.round().max(0.0) as i64;
    let digits = rounded.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    format!("Rp {grouped}")
}

/// Store profile fields used in message templates, read from `settings`.
#[derive(Debug, Clone, Default)]
pub struct StoreProfile {
    pub name: String,
    pub phone: String,
    pub bank_name: String,
    pub bank_account: String,
    pub bank_holder: String,
    pub qris_enabled: bool,
}

impl StoreProfile {
    pub fn load(conn: &Connection) -> Self {
        let get = |key: &str| db::get_setting(conn, "store", key).unwrap_or_default();
        Self {
            name: {
                let n = get("name");
                if n.is_empty() {
                    "Inkwell Print".to_string()
                } else {
                    n
                }
            },
            phone: get("phone"),
            bank_name: get("bank_name"),
            bank_account: get("bank_account"),
            bank_holder: get("bank_holder"),
            qris_enabled: !get("qris_image_path").is_empty(),
        }
    }

    fn payment_instructions(&self) -> String {
        let mut lines = vec!["Payment options:".to_string(), "- Cash at our counter".to_string()];
        if !self.bank_account.is_empty() {
            let holder = if self.bank_holder.is_empty() {
                self.name.clone()
            } else {
                self.bank_holder.clone()
            };
            lines.push(format!(
                "- Transfer to {} {} a/n {}",
                self.bank_name, self.bank_account, holder
            ));
        }
        if self.qris_enabled {
            lines.push("- QRIS (ask us for the code)".to_string());
        }
        lines.join("\n")
    }
}

/// One order line as it appears in a message.
#[derive(Debug, Clone)]
pub struct MessageLine {
    pub product_name: String,
    pub variant_name: Option<String>,
    pub quantity: f64,
    pub line_total: f64,
}

impl MessageLine {
    fn render(&self) -> String {
        let qty = if self.quantity.fract() == 0.0 {
            format!("{}", self.quantity as i64)
        } else {
            format!("{:.2}", self.quantity)
        };
        match &self.variant_name {
            Some(v) => format!(
                "- {qty} x {} ({v}): {}",
                self.product_name,
                format_idr(self.line_total)
            ),
            None => format!(
                "- {qty} x {}: {}",
                self.product_name,
                format_idr(self.line_total)
            ),
        }
    }
}

/// Everything a template needs about one order.
#[derive(Debug, Clone)]
pub struct OrderMessage {
    pub order_number: String,
    pub customer_name: String,
    pub lines: Vec<MessageLine>,
    pub total_amount: f64,
}

/// Message sent right after an order is created.
pub fn format_order_created(store: &StoreProfile, order: &OrderMessage) -> String {
    let mut out = format!(
        "Hi {}, thank you for your order at {}!\n\nOrder *{}*\n",
        order.customer_name, store.name, order.order_number
    );
    for line in &order.lines {
        out.push_str(&line.render());
        out.push('\n');
    }
    out.push_str(&format!("Total: *{}*\n\n", format_idr(order.total_amount)));
    out.push_str(&store.payment_instructions());
    out.push_str("\n\nWe will message you again once your order is ready.");
    out
}

/// Message sent when an order changes status.
pub fn format_order_status(store: &StoreProfile, order: &OrderMessage, status: &str) -> String {
    let body = match status {
        "ready" => format!(
            "Good news {}! Your order *{}* is ready for pickup/delivery.",
            order.customer_name, order.order_number
        ),
        "completed" => format!(
            "Your order *{}* is complete. Thank you for printing with {}!",
            order.order_number, store.name
        ),
        "cancelled" => format!(
            "Your order *{}* has been cancelled. Contact us at {} if this is unexpected.",
            order.order_number,
            if store.phone.is_empty() {
                store.name.clone()
            } else {
                store.phone.clone()
            }
        ),
        other => format!(
            "Update for order *{}*: status is now {}.",
            order.order_number, other
        ),
    };
    body
}

/// Message sent when a payment is confirmed.
pub fn format_payment_confirmed(
    store: &StoreProfile,
    order: &OrderMessage,
    amount: f64,
    method: &str,
    remaining: f64,
) -> String {
    let mut out = format!(
        "We received your {method} payment of *{}* for order *{}*.\n",
        format_idr(amount),
        order.order_number
    );
    if remaining > 0.0 {
        out.push_str(&format!("Remaining balance: {}.", format_idr(remaining)));
    } else {
        out.push_str("Your order is fully paid.");
    }
    out.push_str(&format!("\nThank you, {}!", store.name));
    out
}

/// Message sent when a submitted payment could not be verified.
pub fn format_payment_rejected(order: &OrderMessage, amount: f64, method: &str) -> String {
    format!(
        "We could not verify your {method} payment of {} for order *{}*. \
         Please check the proof you sent or contact us.",
        format_idr(amount),
        order.order_number
    )
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Insert a pending notification row.
///
/// Runs on the caller's connection so the enqueue shares the caller's
/// transaction: an order is never visible without its message row.
/// Skips (returning None) when the recipient has no usable phone.
pub fn enqueue(
    conn: &Connection,
    order_id: Option<&str>,
    recipient_phone: &str,
    event: &str,
    message: &str,
) -> Result<Option<String>, String> {
    let phone = crate::customers::normalize_phone(recipient_phone);
    if phone.len() < 8 {
        debug!(event = %event, "skipping notification: recipient has no usable phone");
        return Ok(None);
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO notifications (id, order_id, recipient_phone, event, message, status, attempts, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?6)",
        params![id, order_id, phone, event, message, now],
    )
    .map_err(|e| format!("enqueue notification: {e}"))?;

    Ok(Some(id))
}

/// List notifications, optionally filtered by status.
pub fn list_notifications(
    db: &DbState,
    status: Option<&str>,
    limit: i64,
) -> Result<Value, String> {
    if let Some(s) = status {
        if !matches!(s, "pending" | "sent" | "failed") {
            return Err(format!("Invalid status filter: {s}"));
        }
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut sql = String::from(
        "SELECT id, order_id, recipient_phone, event, message, status,
                attempts, last_error, sent_at, next_attempt_at, created_at
         FROM notifications",
    );
    if status.is_some() {
        sql.push_str(" WHERE status = ?1");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ");
    sql.push_str(&limit.clamp(1, 500).to_string());

    let shape = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Value> {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "orderId": row.get::<_, Option<String>>(1)?,
            "recipientPhone": row.get::<_, String>(2)?,
            "event": row.get::<_, String>(3)?,
            "message": row.get::<_, String>(4)?,
            "status": row.get::<_, String>(5)?,
            "attempts": row.get::<_, i64>(6)?,
            "lastError": row.get::<_, Option<String>>(7)?,
            "sentAt": row.get::<_, Option<String>>(8)?,
            "nextAttemptAt": row.get::<_, Option<String>>(9)?,
            "createdAt": row.get::<_, String>(10)?,
        }))
    };

    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = match status {
        Some(s) => stmt.query_map(params![s], shape),
        None => stmt.query_map([], shape),
    }
    .map_err(|e| e.to_string())?;

    Ok(serde_json::json!(rows
        .filter_map(|r| r.ok())
        .collect::<Vec<Value>>()))
}

/// Put a failed notification back in the queue for immediate retry.
pub fn retry_notification(db: &DbState, notification_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let changed = conn
        .execute(
            "UPDATE notifications
             SET status = 'pending', attempts = 0, next_attempt_at = NULL,
                 last_error = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'failed'",
            params![Utc::now().to_rfc3339(), notification_id],
        )
        .map_err(|e| format!("retry notification: {e}"))?;
    if changed == 0 {
        return Err(format!(
            "Notification not found or not failed: {notification_id}"
        ));
    }

    info!(notification_id = %notification_id, "notification requeued");
    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Retry delay for the given attempt count (1-based, already incremented).
fn retry_delay_secs(attempts: i64) -> i64 {
    let exp = (attempts - 1).clamp(0, 10) as u32;
    (BASE_RETRY_SECS << exp).min(MAX_RETRY_SECS)
}

/// One row pulled from the queue.
struct DueNotification {
    id: String,
    recipient_phone: String,
    message: String,
    attempts: i64,
}

/// Fetch pending notifications whose retry time has passed.
fn fetch_due(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<DueNotification>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, recipient_phone, message, attempts
             FROM notifications
             WHERE status = 'pending'
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
             ORDER BY created_at
             LIMIT ?2",
        )
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map(params![now.to_rfc3339(), limit], |row| {
            Ok(DueNotification {
                id: row.get(0)?,
                recipient_phone: row.get(1)?,
                message: row.get(2)?,
                attempts: row.get(3)?,
            })
        })
        .map_err(|e| e.to_string())?;

    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn mark_sent(db: &DbState, notification_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE notifications
         SET status = 'sent', sent_at = ?1, last_error = NULL, updated_at = ?1
         WHERE id = ?2",
        params![now, notification_id],
    )
    .map_err(|e| format!("mark sent: {e}"))?;
    Ok(())
}

fn mark_failure(db: &DbState, notification_id: &str, attempts_before: i64, error: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let attempts = attempts_before + 1;
    let now = Utc::now();

    if attempts >= MAX_ATTEMPTS {
        conn.execute(
            "UPDATE notifications
             SET status = 'failed', attempts = ?1, last_error = ?2, updated_at = ?3
             WHERE id = ?4",
            params![attempts, error, now.to_rfc3339(), notification_id],
        )
        .map_err(|e| format!("mark failed: {e}"))?;
        warn!(notification_id = %notification_id, attempts, "notification failed permanently");
    } else {
        let next = now + ChronoDuration::seconds(retry_delay_secs(attempts));
        conn.execute(
            "UPDATE notifications
             SET attempts = ?1, last_error = ?2, next_attempt_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                attempts,
                error,
                next.to_rfc3339(),
                now.to_rfc3339(),
                notification_id
            ],
        )
        .map_err(|e| format!("schedule retry: {e}"))?;
    }
    Ok(())
}

/// Drain one batch of due notifications through the gateway.
///
/// Returns (sent, failed-attempt) counts for the tick.
pub async fn dispatch_pending(db: &DbState, gateway: &Gateway) -> Result<(usize, usize), String> {
    let due = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        fetch_due(&conn, Utc::now(), DISPATCH_BATCH)?
        // Lock is released here; sends must not hold it across awaits
    };

    let mut sent = 0usize;
    let mut failed = 0usize;

    for item in due {
        match gateway.send_message(&item.recipient_phone, &item.message).await {
            Ok(()) => {
                mark_sent(db, &item.id)?;
                sent += 1;
            }
            Err(e) => {
                mark_failure(db, &item.id, item.attempts, &e.to_string())?;
                failed += 1;
            }
        }
    }

    Ok((sent, failed))
}

/// Start the background notification worker.
///
/// Without a configured gateway the worker is not spawned and pending
/// rows simply wait; they are picked up once the gateway is configured
/// and the process restarted.
pub fn start_notification_worker(db: Arc<DbState>, gateway: Option<Gateway>, interval_secs: u64) {
    let Some(gateway) = gateway else {
        warn!("WhatsApp gateway not configured; notifications will stay pending");
        return;
    };

    tokio::spawn(async move {
        info!(
            gateway = %gateway.base_url(),
            "Notification worker started (interval: {interval_secs}s)"
        );
        loop {
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;

            match dispatch_pending(&db, &gateway).await {
                Ok((0, 0)) => {}
                Ok((sent, failed)) => {
                    info!(sent, failed, "notification dispatch tick");
                }
                Err(e) => warn!("notification dispatch error: {e}"),
            }
        }
    });
}

// ===========================================================================
// Tests
// ===========================================================================
