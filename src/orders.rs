//! Order management for Inkwell POS.
//!
//! Orders snapshot product names and prices into their line items at
//! creation time, carry a cached payment-status rollup, and allocate a
//! sequential per-day order number inside an immediate transaction so
//! concurrent creates can neither skip nor duplicate a number.

use chrono::{Local, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog;
use crate::db::DbState;
use crate::notifications::{self, MessageLine, OrderMessage, StoreProfile};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemPayload {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub quantity: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub customer_id: String,
    pub items: Vec<OrderItemPayload>,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<String>,
    #[serde(default)]
    pub discount_amount: Option<f64>,
    #[serde(default)]
    pub shipping_fee: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrderListFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// Status lifecycle
// ---------------------------------------------------------------------------

pub const ORDER_STATUSES: &[&str] = &["pending", "processing", "ready", "completed", "cancelled"];

/// Legal order status transitions.
fn transition_allowed(from: &str, to: &str) -> bool {
    matches!(
        (from, to),
        ("pending", "processing")
            | ("pending", "cancelled")
            | ("processing", "ready")
            | ("processing", "cancelled")
            | ("ready", "completed")
    )
}

// ---------------------------------------------------------------------------
// Order number allocation
// ---------------------------------------------------------------------------

/// Compute the next order number for the given day (`YYYYMMDD`).
///
/// Must run inside the same immediate transaction as the insert: the
/// write lock serializes allocators, and the UNIQUE constraint on
/// `order_number` backstops the read-increment.
fn next_order_number(conn: &Connection, day: &str) -> Result<String, String> {
    let prefix = format!("ORD-{day}-");
    let last: Option<String> = conn
        .query_row(
            "SELECT order_number FROM orders
             WHERE order_number LIKE ?1 || '%'
             ORDER BY order_number DESC
             LIMIT 1",
            params![prefix],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| format!("query last order number: {e}"))?;

    let next = last
        .as_deref()
        .and_then(|n| n.rsplit('-').next())
        .and_then(|suffix| suffix.parse::<u32>().ok())
        .map(|n| n + 1)
        .unwrap_or(1);

    Ok(format!("{prefix}{next:04}"))
}

// ---------------------------------------------------------------------------
// Row shaping
// ---------------------------------------------------------------------------

fn order_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "orderNumber": row.get::<_, String>(1)?,
        "customerId": row.get::<_, String>(2)?,
        "customerName": row.get::<_, Option<String>>(3)?,
        "customerPhone": row.get::<_, Option<String>>(4)?,
        "status": row.get::<_, String>(5)?,
        "shippingMethod": row.get::<_, String>(6)?,
        "shippingAddress": row.get::<_, Option<String>>(7)?,
        "notes": row.get::<_, Option<String>>(8)?,
        "subtotal": row.get::<_, f64>(9)?,
        "discountAmount": row.get::<_, f64>(10)?,
        "shippingFee": row.get::<_, f64>(11)?,
        "totalAmount": row.get::<_, f64>(12)?,
        "paymentStatus": row.get::<_, String>(13)?,
        "createdBy": row.get::<_, Option<String>>(14)?,
        "createdAt": row.get::<_, String>(15)?,
        "updatedAt": row.get::<_, String>(16)?,
    }))
}

const ORDER_SELECT: &str = "SELECT o.id, o.order_number, o.customer_id, u.name, u.phone,
        o.status, o.shipping_method, o.shipping_address, o.notes,
        o.subtotal, o.discount_amount, o.shipping_fee, o.total_amount,
        o.payment_status, o.created_by, o.created_at, o.updated_at
     FROM orders o
     JOIN users u ON u.id = o.customer_id";

fn load_items_json(conn: &Connection, order_id: &str) -> Result<Vec<Value>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, product_id, variant_id, product_name, variant_name,
                    quantity, unit_price, line_total, notes
             FROM order_items
             WHERE order_id = ?1
             ORDER BY created_at, id",
        )
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map(params![order_id], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "productId": row.get::<_, Option<String>>(1)?,
                "variantId": row.get::<_, Option<String>>(2)?,
                "productName": row.get::<_, String>(3)?,
                "variantName": row.get::<_, Option<String>>(4)?,
                "quantity": row.get::<_, f64>(5)?,
                "unitPrice": row.get::<_, f64>(6)?,
                "lineTotal": row.get::<_, f64>(7)?,
                "notes": row.get::<_, Option<String>>(8)?,
            }))
        })
        .map_err(|e| e.to_string())?;

    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Build the notification context for an order from its snapshots.
pub(crate) fn load_order_message(
    conn: &Connection,
    order_id: &str,
) -> Result<(OrderMessage, String), String> {
    let (order_number, customer_name, customer_phone, total_amount): (
        String,
        String,
        Option<String>,
        f64,
    ) = conn
        .query_row(
            "SELECT o.order_number, u.name, u.phone, o.total_amount
             FROM orders o JOIN users u ON u.id = o.customer_id
             WHERE o.id = ?1",
            params![order_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .map_err(|_| format!("Order not found: {order_id}"))?;

    let mut stmt = conn
        .prepare(
            "SELECT product_name, variant_name, quantity, line_total
             FROM order_items WHERE order_id = ?1 ORDER BY created_at, id",
        )
        .map_err(|e| e.to_string())?;
    let lines = stmt
        .query_map(params![order_id], |row| {
            Ok(MessageLine {
                product_name: row.get(0)?,
                variant_name: row.get(1)?,
                quantity: row.get(2)?,
                line_total: row.get(3)?,
            })
        })
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();

    Ok((
        OrderMessage {
            order_number,
            customer_name,
            lines,
            total_amount,
        },
        customer_phone.unwrap_or_default(),
    ))
}

// ---------------------------------------------------------------------------
// Create order
// ---------------------------------------------------------------------------

/// Create an order with its line items.
///
/// Prices and names are resolved from the catalog and snapshotted onto
/// the items; the order number is allocated and the `order_created`
/// notification enqueued in the same transaction.
pub fn create_order(
    db: &DbState,
    payload: &OrderPayload,
    created_by: Option<&str>,
) -> Result<Value, String> {
    if payload.items.is_empty() {
        return Err("Order needs at least one item".into());
    }
    let shipping_method = payload
        .shipping_method
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("pickup");
    if shipping_method != "pickup" && shipping_method != "courier" {
        return Err(format!(
            "Invalid shipping method: {shipping_method}. Must be pickup or courier"
        ));
    }
    let shipping_address = payload
        .shipping_address
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if shipping_method == "courier" && shipping_address.is_none() {
        return Err("Courier orders need a shipping address".into());
    }
    let discount_amount = payload.discount_amount.unwrap_or(0.0);
    if discount_amount < 0.0 {
        return Err("Discount cannot be negative".into());
    }
    let shipping_fee = payload.shipping_fee.unwrap_or(0.0);
    if shipping_fee < 0.0 {
        return Err("Shipping fee cannot be negative".into());
    }
    for item in &payload.items {
        if item.quantity <= 0.0 {
            return Err("Item quantity must be positive".into());
        }
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    // Customer must exist and be an actual customer record
    let (customer_name, customer_phone): (String, Option<String>) = conn
        .query_row(
            "SELECT name, phone FROM users WHERE id = ?1 AND role = 'customer' AND is_active = 1",
            params![payload.customer_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|_| format!("Customer not found: {}", payload.customer_id))?;

    // Resolve catalog snapshots before opening the write transaction
    struct ResolvedItem {
        product_id: String,
        variant_id: Option<String>,
        product_name: String,
        variant_name: Option<String>,
        quantity: f64,
        unit_price: f64,
        line_total: f64,
        notes: Option<String>,
    }

    let mut resolved: Vec<ResolvedItem> = Vec::with_capacity(payload.items.len());
    let mut subtotal = 0.0f64;
    for item in &payload.items {
        let (product_name, variant_name, unit_price) =
            catalog::resolve_price(&conn, &item.product_id, item.variant_id.as_deref())?;
        let line_total = unit_price * item.quantity;
        subtotal += line_total;
        resolved.push(ResolvedItem {
            product_id: item.product_id.clone(),
            variant_id: item.variant_id.clone(),
            product_name,
            variant_name,
            quantity: item.quantity,
            unit_price,
            line_total,
            notes: item.notes.as_deref().map(str::trim).map(String::from),
        });
    }

    if discount_amount > subtotal {
        return Err("Discount cannot exceed the subtotal".into());
    }
    let total_amount = subtotal - discount_amount + shipping_fee;

    let order_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let day = Local::now().format("%Y%m%d").to_string();

    // The UNIQUE constraint on order_number backstops the allocator;
    // a conflict only means another writer won the number, so retry.
    let mut attempts = 0;
    let order_number = loop {
        attempts += 1;

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| format!("begin transaction: {e}"))?;

        let result = (|| -> Result<String, String> {
            let number = next_order_number(&conn, &day)?;

            conn.execute(
                "INSERT INTO orders (
                    id, order_number, customer_id, status, shipping_method,
                    shipping_address, notes, subtotal, discount_amount,
                    shipping_fee, total_amount, payment_status, created_by,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'unpaid', ?11, ?12, ?12)",
                params![
                    order_id,
                    number,
                    payload.customer_id,
                    shipping_method,
                    shipping_address,
                    payload.notes.as_deref().map(str::trim),
                    subtotal,
                    discount_amount,
                    shipping_fee,
                    total_amount,
                    created_by,
                    now,
                ],
            )
            .map_err(|e| format!("insert order: {e}"))?;

            for item in &resolved {
                conn.execute(
                    "INSERT INTO order_items (
                        id, order_id, product_id, variant_id, product_name,
                        variant_name, quantity, unit_price, line_total, notes, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        Uuid::new_v4().to_string(),
                        order_id,
                        item.product_id,
                        item.variant_id,
                        item.product_name,
                        item.variant_name,
                        item.quantity,
                        item.unit_price,
                        item.line_total,
                        item.notes,
                        now,
                    ],
                )
                .map_err(|e| format!("insert order item: {e}"))?;
            }

            // Enqueue the order_created message in the same transaction
            if let Some(ref phone) = customer_phone {
                let store = StoreProfile::load(&conn);
                let message = notifications::format_order_created(
                    &store,
                    &OrderMessage {
                        order_number: number.clone(),
                        customer_name: customer_name.clone(),
                        lines: resolved
                            .iter()
                            .map(|i| MessageLine {
                                product_name: i.product_name.clone(),
                                variant_name: i.variant_name.clone(),
                                quantity: i.quantity,
                                line_total: i.line_total,
                            })
                            .collect(),
                        total_amount,
                    },
                );
                notifications::enqueue(&conn, Some(&order_id), phone, "order_created", &message)?;
            }

            Ok(number)
        })();

        match result {
            Ok(number) => {
                conn.execute_batch("COMMIT")
                    .map_err(|e| format!("commit: {e}"))?;
                break number;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                if e.contains("UNIQUE") && e.contains("order_number") && attempts < 3 {
                    warn!(attempts, "order number conflict, retrying allocation");
                    continue;
                }
                return Err(e);
            }
        }
    };

    info!(
        order_id = %order_id,
        order_number = %order_number,
        total = %total_amount,
        "order created"
    );

    // get_order re-locks the connection, so release the guard first
    drop(conn);
    get_order(db, &order_id)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Get one order with items and payments.
pub fn get_order(db: &DbState, order_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut order = conn
        .query_row(
            &format!("{ORDER_SELECT} WHERE o.id = ?1"),
            params![order_id],
            order_json,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => format!("Order not found: {order_id}"),
            _ => format!("query order: {e}"),
        })?;

    let items = load_items_json(&conn, order_id)?;

    let mut pay_stmt = conn
        .prepare(
            "SELECT id, method, amount, status, reference, confirmed_at, created_at
             FROM payments
             WHERE order_id = ?1
             ORDER BY created_at",
        )
        .map_err(|e| e.to_string())?;
    let payments: Vec<Value> = pay_stmt
        .query_map(params![order_id], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "method": row.get::<_, String>(1)?,
                "amount": row.get::<_, f64>(2)?,
                "status": row.get::<_, String>(3)?,
                "reference": row.get::<_, Option<String>>(4)?,
                "confirmedAt": row.get::<_, Option<String>>(5)?,
                "createdAt": row.get::<_, String>(6)?,
            }))
        })
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();

    if let Value::Object(ref mut map) = order {
        map.insert("items".into(), serde_json::json!(items));
        map.insert("payments".into(), serde_json::json!(payments));
    }

    Ok(order)
}

/// List orders with optional filters, newest first.
pub fn list_orders(db: &DbState, filter: &OrderListFilter) -> Result<Value, String> {
    if let Some(ref status) = filter.status {
        if !ORDER_STATUSES.contains(&status.as_str()) {
            return Err(format!("Invalid status filter: {status}"));
        }
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut sql = format!("{ORDER_SELECT} WHERE 1=1");
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref status) = filter.status {
        args.push(Box::new(status.clone()));
        sql.push_str(&format!(" AND o.status = ?{}", args.len()));
    }
    if let Some(ref customer_id) = filter.customer_id {
        args.push(Box::new(customer_id.clone()));
        sql.push_str(&format!(" AND o.customer_id = ?{}", args.len()));
    }
    if let Some(ref from) = filter.date_from {
        args.push(Box::new(from.clone()));
        sql.push_str(&format!(" AND substr(o.created_at, 1, 10) >= ?{}", args.len()));
    }
    if let Some(ref to) = filter.date_to {
        args.push(Box::new(to.clone()));
        sql.push_str(&format!(" AND substr(o.created_at, 1, 10) <= ?{}", args.len()));
    }

    let limit = filter.limit.unwrap_or(50).clamp(1, 200);
    let offset = filter.offset.unwrap_or(0).max(0);
    sql.push_str(&format!(
        " ORDER BY o.created_at DESC LIMIT {limit} OFFSET {offset}"
    ));

    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let params_ref: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_ref.as_slice(), order_json)
        .map_err(|e| e.to_string())?;

    let mut orders = Vec::new();
    for row in rows {
        match row {
            Ok(o) => orders.push(o),
            Err(e) => warn!("skipping malformed order row: {e}"),
        }
    }

    Ok(serde_json::json!(orders))
}

// ---------------------------------------------------------------------------
// Status updates
// ---------------------------------------------------------------------------

/// Move an order through its status lifecycle.
///
/// `ready`, `completed`, and `cancelled` enqueue a customer
/// notification in the same transaction. Cancelling is only possible
/// while nothing has been confirmed against the order.
pub fn update_status(db: &DbState, order_id: &str, new_status: &str) -> Result<Value, String> {
    let new_status = new_status.trim().to_lowercase();
    if !ORDER_STATUSES.contains(&new_status.as_str()) {
        return Err(format!("Invalid status: {new_status}"));
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let (current, payment_status): (String, String) = conn
        .query_row(
            "SELECT status, payment_status FROM orders WHERE id = ?1",
            params![order_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|_| format!("Order not found: {order_id}"))?;

    if !transition_allowed(&current, &new_status) {
        return Err(format!(
            "Cannot move order from {current} to {new_status}"
        ));
    }
    if new_status == "cancelled" && payment_status != "unpaid" {
        return Err("Cannot cancel an order with confirmed payments; refund them first".into());
    }

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;

    let result = (|| -> Result<(), String> {
        conn.execute(
            "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_status, Utc::now().to_rfc3339(), order_id],
        )
        .map_err(|e| format!("update status: {e}"))?;

        if matches!(new_status.as_str(), "ready" | "completed" | "cancelled") {
            let (message_ctx, phone) = load_order_message(&conn, order_id)?;
            if !phone.is_empty() {
                let store = StoreProfile::load(&conn);
                let message = notifications::format_order_status(&store, &message_ctx, &new_status);
                notifications::enqueue(
                    &conn,
                    Some(order_id),
                    &phone,
                    &format!("order_{new_status}"),
                    &message,
                )?;
            }
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

    info!(order_id = %order_id, from = %current, to = %new_status, "order status updated");

    Ok(serde_json::json!({
        "id": order_id,
        "status": new_status,
        "previousStatus": current,
    }))
}

// ===========================================================================
// Tests
// ===========================================================================
