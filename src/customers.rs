//! Customer registry for Inkwell POS.
//!
//! Customers are `users` rows with role `customer` and no credentials.
//! Phone numbers are stored normalized because WhatsApp delivery is
//! keyed on them.

use chrono::Utc;
use rusqlite::params;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;

// ---------------------------------------------------------------------------
// Phone normalization
// ---------------------------------------------------------------------------

/// Normalize a phone number to international digits-only form.
///
/// Strips every non-digit and rewrites a local `0` prefix to `62`
/// (`0812...` -> `62812...`) so the stored value is directly usable as
/// a WhatsApp recipient.
pub fn normalize_phone(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if let Some(rest) = digits.strip_prefix('0') {
        return format!("62{rest}");
    }
    digits
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPayload {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomerUpdatePayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

// ---------------------------------------------------------------------------
// Row shaping
// ---------------------------------------------------------------------------

fn customer_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "phone": row.get::<_, Option<String>>(2)?,
        "email": row.get::<_, Option<String>>(3)?,
        "address": row.get::<_, Option<String>>(4)?,
        "isActive": row.get::<_, i64>(5)? != 0,
        "createdAt": row.get::<_, String>(6)?,
        "updatedAt": row.get::<_, String>(7)?,
    }))
}

const CUSTOMER_COLUMNS: &str =
    "id, name, phone, email, address, is_active, created_at, updated_at";

// ---------------------------------------------------------------------------
// Registration / update
// ---------------------------------------------------------------------------

/// Register a new customer.
pub fn register_customer(db: &DbState, payload: &CustomerPayload) -> Result<Value, String> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err("Customer name is required".into());
    }
    let phone = normalize_phone(&payload.phone);
    if phone.len() < 8 {
        return Err("A valid phone number is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let duplicate: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'customer' AND phone = ?1",
            params![phone],
            |row| row.get(0),
        )
        .map_err(|e| format!("check duplicate phone: {e}"))?;
    if duplicate > 0 {
        return Err(format!("A customer with phone {phone} already exists"));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (id, name, phone, email, address, role, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'customer', 1, ?6, ?6)",
        params![
            id,
            name,
            phone,
            payload.email.as_deref().map(str::trim),
            payload.address.as_deref().map(str::trim),
            now,
        ],
    )
    .map_err(|e| format!("insert customer: {e}"))?;

    info!(customer_id = %id, phone = %phone, "customer registered");

    Ok(serde_json::json!({
        "id": id,
        "name": name,
        "phone": phone,
        "email": payload.email.as_deref().map(str::trim),
        "address": payload.address.as_deref().map(str::trim),
        "isActive": true,
        "createdAt": now,
        "updatedAt": now,
    }))
}

/// Update an existing customer. Only supplied fields change.
pub fn update_customer(
    db: &DbState,
    customer_id: &str,
    payload: &CustomerUpdatePayload,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1 AND role = 'customer'",
            params![customer_id],
            |row| row.get(0),
        )
        .map_err(|e| format!("check customer: {e}"))?;
    if exists == 0 {
        return Err(format!("Customer not found: {customer_id}"));
    }

    let phone = payload.phone.as_deref().map(normalize_phone);
    if let Some(ref p) = phone {
        if p.len() < 8 {
            return Err("A valid phone number is required".into());
        }
        let duplicate: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'customer' AND phone = ?1 AND id != ?2",
                params![p, customer_id],
                |row| row.get(0),
            )
            .map_err(|e| format!("check duplicate phone: {e}"))?;
        if duplicate > 0 {
            return Err(format!("A customer with phone {p} already exists"));
        }
    }

    conn.execute(
        "UPDATE users SET
            name = COALESCE(?1, name),
            phone = COALESCE(?2, phone),
            email = COALESCE(?3, email),
            address = COALESCE(?4, address),
            is_active = COALESCE(?5, is_active),
            updated_at = ?6
         WHERE id = ?7",
        params![
            payload.name.as_deref().map(str::trim),
            phone,
            payload.email.as_deref().map(str::trim),
            payload.address.as_deref().map(str::trim),
            payload.is_active.map(|v| v as i64),
            Utc::now().to_rfc3339(),
            customer_id,
        ],
    )
    .map_err(|e| format!("update customer: {e}"))?;

    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM users WHERE id = ?1"),
        params![customer_id],
        customer_row_json,
    )
    .map_err(|e| format!("reload customer: {e}"))
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// List customers, newest first.
pub fn list_customers(db: &DbState, limit: i64, offset: i64) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM users
             WHERE role = 'customer'
             ORDER BY created_at DESC
             LIMIT ?1 OFFSET ?2"
        ))
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map(params![limit.clamp(1, 200), offset.max(0)], customer_row_json)
        .map_err(|e| e.to_string())?;

    let mut customers = Vec::new();
    for row in rows {
        match row {
            Ok(c) => customers.push(c),
            Err(e) => warn!("skipping malformed customer row: {e}"),
        }
    }

    Ok(serde_json::json!(customers))
}

/// Search customers by name substring or phone fragment.
pub fn search_customers(db: &DbState, query: &str) -> Result<Value, String> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(serde_json::json!([]));
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let name_pattern = format!("%{query}%");
    let phone_pattern = format!("%{}%", normalize_phone(query));

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM users
             WHERE role = 'customer'
               AND (name LIKE ?1 COLLATE NOCASE OR phone LIKE ?2)
             ORDER BY name
             LIMIT 50"
        ))
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map(params![name_pattern, phone_pattern], customer_row_json)
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!(rows
        .filter_map(|r| r.ok())
        .collect::<Vec<Value>>()))
}

/// Look up a single customer by exact (normalized) phone number.
pub fn lookup_by_phone(db: &DbState, phone: &str) -> Result<Value, String> {
    let normalized = normalize_phone(phone);
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    conn.query_row(
        &format!(
            "SELECT {CUSTOMER_COLUMNS} FROM users
             WHERE role = 'customer' AND phone = ?1"
        ),
        params![normalized],
        customer_row_json,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => format!("Customer not found: {phone}"),
        _ => format!("lookup customer: {e}"),
    })
}

/// Get a customer with an order-history summary.
pub fn get_customer(db: &DbState, customer_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut customer = conn
        .query_row(
            &format!(
                "SELECT {CUSTOMER_COLUMNS} FROM users
                 WHERE id = ?1 AND role = 'customer'"
            ),
            params![customer_id],
            customer_row_json,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => format!("Customer not found: {customer_id}"),
            _ => format!("query customer: {e}"),
        })?;

    let (order_count, total_spent, last_order_at): (i64, f64, Option<String>) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(total_amount), 0), MAX(created_at)
             FROM orders
             WHERE customer_id = ?1 AND status != 'cancelled'",
            params![customer_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|e| format!("order summary: {e}"))?;

    if let Value::Object(ref mut map) = customer {
        map.insert("orderCount".into(), serde_json::json!(order_count));
        map.insert("totalSpent".into(), serde_json::json!(total_spent));
        map.insert("lastOrderAt".into(), serde_json::json!(last_order_at));
    }

    Ok(customer)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;

    fn payload(name: &str, phone: &str) -> CustomerPayload {
        CustomerPayload {
            name: name.to_string(),
            phone: phone.to_string(),
            email: None,
            address: None,
        }
    }

    #[test]
    fn normalize_phone_rewrites_local_prefix() {
        assert_eq!(normalize_phone("0812-3456-7890"), "6281234567890");
        assert_eq!(normalize_phone("+62 812 3456 7890"), "6281234567890");
        assert_eq!(normalize_phone("62812"), "62812");
    }

    #[test]
    fn register_normalizes_phone_and_rejects_duplicates() {
        let db = test_db_state();

        let created = register_customer(&db, &payload("Budi", "0812-3456-7890")).expect("register");
        assert_eq!(
            created.get("phone").and_then(Value::as_str),
            Some("6281234567890")
        );

        // Same number in a different spelling is still a duplicate
        let err = register_customer(&db, &payload("Budi Dua", "+62 812 3456 7890"))
            .expect_err("duplicate phone");
        assert!(err.contains("already exists"), "unexpected error: {err}");
    }

    #[test]
    fn register_requires_name_and_phone() {
        let db = test_db_state();

        assert!(register_customer(&db, &payload("  ", "08123456789")).is_err());
        assert!(register_customer(&db, &payload("Budi", "123")).is_err());
    }

    #[test]
    fn search_matches_name_and_phone_fragment() {
        let db = test_db_state();
        register_customer(&db, &payload("Budi Santoso", "081234567890")).expect("register");
        register_customer(&db, &payload("Siti Aminah", "085512345678")).expect("register");

        let by_name = search_customers(&db, "santoso").expect("search");
        assert_eq!(by_name.as_array().map(Vec::len), Some(1));

        let by_phone = search_customers(&db, "5512").expect("search");
        assert_eq!(by_phone.as_array().map(Vec::len), Some(1));
        assert_eq!(
            by_phone[0].get("name").and_then(Value::as_str),
            Some("Siti Aminah")
        );
    }

    #[test]
    fn get_customer_includes_order_summary() {
        let db = test_db_state();
        let created = register_customer(&db, &payload("Budi", "081234567890")).expect("register");
        let customer_id = created.get("id").and_then(Value::as_str).unwrap().to_string();

        {
            let conn = db.conn.lock().expect("db lock");
            conn.execute(
                "INSERT INTO orders (id, order_number, customer_id, subtotal, total_amount, status, created_at, updated_at)
                 VALUES ('o1', 'ORD-20250101-0001', ?1, 150.0, 150.0, 'completed', datetime('now'), datetime('now'))",
                params![customer_id],
            )
            .expect("insert order");
            conn.execute(
                "INSERT INTO orders (id, order_number, customer_id, subtotal, total_amount, status, created_at, updated_at)
                 VALUES ('o2', 'ORD-20250101-0002', ?1, 90.0, 90.0, 'cancelled', datetime('now'), datetime('now'))",
                params![customer_id],
            )
            .expect("insert cancelled order");
        }

        let detail = get_customer(&db, &customer_id).expect("get customer");
        assert_eq!(detail.get("orderCount").and_then(Value::as_i64), Some(1));
        assert_eq!(detail.get("totalSpent").and_then(Value::as_f64), Some(150.0));
    }

    #[test]
    fn update_changes_only_supplied_fields() {
        let db = test_db_state();
        let created = register_customer(&db, &payload("Budi", "081234567890")).expect("register");
        let customer_id = created.get("id").and_then(Value::as_str).unwrap().to_string();

        let updated = update_customer(
            &db,
            &customer_id,
            &CustomerUpdatePayload {
                address: Some("Jl. Melati 5".into()),
                ..Default::default()
            },
        )
        .expect("update");

        assert_eq!(updated.get("name").and_then(Value::as_str), Some("Budi"));
        assert_eq!(
            updated.get("address").and_then(Value::as_str),
            Some("Jl. Melati 5")
        );
    }
}
