//! Expense tracking for Inkwell POS.
//!
//! Operational costs (ink, paper stock, machine maintenance, salaries)
//! recorded with a category, an expense date, and an optional uploaded
//! proof file. Reports subtract these from revenue.

use chrono::{NaiveDate, Utc};
use rusqlite::params;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;

pub const EXPENSE_CATEGORIES: &[&str] = &[
    "materials",
    "equipment",
    "salaries",
    "utilities",
    "rent",
    "other",
];

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpensePayload {
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub expense_date: Option<String>,
    #[serde(default)]
    pub proof_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseListFilter {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_category(raw: Option<&str>) -> Result<String, String> {
    let category = raw
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("other")
        .to_lowercase();
    if !EXPENSE_CATEGORIES.contains(&category.as_str()) {
        return Err(format!(
            "Invalid expense category: {category}. Must be one of {}",
            EXPENSE_CATEGORIES.join(", ")
        ));
    }
    Ok(category)
}

fn validate_date(raw: Option<&str>) -> Result<String, String> {
    match raw.map(str::trim).filter(|d| !d.is_empty()) {
        None => Ok(Utc::now().format("%Y-%m-%d").to_string()),
        Some(d) => {
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|_| format!("Invalid expense date: {d}. Expected YYYY-MM-DD"))?;
            Ok(d.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

fn expense_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "description": row.get::<_, String>(1)?,
        "category": row.get::<_, String>(2)?,
        "amount": row.get::<_, f64>(3)?,
        "expenseDate": row.get::<_, String>(4)?,
        "proofPath": row.get::<_, Option<String>>(5)?,
        "recordedBy": row.get::<_, Option<String>>(6)?,
        "createdAt": row.get::<_, String>(7)?,
        "updatedAt": row.get::<_, String>(8)?,
    }))
}

const EXPENSE_COLUMNS: &str = "id, description, category, amount, expense_date,
        proof_path, recorded_by, created_at, updated_at";

/// Record an expense.
pub fn record_expense(
    db: &DbState,
    payload: &ExpensePayload,
    recorded_by: Option<&str>,
) -> Result<Value, String> {
    let description = payload.description.trim();
    if description.is_empty() {
        return Err("Expense description is required".into());
    }
    if payload.amount <= 0.0 {
        return Err("Amount must be positive".into());
    }
    let category = validate_category(payload.category.as_deref())?;
    let expense_date = validate_date(payload.expense_date.as_deref())?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO expenses (id, description, category, amount, expense_date, proof_path, recorded_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            description,
            category,
            payload.amount,
            expense_date,
            payload.proof_path,
            recorded_by,
            now,
        ],
    )
    .map_err(|e| format!("insert expense: {e}"))?;

    info!(expense_id = %id, category = %category, amount = %payload.amount, "expense recorded");

    Ok(serde_json::json!({
        "id": id,
        "description": description,
        "category": category,
        "amount": payload.amount,
        "expenseDate": expense_date,
        "proofPath": payload.proof_path,
        "recordedBy": recorded_by,
        "createdAt": now,
        "updatedAt": now,
    }))
}

/// Update an expense. Only supplied fields change.
pub fn update_expense(
    db: &DbState,
    expense_id: &str,
    payload: &ExpensePayload,
) -> Result<Value, String> {
    let description = payload.description.trim();
    if description.is_empty() {
        return Err("Expense description is required".into());
    }
    if payload.amount <= 0.0 {
        return Err("Amount must be positive".into());
    }
    let category = validate_category(payload.category.as_deref())?;
    let expense_date = validate_date(payload.expense_date.as_deref())?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            "UPDATE expenses SET
                description = ?1,
                category = ?2,
                amount = ?3,
                expense_date = ?4,
                proof_path = COALESCE(?5, proof_path),
                updated_at = ?6
             WHERE id = ?7",
            params![
                description,
                category,
                payload.amount,
                expense_date,
                payload.proof_path,
                Utc::now().to_rfc3339(),
                expense_id,
            ],
        )
        .map_err(|e| format!("update expense: {e}"))?;
    if changed == 0 {
        return Err(format!("Expense not found: {expense_id}"));
    }

    conn.query_row(
        &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?1"),
        params![expense_id],
        expense_json,
    )
    .map_err(|e| format!("reload expense: {e}"))
}

/// Delete an expense record.
pub fn delete_expense(db: &DbState, expense_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute("DELETE FROM expenses WHERE id = ?1", params![expense_id])
        .map_err(|e| format!("delete expense: {e}"))?;
    if changed == 0 {
        return Err(format!("Expense not found: {expense_id}"));
    }
    info!(expense_id = %expense_id, "expense deleted");
    Ok(())
}

/// List expenses with optional category/date filters, newest first,
/// plus a total for the filtered set.
pub fn list_expenses(db: &DbState, filter: &ExpenseListFilter) -> Result<Value, String> {
    if let Some(ref c) = filter.category {
        if !EXPENSE_CATEGORIES.contains(&c.as_str()) {
            return Err(format!("Invalid category filter: {c}"));
        }
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut sql = format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE 1=1");
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref category) = filter.category {
        args.push(Box::new(category.clone()));
        sql.push_str(&format!(" AND category = ?{}", args.len()));
    }
    if let Some(ref from) = filter.date_from {
        args.push(Box::new(from.clone()));
        sql.push_str(&format!(" AND expense_date >= ?{}", args.len()));
    }
    if let Some(ref to) = filter.date_to {
        args.push(Box::new(to.clone()));
        sql.push_str(&format!(" AND expense_date <= ?{}", args.len()));
    }
    sql.push_str(" ORDER BY expense_date DESC, created_at DESC LIMIT 500");

    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let params_ref: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_ref.as_slice(), expense_json)
        .map_err(|e| e.to_string())?;

    let mut expenses = Vec::new();
    let mut total = 0.0f64;
    for row in rows {
        match row {
            Ok(e) => {
                total += e.get("amount").and_then(Value::as_f64).unwrap_or(0.0);
                expenses.push(e);
            }
            Err(e) => warn!("skipping malformed expense row: {e}"),
        }
    }

    Ok(serde_json::json!({
        "expenses": expenses,
        "total": total,
    }))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;

    fn payload(desc: &str, category: Option<&str>, amount: f64, date: Option<&str>) -> ExpensePayload {
        ExpensePayload {
            description: desc.into(),
            category: category.map(String::from),
            amount,
            expense_date: date.map(String::from),
            proof_path: None,
        }
    }

    #[test]
    fn record_defaults_category_and_date() {
        let db = test_db_state();
        let created =
            record_expense(&db, &payload("Ink refill", None, 250000.0, None), Some("admin-1"))
                .expect("record");
        assert_eq!(created.get("category").and_then(Value::as_str), Some("other"));
        let date = created
            .get("expenseDate")
            .and_then(Value::as_str)
            .expect("date");
        assert_eq!(date.len(), 10, "date should be YYYY-MM-DD: {date}");
    }

    #[test]
    fn record_validates_inputs() {
        let db = test_db_state();

        assert!(record_expense(&db, &payload("  ", None, 10.0, None), None).is_err());
        assert!(record_expense(&db, &payload("Paper", None, 0.0, None), None).is_err());
        assert!(record_expense(&db, &payload("Paper", Some("snacks"), 10.0, None), None).is_err());
        assert!(
            record_expense(&db, &payload("Paper", None, 10.0, Some("03-01-2025")), None).is_err()
        );
    }

    #[test]
    fn list_filters_by_date_range_and_totals() {
        let db = test_db_state();
        record_expense(
            &db,
            &payload("Paper stock", Some("materials"), 500000.0, Some("2025-03-01")),
            None,
        )
        .expect("record");
        record_expense(
            &db,
            &payload("Electricity", Some("utilities"), 300000.0, Some("2025-03-15")),
            None,
        )
        .expect("record");
        record_expense(
            &db,
            &payload("Cutter blades", Some("equipment"), 80000.0, Some("2025-04-02")),
            None,
        )
        .expect("record");

        let march = list_expenses(
            &db,
            &ExpenseListFilter {
                category: None,
                date_from: Some("2025-03-01".into()),
                date_to: Some("2025-03-31".into()),
            },
        )
        .expect("list");
        assert_eq!(
            march.get("expenses").and_then(Value::as_array).map(Vec::len),
            Some(2)
        );
        assert_eq!(march.get("total").and_then(Value::as_f64), Some(800000.0));

        let materials = list_expenses(
            &db,
            &ExpenseListFilter {
                category: Some("materials".into()),
                date_from: None,
                date_to: None,
            },
        )
        .expect("list");
        assert_eq!(
            materials
                .get("expenses")
                .and_then(Value::as_array)
                .map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn update_and_delete_roundtrip() {
        let db = test_db_state();
        let created = record_expense(
            &db,
            &payload("Toner", Some("materials"), 400000.0, Some("2025-03-05")),
            None,
        )
        .expect("record");
        let id = created.get("id").and_then(Value::as_str).unwrap().to_string();

        let updated = update_expense(
            &db,
            &id,
            &payload("Toner CMYK", Some("materials"), 450000.0, Some("2025-03-05")),
        )
        .expect("update");
        assert_eq!(
            updated.get("description").and_then(Value::as_str),
            Some("Toner CMYK")
        );
        assert_eq!(updated.get("amount").and_then(Value::as_f64), Some(450000.0));

        delete_expense(&db, &id).expect("delete");
        assert!(delete_expense(&db, &id).is_err(), "double delete");
    }
}
