//! Product catalog for Inkwell POS.
//!
//! Categories group products; products carry a base price per unit
//! (sheets, pcs, square meters for large-format jobs) and optional
//! variants that adjust the base price (paper stock, size, finishing).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::db::DbState;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPayload {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPayload {
    pub name: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub base_price: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdatePayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_price: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantPayload {
    pub name: String,
    #[serde(default)]
    pub price_delta: f64,
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub fn create_category(db: &DbState, payload: &CategoryPayload) -> Result<Value, String> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err("Category name is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO categories (id, name, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, name, payload.description.as_deref().map(str::trim), now],
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE") {
            format!("A category named '{name}' already exists")
        } else {
            format!("insert category: {e}")
        }
    })?;

    info!(category_id = %id, name = %name, "category created");

    Ok(serde_json::json!({
        "id": id,
        "name": name,
        "description": payload.description.as_deref().map(str::trim),
        "createdAt": now,
        "updatedAt": now,
    }))
}

/// List categories with their product counts.
pub fn list_categories(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.description, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM products p WHERE p.category_id = c.id) AS product_count
             FROM categories c
             ORDER BY c.name",
        )
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map([], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?,
                "createdAt": row.get::<_, String>(3)?,
                "updatedAt": row.get::<_, String>(4)?,
                "productCount": row.get::<_, i64>(5)?,
            }))
        })
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!(rows
        .filter_map(|r| r.ok())
        .collect::<Vec<Value>>()))
}

pub fn update_category(
    db: &DbState,
    category_id: &str,
    payload: &CategoryPayload,
) -> Result<Value, String> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err("Category name is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            "UPDATE categories SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                name,
                payload.description.as_deref().map(str::trim),
                Utc::now().to_rfc3339(),
                category_id
            ],
        )
        .map_err(|e| format!("update category: {e}"))?;
    if changed == 0 {
        return Err(format!("Category not found: {category_id}"));
    }

    Ok(serde_json::json!({ "id": category_id, "name": name }))
}

/// Delete a category. Refuses while products still reference it.
pub fn delete_category(db: &DbState, category_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let in_use: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM products WHERE category_id = ?1",
            params![category_id],
            |row| row.get(0),
        )
        .map_err(|e| format!("check category usage: {e}"))?;
    if in_use > 0 {
        return Err(format!(
            "Category still has {in_use} product(s); move or delete them first"
        ));
    }

    let changed = conn
        .execute(
            "DELETE FROM categories WHERE id = ?1",
            params![category_id],
        )
        .map_err(|e| format!("delete category: {e}"))?;
    if changed == 0 {
        return Err(format!("Category not found: {category_id}"));
    }

    info!(category_id = %category_id, "category deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

fn product_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "categoryId": row.get::<_, Option<String>>(1)?,
        "categoryName": row.get::<_, Option<String>>(2)?,
        "name": row.get::<_, String>(3)?,
        "description": row.get::<_, Option<String>>(4)?,
        "basePrice": row.get::<_, f64>(5)?,
        "unit": row.get::<_, String>(6)?,
        "imagePath": row.get::<_, Option<String>>(7)?,
        "isActive": row.get::<_, i64>(8)? != 0,
        "createdAt": row.get::<_, String>(9)?,
        "updatedAt": row.get::<_, String>(10)?,
    }))
}

const PRODUCT_SELECT: &str = "SELECT p.id, p.category_id, c.name, p.name, p.description,
        p.base_price, p.unit, p.image_path, p.is_active, p.created_at, p.updated_at
     FROM products p
     LEFT JOIN categories c ON c.id = p.category_id";

fn category_exists(conn: &Connection, category_id: &str) -> Result<bool, String> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM categories WHERE id = ?1",
            params![category_id],
            |row| row.get(0),
        )
        .map_err(|e| format!("check category: {e}"))?;
    Ok(count > 0)
}

pub fn create_product(db: &DbState, payload: &ProductPayload) -> Result<Value, String> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err("Product name is required".into());
    }
    if payload.base_price < 0.0 {
        return Err("Base price cannot be negative".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    if let Some(ref cid) = payload.category_id {
        if !category_exists(&conn, cid)? {
            return Err(format!("Category not found: {cid}"));
        }
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let unit = payload
        .unit
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or("pcs");

    conn.execute(
        "INSERT INTO products (id, category_id, name, description, base_price, unit, image_path, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
        params![
            id,
            payload.category_id,
            name,
            payload.description.as_deref().map(str::trim),
            payload.base_price,
            unit,
            payload.image_path,
            now,
        ],
    )
    .map_err(|e| format!("insert product: {e}"))?;

    info!(product_id = %id, name = %name, "product created");

    conn.query_row(
        &format!("{PRODUCT_SELECT} WHERE p.id = ?1"),
        params![id],
        product_json,
    )
    .map_err(|e| format!("reload product: {e}"))
}

pub fn update_product(
    db: &DbState,
    product_id: &str,
    payload: &ProductUpdatePayload,
) -> Result<Value, String> {
    if let Some(price) = payload.base_price {
        if price < 0.0 {
            return Err("Base price cannot be negative".into());
        }
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    if let Some(ref cid) = payload.category_id {
        if !category_exists(&conn, cid)? {
            return Err(format!("Category not found: {cid}"));
        }
    }

    let changed = conn
        .execute(
            "UPDATE products SET
                name = COALESCE(?1, name),
                category_id = COALESCE(?2, category_id),
                description = COALESCE(?3, description),
                base_price = COALESCE(?4, base_price),
                unit = COALESCE(?5, unit),
                image_path = COALESCE(?6, image_path),
                is_active = COALESCE(?7, is_active),
                updated_at = ?8
             WHERE id = ?9",
            params![
                payload.name.as_deref().map(str::trim),
                payload.category_id,
                payload.description.as_deref().map(str::trim),
                payload.base_price,
                payload.unit.as_deref().map(str::trim),
                payload.image_path,
                payload.is_active.map(|v| v as i64),
                Utc::now().to_rfc3339(),
                product_id,
            ],
        )
        .map_err(|e| format!("update product: {e}"))?;
    if changed == 0 {
        return Err(format!("Product not found: {product_id}"));
    }

    conn.query_row(
        &format!("{PRODUCT_SELECT} WHERE p.id = ?1"),
        params![product_id],
        product_json,
    )
    .map_err(|e| format!("reload product: {e}"))
}

/// List products (active only unless `include_inactive`), variants joined in.
pub fn list_products(
    db: &DbState,
    category_id: Option<&str>,
    include_inactive: bool,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut sql = format!("{PRODUCT_SELECT} WHERE 1=1");
    if !include_inactive {
        sql.push_str(" AND p.is_active = 1");
    }
    if category_id.is_some() {
        sql.push_str(" AND p.category_id = ?1");
    }
    sql.push_str(" ORDER BY p.name");

    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = match category_id {
        Some(cid) => stmt.query_map(params![cid], product_json),
        None => stmt.query_map([], product_json),
    }
    .map_err(|e| e.to_string())?;

    let mut products: Vec<Value> = rows.filter_map(|r| r.ok()).collect();

    for product in &mut products {
        let pid = product
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let variants = load_variants(&conn, &pid)?;
        if let Value::Object(ref mut map) = product {
            map.insert("variants".into(), variants);
        }
    }

    Ok(serde_json::json!(products))
}

pub fn get_product(db: &DbState, product_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut product = conn
        .query_row(
            &format!("{PRODUCT_SELECT} WHERE p.id = ?1"),
            params![product_id],
            product_json,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => format!("Product not found: {product_id}"),
            _ => format!("query product: {e}"),
        })?;

    let variants = load_variants(&conn, product_id)?;
    if let Value::Object(ref mut map) = product {
        map.insert("variants".into(), variants);
    }

    Ok(product)
}

/// Soft-delete: orders keep their snapshots, so products are deactivated
/// rather than removed once referenced.
pub fn delete_product(db: &DbState, product_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let referenced: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM order_items WHERE product_id = ?1",
            params![product_id],
            |row| row.get(0),
        )
        .map_err(|e| format!("check product usage: {e}"))?;

    if referenced > 0 {
        let changed = conn
            .execute(
                "UPDATE products SET is_active = 0, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), product_id],
            )
            .map_err(|e| format!("deactivate product: {e}"))?;
        if changed == 0 {
            return Err(format!("Product not found: {product_id}"));
        }
        info!(product_id = %product_id, "product deactivated (referenced by orders)");
        return Ok(serde_json::json!({ "deleted": false, "deactivated": true }));
    }

    let changed = conn
        .execute("DELETE FROM products WHERE id = ?1", params![product_id])
        .map_err(|e| format!("delete product: {e}"))?;
    if changed == 0 {
        return Err(format!("Product not found: {product_id}"));
    }

    info!(product_id = %product_id, "product deleted");
    Ok(serde_json::json!({ "deleted": true, "deactivated": false }))
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

fn load_variants(conn: &Connection, product_id: &str) -> Result<Value, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, price_delta, is_active, created_at, updated_at
             FROM product_variants
             WHERE product_id = ?1
             ORDER BY name",
        )
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map(params![product_id], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "priceDelta": row.get::<_, f64>(2)?,
                "isActive": row.get::<_, i64>(3)? != 0,
                "createdAt": row.get::<_, String>(4)?,
                "updatedAt": row.get::<_, String>(5)?,
            }))
        })
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!(rows
        .filter_map(|r| r.ok())
        .collect::<Vec<Value>>()))
}

pub fn create_variant(
    db: &DbState,
    product_id: &str,
    payload: &VariantPayload,
) -> Result<Value, String> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err("Variant name is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let product: Option<f64> = conn
        .query_row(
            "SELECT base_price FROM products WHERE id = ?1",
            params![product_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| format!("check product: {e}"))?;
    let base_price = product.ok_or_else(|| format!("Product not found: {product_id}"))?;

    if base_price + payload.price_delta < 0.0 {
        return Err("Variant would make the effective price negative".into());
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO product_variants (id, product_id, name, price_delta, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
        params![id, product_id, name, payload.price_delta, now],
    )
    .map_err(|e| format!("insert variant: {e}"))?;

    Ok(serde_json::json!({
        "id": id,
        "productId": product_id,
        "name": name,
        "priceDelta": payload.price_delta,
        "isActive": true,
        "createdAt": now,
        "updatedAt": now,
    }))
}

pub fn update_variant(
    db: &DbState,
    variant_id: &str,
    payload: &VariantPayload,
) -> Result<Value, String> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err("Variant name is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            "UPDATE product_variants SET name = ?1, price_delta = ?2, updated_at = ?3 WHERE id = ?4",
            params![name, payload.price_delta, Utc::now().to_rfc3339(), variant_id],
        )
        .map_err(|e| format!("update variant: {e}"))?;
    if changed == 0 {
        return Err(format!("Variant not found: {variant_id}"));
    }

    Ok(serde_json::json!({ "id": variant_id, "name": name, "priceDelta": payload.price_delta }))
}

pub fn delete_variant(db: &DbState, variant_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            "DELETE FROM product_variants WHERE id = ?1",
            params![variant_id],
        )
        .map_err(|e| format!("delete variant: {e}"))?;
    if changed == 0 {
        return Err(format!("Variant not found: {variant_id}"));
    }
    Ok(())
}

/// Resolve the effective unit price of a product + optional variant,
/// returning the snapshot names alongside.
///
/// The variant must belong to the product and both must be active.
pub fn resolve_price(
    conn: &Connection,
    product_id: &str,
    variant_id: Option<&str>,
) -> Result<(String, Option<String>, f64), String> {
    let (product_name, base_price, product_active): (String, f64, i64) = conn
        .query_row(
            "SELECT name, base_price, is_active FROM products WHERE id = ?1",
            params![product_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|_| format!("Product not found: {product_id}"))?;
    if product_active == 0 {
        return Err(format!("Product is inactive: {product_name}"));
    }

    match variant_id {
        None => Ok((product_name, None, base_price)),
        Some(vid) => {
            let (variant_name, price_delta, variant_active): (String, f64, i64) = conn
                .query_row(
                    "SELECT name, price_delta, is_active
                     FROM product_variants
                     WHERE id = ?1 AND product_id = ?2",
                    params![vid, product_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(|_| format!("Variant not found for product: {vid}"))?;
            if variant_active == 0 {
                return Err(format!("Variant is inactive: {variant_name}"));
            }
            Ok((product_name, Some(variant_name), base_price + price_delta))
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;

    fn seed_product(db: &DbState, name: &str, price: f64) -> String {
        let created = create_product(
            db,
            &ProductPayload {
                name: name.to_string(),
                category_id: None,
                description: None,
                base_price: price,
                unit: None,
                image_path: None,
            },
        )
        .expect("create product");
        created.get("id").and_then(Value::as_str).unwrap().to_string()
    }

    #[test]
    fn category_names_are_unique() {
        let db = test_db_state();
        create_category(
            &db,
            &CategoryPayload {
                name: "Stickers".into(),
                description: None,
            },
        )
        .expect("first");

        let err = create_category(
            &db,
            &CategoryPayload {
                name: "Stickers".into(),
                description: None,
            },
        )
        .expect_err("duplicate");
        assert!(err.contains("already exists"), "unexpected error: {err}");
    }

    #[test]
    fn category_delete_refuses_while_in_use() {
        let db = test_db_state();
        let cat = create_category(
            &db,
            &CategoryPayload {
                name: "Banners".into(),
                description: None,
            },
        )
        .expect("category");
        let cat_id = cat.get("id").and_then(Value::as_str).unwrap().to_string();

        create_product(
            &db,
            &ProductPayload {
                name: "Banner 3x1m".into(),
                category_id: Some(cat_id.clone()),
                description: None,
                base_price: 25.0,
                unit: Some("pcs".into()),
                image_path: None,
            },
        )
        .expect("product");

        let err = delete_category(&db, &cat_id).expect_err("should refuse");
        assert!(err.contains("still has"), "unexpected error: {err}");
    }

    #[test]
    fn resolve_price_adds_variant_delta() {
        let db = test_db_state();
        let product_id = seed_product(&db, "Business Cards", 10.0);
        let variant = create_variant(
            &db,
            &product_id,
            &VariantPayload {
                name: "Matte laminate".into(),
                price_delta: 2.5,
            },
        )
        .expect("variant");
        let variant_id = variant.get("id").and_then(Value::as_str).unwrap().to_string();

        let conn = db.conn.lock().expect("db lock");
        let (pname, vname, price) =
            resolve_price(&conn, &product_id, Some(&variant_id)).expect("resolve");
        assert_eq!(pname, "Business Cards");
        assert_eq!(vname.as_deref(), Some("Matte laminate"));
        assert_eq!(price, 12.5);

        let (_, none_variant, base) = resolve_price(&conn, &product_id, None).expect("resolve base");
        assert!(none_variant.is_none());
        assert_eq!(base, 10.0);
    }

    #[test]
    fn resolve_price_rejects_foreign_variant() {
        let db = test_db_state();
        let product_a = seed_product(&db, "Flyer A5", 0.5);
        let product_b = seed_product(&db, "Poster A2", 5.0);
        let variant = create_variant(
            &db,
            &product_a,
            &VariantPayload {
                name: "Glossy".into(),
                price_delta: 0.2,
            },
        )
        .expect("variant");
        let variant_id = variant.get("id").and_then(Value::as_str).unwrap().to_string();

        let conn = db.conn.lock().expect("db lock");
        let err = resolve_price(&conn, &product_b, Some(&variant_id))
            .expect_err("variant belongs to another product");
        assert!(err.contains("Variant not found"), "unexpected error: {err}");
    }

    #[test]
    fn delete_product_soft_deletes_when_referenced() {
        let db = test_db_state();
        let product_id = seed_product(&db, "Flyer A5", 0.5);

        {
            let conn = db.conn.lock().expect("db lock");
            conn.execute(
                "INSERT INTO users (id, name, role, created_at, updated_at)
                 VALUES ('cust-1', 'Budi', 'customer', datetime('now'), datetime('now'))",
                [],
            )
            .expect("customer");
            conn.execute(
                "INSERT INTO orders (id, order_number, customer_id, subtotal, total_amount, created_at, updated_at)
                 VALUES ('ord-1', 'ORD-20250101-0001', 'cust-1', 50.0, 50.0, datetime('now'), datetime('now'))",
                [],
            )
            .expect("order");
            conn.execute(
                "INSERT INTO order_items (id, order_id, product_id, product_name, quantity, unit_price, line_total, created_at)
                 VALUES ('item-1', 'ord-1', ?1, 'Flyer A5', 100, 0.5, 50.0, datetime('now'))",
                params![product_id],
            )
            .expect("item");
        }

        let result = delete_product(&db, &product_id).expect("delete");
        assert_eq!(result.get("deactivated").and_then(Value::as_bool), Some(true));

        let detail = get_product(&db, &product_id).expect("still queryable");
        assert_eq!(detail.get("isActive").and_then(Value::as_bool), Some(false));
    }

    #[test]
    fn inactive_products_are_hidden_from_default_listing() {
        let db = test_db_state();
        let product_id = seed_product(&db, "Old Product", 1.0);
        update_product(
            &db,
            &product_id,
            &ProductUpdatePayload {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .expect("deactivate");

        let visible = list_products(&db, None, false).expect("list");
        assert_eq!(visible.as_array().map(Vec::len), Some(0));

        let all = list_products(&db, None, true).expect("list all");
        assert_eq!(all.as_array().map(Vec::len), Some(1));
    }
}
