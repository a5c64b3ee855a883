//! Financial reporting for Inkwell POS.
//!
//! A period (daily/weekly/monthly/annual) plus an anchor date resolves
//! to an inclusive date range; orders, confirmed payments, and expenses
//! in that range are loaded and reduced in memory into revenue totals,
//! breakdowns, and top-product rankings. Revenue is cash-basis: only
//! confirmed payments count, recognized on their confirmation date.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rusqlite::params;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::db::DbState;

// ---------------------------------------------------------------------------
// Periods
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    Annual,
}

impl Period {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "annual" | "yearly" => Ok(Self::Annual),
            other => Err(format!(
                "Invalid period: {other}. Must be daily, weekly, monthly, or annual"
            )),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    /// Resolve the inclusive date range containing `anchor`.
    ///
    /// Weeks are ISO weeks (Monday-based); months and years are
    /// calendar-aligned.
    pub fn range(&self, anchor: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Self::Daily => (anchor, anchor),
            Self::Weekly => {
                let monday =
                    anchor - Duration::days(anchor.weekday().num_days_from_monday() as i64);
                (monday, monday + Duration::days(6))
            }
            Self::Monthly => {
                let first = NaiveDate::from_ymd_opt(anchor.year(), anchor.month(), 1)
                    .unwrap_or(anchor);
                let next_month = if anchor.month() == 12 {
                    NaiveDate::from_ymd_opt(anchor.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(anchor.year(), anchor.month() + 1, 1)
                }
                .unwrap_or(anchor);
                (first, next_month - Duration::days(1))
            }
            Self::Annual => {
                let first = NaiveDate::from_ymd_opt(anchor.year(), 1, 1).unwrap_or(anchor);
                let last = NaiveDate::from_ymd_opt(anchor.year(), 12, 31).unwrap_or(anchor);
                (first, last)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Report shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodBreakdown {
    pub method: String,
    pub count: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub name: String,
    pub quantity: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPoint {
    pub date: String,
    pub revenue: f64,
    pub orders: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialReport {
    pub period: String,
    pub date_from: String,
    pub date_to: String,
    pub revenue: f64,
    pub expense_total: f64,
    pub net_income: f64,
    pub orders_total: i64,
    pub orders_by_status: BTreeMap<String, i64>,
    pub payment_methods: Vec<MethodBreakdown>,
    pub top_products: Vec<TopProduct>,
    pub expenses_by_category: Vec<CategoryBreakdown>,
    pub daily_revenue: Vec<DayPoint>,
    pub generated_at: String,
}

/// How many products the ranking keeps.
const TOP_PRODUCTS_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Build the financial report for one period.
pub fn financial_report(
    db: &DbState,
    period: Period,
    anchor: NaiveDate,
) -> Result<FinancialReport, String> {
    let (from, to) = period.range(anchor);
    let from_str = from.format("%Y-%m-%d").to_string();
    let to_str = to.format("%Y-%m-%d").to_string();

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    // Confirmed payments in range, recognized on their confirmation date
    let mut stmt = conn
        .prepare(
            "SELECT method, amount, substr(COALESCE(confirmed_at, created_at), 1, 10)
             FROM payments
             WHERE status = 'confirmed'
               AND substr(COALESCE(confirmed_at, created_at), 1, 10) >= ?1
               AND substr(COALESCE(confirmed_at, created_at), 1, 10) <= ?2",
        )
        .map_err(|e| e.to_string())?;
    let payment_rows: Vec<(String, f64, String)> = stmt
        .query_map(params![from_str, to_str], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();

    let mut revenue = 0.0f64;
    let mut by_method: BTreeMap<String, (i64, f64)> = BTreeMap::new();
    let mut revenue_by_day: HashMap<String, f64> = HashMap::new();
    for (method, amount, day) in &payment_rows {
        revenue += amount;
        let entry = by_method.entry(method.clone()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += amount;
        *revenue_by_day.entry(day.clone()).or_insert(0.0) += amount;
    }

    // Orders placed in range
    let mut stmt = conn
        .prepare(
            "SELECT status, substr(created_at, 1, 10)
             FROM orders
             WHERE substr(created_at, 1, 10) >= ?1
               AND substr(created_at, 1, 10) <= ?2",
        )
        .map_err(|e| e.to_string())?;
    let order_rows: Vec<(String, String)> = stmt
        .query_map(params![from_str, to_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();

    let mut orders_by_status: BTreeMap<String, i64> = BTreeMap::new();
    let mut orders_by_day: HashMap<String, i64> = HashMap::new();
    for (status, day) in &order_rows {
        *orders_by_status.entry(status.clone()).or_insert(0) += 1;
        *orders_by_day.entry(day.clone()).or_insert(0) += 1;
    }
    let orders_total = order_rows.len() as i64;

    // Top products by quantity across non-cancelled orders in range
    let mut stmt = conn
        .prepare(
            "SELECT oi.product_name, oi.variant_name, oi.quantity, oi.line_total
             FROM order_items oi
             JOIN orders o ON o.id = oi.order_id
             WHERE o.status != 'cancelled'
               AND substr(o.created_at, 1, 10) >= ?1
               AND substr(o.created_at, 1, 10) <= ?2",
        )
        .map_err(|e| e.to_string())?;
    let item_rows: Vec<(String, Option<String>, f64, f64)> = stmt
        .query_map(params![from_str, to_str], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();

    let mut by_product: HashMap<String, (f64, f64)> = HashMap::new();
    for (product_name, variant_name, quantity, line_total) in &item_rows {
        let name = match variant_name {
            Some(v) if !v.is_empty() => format!("{product_name} ({v})"),
            _ => product_name.clone(),
        };
        let entry = by_product.entry(name).or_insert((0.0, 0.0));
        entry.0 += quantity;
        entry.1 += line_total;
    }
    let mut top_products: Vec<TopProduct> = by_product
        .into_iter()
        .map(|(name, (quantity, item_revenue))| TopProduct {
            name,
            quantity,
            revenue: item_revenue,
        })
        .collect();
    top_products.sort_by(|a, b| {
        b.quantity
            .partial_cmp(&a.quantity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    top_products.truncate(TOP_PRODUCTS_LIMIT);

    // Expenses in range
    let mut stmt = conn
        .prepare(
            "SELECT category, amount FROM expenses
             WHERE expense_date >= ?1 AND expense_date <= ?2",
        )
        .map_err(|e| e.to_string())?;
    let expense_rows: Vec<(String, f64)> = stmt
        .query_map(params![from_str, to_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .map_err(|e| e.to_string())?
        .filter_map(|r| r.ok())
        .collect();

    let mut expense_total = 0.0f64;
    let mut by_category: BTreeMap<String, f64> = BTreeMap::new();
    for (category, amount) in &expense_rows {
        expense_total += amount;
        *by_category.entry(category.clone()).or_insert(0.0) += amount;
    }

    // Per-day revenue series across the whole range
    let mut daily_revenue = Vec::new();
    let mut day = from;
    while day <= to {
        let key = day.format("%Y-%m-%d").to_string();
        daily_revenue.push(DayPoint {
            revenue: revenue_by_day.get(&key).copied().unwrap_or(0.0),
            orders: orders_by_day.get(&key).copied().unwrap_or(0),
            date: key,
        });
        day += Duration::days(1);
    }

    Ok(FinancialReport {
        period: period.label().to_string(),
        date_from: from_str,
        date_to: to_str,
        revenue,
        expense_total,
        net_income: revenue - expense_total,
        orders_total,
        orders_by_status,
        payment_methods: by_method
            .into_iter()
            .map(|(method, (count, amount))| MethodBreakdown {
                method,
                count,
                amount,
            })
            .collect(),
        top_products,
        expenses_by_category: by_category
            .into_iter()
            .map(|(category, amount)| CategoryBreakdown { category, amount })
            .collect(),
        daily_revenue,
        generated_at: Utc::now().to_rfc3339(),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
