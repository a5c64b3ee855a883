//! Financial report endpoints with JSON, PDF, and XLSX output.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::Deserialize;

use super::{require, ApiError, AppState};
use crate::auth::Session;
use crate::db;
use crate::export;
use crate::reports::{self, Period};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ReportQuery {
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

async fn financial(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    require(&session, "view_reports")?;

    let period = Period::parse(query.period.as_deref().unwrap_or("daily"))?;
    let anchor = match query.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .map_err(|_| ApiError::bad_request(format!("Invalid date: {d}. Expected YYYY-MM-DD")))?,
        None => Local::now().date_naive(),
    };
    let format = query
        .format
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or("json")
        .to_lowercase();

    let report = reports::financial_report(&state.db, period, anchor)?;

    match format.as_str() {
        "json" => Ok(Json(serde_json::json!({
            "success": true,
            "data": report,
        }))
        .into_response()),
        "pdf" => {
            require(&session, "export_reports")?;
            let store_name = {
                let conn = state.db.conn.lock().map_err(|e| ApiError::bad_request(e.to_string()))?;
                db::get_setting(&conn, "store", "name")
                    .unwrap_or_else(|| "Inkwell Print".to_string())
            };
            let bytes = export::pdf::render_financial_report(&report, &store_name);
            let filename = format!(
                "financial-{}-{}.pdf",
                report.period, report.date_from
            );
            Ok((
                [
                    (header::CONTENT_TYPE, "application/pdf".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                bytes,
            )
                .into_response())
        }
        "xlsx" => {
            require(&session, "export_reports")?;
            let bytes = export::xlsx::render_financial_report(&report)?;
            let filename = format!(
                "financial-{}-{}.xlsx",
                report.period, report.date_from
            );
            Ok((
                [
                    (
                        header::CONTENT_TYPE,
                        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                            .to_string(),
                    ),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                bytes,
            )
                .into_response())
        }
        other => Err(ApiError::bad_request(format!(
            "Invalid format: {other}. Must be json, pdf, or xlsx"
        ))),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/financial", get(financial))
}
