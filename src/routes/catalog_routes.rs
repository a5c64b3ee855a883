//! Category, product, and variant endpoints.
//!
//! Reads are open to any authenticated session; writes need the
//! `manage_catalog` permission (admins).

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use super::{ok, require, ApiResult, AppState};
use crate::auth::Session;
use crate::catalog::{
    self, CategoryPayload, ProductPayload, ProductUpdatePayload, VariantPayload,
};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ProductListQuery {
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    include_inactive: Option<bool>,
}

// -- Categories --------------------------------------------------------------

async fn list_categories(State(state): State<AppState>, _session: Session) -> ApiResult {
    Ok(ok(catalog::list_categories(&state.db)?))
}

async fn create_category(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CategoryPayload>,
) -> ApiResult {
    require(&session, "manage_catalog")?;
    Ok(ok(catalog::create_category(&state.db, &payload)?))
}

async fn update_category(
    State(state): State<AppState>,
    session: Session,
    Path(category_id): Path<String>,
    Json(payload): Json<CategoryPayload>,
) -> ApiResult {
    require(&session, "manage_catalog")?;
    Ok(ok(catalog::update_category(&state.db, &category_id, &payload)?))
}

async fn delete_category(
    State(state): State<AppState>,
    session: Session,
    Path(category_id): Path<String>,
) -> ApiResult {
    require(&session, "manage_catalog")?;
    catalog::delete_category(&state.db, &category_id)?;
    Ok(ok(Value::Null))
}

// -- Products ----------------------------------------------------------------

async fn list_products(
    State(state): State<AppState>,
    _session: Session,
    Query(query): Query<ProductListQuery>,
) -> ApiResult {
    Ok(ok(catalog::list_products(
        &state.db,
        query.category_id.as_deref(),
        query.include_inactive.unwrap_or(false),
    )?))
}

async fn create_product(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<ProductPayload>,
) -> ApiResult {
    require(&session, "manage_catalog")?;
    Ok(ok(catalog::create_product(&state.db, &payload)?))
}

async fn get_product(
    State(state): State<AppState>,
    _session: Session,
    Path(product_id): Path<String>,
) -> ApiResult {
    Ok(ok(catalog::get_product(&state.db, &product_id)?))
}

async fn update_product(
    State(state): State<AppState>,
    session: Session,
    Path(product_id): Path<String>,
    Json(payload): Json<ProductUpdatePayload>,
) -> ApiResult {
    require(&session, "manage_catalog")?;
    Ok(ok(catalog::update_product(&state.db, &product_id, &payload)?))
}

async fn delete_product(
    State(state): State<AppState>,
    session: Session,
    Path(product_id): Path<String>,
) -> ApiResult {
    require(&session, "manage_catalog")?;
    Ok(ok(catalog::delete_product(&state.db, &product_id)?))
}

// -- Variants ----------------------------------------------------------------

async fn create_variant(
    State(state): State<AppState>,
    session: Session,
    Path(product_id): Path<String>,
    Json(payload): Json<VariantPayload>,
) -> ApiResult {
    require(&session, "manage_catalog")?;
    Ok(ok(catalog::create_variant(&state.db, &product_id, &payload)?))
}

async fn update_variant(
    State(state): State<AppState>,
    session: Session,
    Path(variant_id): Path<String>,
    Json(payload): Json<VariantPayload>,
) -> ApiResult {
    require(&session, "manage_catalog")?;
    Ok(ok(catalog::update_variant(&state.db, &variant_id, &payload)?))
}

async fn delete_variant(
    State(state): State<AppState>,
    session: Session,
    Path(variant_id): Path<String>,
) -> ApiResult {
    require(&session, "manage_catalog")?;
    catalog::delete_variant(&state.db, &variant_id)?;
    Ok(ok(Value::Null))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/:id",
            axum::routing::put(update_category).delete(delete_category),
        )
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/products/:id/variants", post(create_variant))
        .route(
            "/variants/:id",
            axum::routing::put(update_variant).delete(delete_variant),
        )
}
