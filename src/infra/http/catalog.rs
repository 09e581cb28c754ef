//! Catalog API wired through the cache layer.

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::cache::{
    InvalidationPolicy, ReadThroughPolicy, invalidation_layer, read_through_layer,
};
use crate::domain::catalog::{CartItem, ListQuery, ProductInput};
use crate::identity::CallerIdentity;

use super::AppState;
use super::error::ApiError;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListParams {
    category: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

pub(super) fn build_catalog_router(state: &AppState) -> Router<AppState> {
    let cache = &state.cache;
    let products_read = cache.read_through(ReadThroughPolicy::new("products"));
    let products_write = cache.invalidation(InvalidationPolicy::new(["products:*"]));
    let cart_read = cache.read_through(ReadThroughPolicy::new("cart").user_scoped());
    let cart_write = cache.invalidation(InvalidationPolicy::new(["cart:*"]));

    let products = get(list_products)
        .layer(from_fn_with_state(products_read.clone(), read_through_layer))
        .merge(
            post(create_product).layer(from_fn_with_state(
                products_write.clone(),
                invalidation_layer,
            )),
        );
    let product = get(get_product)
        .layer(from_fn_with_state(products_read, read_through_layer))
        .merge(
            put(update_product)
                .delete(delete_product)
                .layer(from_fn_with_state(products_write, invalidation_layer)),
        );
    let cart = get(get_cart)
        .layer(from_fn_with_state(cart_read, read_through_layer))
        .merge(post(add_to_cart).layer(from_fn_with_state(cart_write, invalidation_layer)));

    Router::new()
        .route("/products", products)
        .route("/products/{id}", product)
        .route("/me/cart", cart)
}

async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let products = state.catalog.list(ListQuery {
        category: params.category.as_deref(),
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
    });
    Json(products).into_response()
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let product = state.catalog.get(id)?;
    Ok(Json(product).into_response())
}

async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<ProductInput>,
) -> Result<Response, ApiError> {
    let product = state.catalog.create(input)?;
    Ok((StatusCode::CREATED, Json(product)).into_response())
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ProductInput>,
) -> Result<Response, ApiError> {
    let product = state.catalog.update(id, input)?;
    Ok(Json(product).into_response())
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state.catalog.delete(id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn get_cart(
    State(state): State<AppState>,
    caller: Option<Extension<CallerIdentity>>,
) -> Result<Response, ApiError> {
    let Extension(caller) = caller.ok_or_else(ApiError::unauthorized)?;
    Ok(Json(state.catalog.cart(&caller.id)).into_response())
}

async fn add_to_cart(
    State(state): State<AppState>,
    caller: Option<Extension<CallerIdentity>>,
    Json(item): Json<CartItem>,
) -> Result<Response, ApiError> {
    let Extension(caller) = caller.ok_or_else(ApiError::unauthorized)?;
    let cart = state.catalog.add_to_cart(&caller.id, item)?;
    Ok(Json(cart).into_response())
}
