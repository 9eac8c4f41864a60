//! Stock ledger endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::ProductId;
use serde::{Deserialize, Serialize};
use service::Catalog;
use store::{OrderRepository, RefundLedger, StockLedger};

use crate::error::ApiError;
use crate::routes::orders::AppState;

#[derive(Deserialize)]
pub struct SetStockBody {
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub available: u32,
}

/// PUT /stock/:product_id — set the available quantity.
#[tracing::instrument(skip(state, body))]
pub async fn set<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(product_id): Path<String>,
    Json(body): Json<SetStockBody>,
) -> Result<Json<StockResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let product_id = ProductId::new(product_id);
    state.service.set_stock(&product_id, body.quantity).await?;
    Ok(Json(StockResponse {
        product_id: product_id.to_string(),
        available: body.quantity,
    }))
}

/// GET /stock/:product_id — current available quantity.
#[tracing::instrument(skip(state))]
pub async fn get<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(product_id): Path<String>,
) -> Result<Json<StockResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let product_id = ProductId::new(product_id);
    let available = state.service.stock_level(&product_id).await?;
    Ok(Json(StockResponse {
        product_id: product_id.to_string(),
        available,
    }))
}
