//! Order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{
    AddressSnapshot, AgentId, CustomerId, DeliveryEvidence, DeliveryOutcome, GatewayOutcome, Money,
    Order, OrderError, OutcomeReason, PaymentMethod, RefundId, RefundRecord, RefundStatus,
    ReturnStatus,
};
use serde::{Deserialize, Serialize};
use service::{Catalog, LineItemRequest, OrderService, PlaceOrderRequest};
use store::{OrderRepository, RefundLedger, StockLedger};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<R, S, L, C>
where
    R: OrderRepository,
    S: StockLedger,
    L: RefundLedger,
    C: Catalog,
{
    pub service: Arc<OrderService<R, S, L, C>>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderBody {
    pub customer_id: uuid::Uuid,
    pub lines: Vec<LineItemBody>,
    pub address: AddressSnapshot,
    #[serde(default)]
    pub shipping_cents: i64,
    #[serde(default)]
    pub discount_cents: i64,
    pub payment_method: PaymentMethod,
}

#[derive(Deserialize)]
pub struct LineItemBody {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct GatewayCallbackBody {
    pub outcome: GatewayOutcome,
    pub gateway_ref: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyBankBody {
    pub slip_ref: String,
}

#[derive(Deserialize)]
pub struct DispatchBody {
    pub agent_id: Option<uuid::Uuid>,
}

#[derive(Deserialize)]
pub struct DeliveryOutcomeBody {
    pub outcome: DeliveryOutcome,
    #[serde(default)]
    pub reason: OutcomeReason,
}

#[derive(Deserialize)]
pub struct CancelBody {
    pub reason: Option<OutcomeReason>,
}

#[derive(Deserialize)]
pub struct InitReturnBody {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct UpdateReturnBody {
    pub status: ReturnStatus,
}

#[derive(Deserialize)]
pub struct IssueRefundBody {
    pub amount_cents: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateRefundBody {
    pub status: RefundStatus,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub order_state: String,
    pub delivery_state: String,
    pub payment_method: String,
    pub payment_status: String,
    pub gateway_ref: Option<String>,
    pub lines: Vec<LineResponse>,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub grand_total_cents: i64,
    pub stock_reserved: bool,
    pub assigned_agent: Option<String>,
    pub delivery_attempts: u32,
    pub return_status: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct LineResponse {
    pub product_id: String,
    pub slug: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub order_state: String,
    pub delivery_state: String,
    pub payment_status: String,
}

#[derive(Serialize)]
pub struct HistoryEntryResponse {
    pub status: String,
    pub at: String,
}

#[derive(Serialize)]
pub struct RefundResponse {
    pub id: String,
    pub order_id: String,
    pub method: String,
    pub status: String,
    pub amount_cents: i64,
    pub notes: Option<String>,
    pub processed_at: Option<String>,
    pub created_at: String,
}

fn order_response(order: &Order) -> OrderResponse {
    OrderResponse {
        id: order.id().to_string(),
        customer_id: order.customer_id().to_string(),
        status: order.status().as_str().to_string(),
        order_state: order.order_state().to_string(),
        delivery_state: order.delivery_state().to_string(),
        payment_method: order.payment().method.to_string(),
        payment_status: order.payment().status.to_string(),
        gateway_ref: order.payment().gateway_ref.clone(),
        lines: order
            .lines()
            .iter()
            .map(|line| LineResponse {
                product_id: line.product_id.to_string(),
                slug: line.slug.clone(),
                name: line.name.clone(),
                unit_price_cents: line.unit_price.cents(),
                quantity: line.quantity,
            })
            .collect(),
        subtotal_cents: order.totals().subtotal.cents(),
        shipping_cents: order.totals().shipping.cents(),
        discount_cents: order.totals().discount.cents(),
        grand_total_cents: order.totals().grand_total.cents(),
        stock_reserved: order.stock_reserved(),
        assigned_agent: order.assigned_agent().map(|a| a.to_string()),
        delivery_attempts: order.delivery_meta().attempts,
        return_status: order.return_request().map(|r| r.status.to_string()),
        version: order.version().as_i64(),
        created_at: order.created_at().to_rfc3339(),
        updated_at: order.updated_at().to_rfc3339(),
    }
}

fn refund_response(refund: &RefundRecord) -> RefundResponse {
    RefundResponse {
        id: refund.id.to_string(),
        order_id: refund.order_id.to_string(),
        method: refund.method.to_string(),
        status: refund.status.to_string(),
        amount_cents: refund.amount.cents(),
        notes: refund.notes.clone(),
        processed_at: refund.processed_at.as_ref().map(DateTime::<Utc>::to_rfc3339),
        created_at: refund.created_at.to_rfc3339(),
    }
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}

// -- Handlers --

/// POST /orders — place a new order.
#[tracing::instrument(skip(state, body))]
pub async fn place<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Json(body): Json<PlaceOrderBody>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let request = PlaceOrderRequest {
        customer_id: CustomerId::from_uuid(body.customer_id),
        lines: body
            .lines
            .into_iter()
            .map(|line| LineItemRequest {
                product_id: line.product_id.into(),
                quantity: line.quantity,
            })
            .collect(),
        address: body.address,
        shipping: Money::from_cents(body.shipping_cents),
        discount: Money::from_cents(body.discount_cents),
        payment_method: body.payment_method,
    };

    let order = state.service.place_order(request).await?;
    Ok((StatusCode::CREATED, Json(order_response(&order))))
}

/// GET /orders/:id — load an order by ID.
#[tracing::instrument(skip(state))]
pub async fn get<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state.service.get_order(parse_order_id(&id)?).await?;
    Ok(Json(order_response(&order)))
}

/// GET /orders/:id/status — the projected status and the three axes.
#[tracing::instrument(skip(state))]
pub async fn status<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state.service.get_order(parse_order_id(&id)?).await?;
    Ok(Json(StatusResponse {
        status: order.status().as_str().to_string(),
        order_state: order.order_state().to_string(),
        delivery_state: order.delivery_state().to_string(),
        payment_status: order.payment().status.to_string(),
    }))
}

/// GET /orders/:id/history — recent status history, oldest first.
#[tracing::instrument(skip(state))]
pub async fn history<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryEntryResponse>>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let limit = params.limit.unwrap_or(20);
    let entries = state
        .service
        .order_history(parse_order_id(&id)?, limit)
        .await?;
    Ok(Json(
        entries
            .iter()
            .map(|entry| HistoryEntryResponse {
                status: entry.status.as_str().to_string(),
                at: entry.at.to_rfc3339(),
            })
            .collect(),
    ))
}

/// GET /customers/:id/orders — all orders for a customer, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_customer<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid customer ID: {e}")))?;
    let orders = state
        .service
        .orders_for_customer(CustomerId::from_uuid(uuid))
        .await?;
    Ok(Json(orders.iter().map(order_response).collect()))
}

/// DELETE /orders/:id — administrative delete, pre-dispatch only.
#[tracing::instrument(skip(state))]
pub async fn delete<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    state.service.delete_order(parse_order_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /orders/:id/payment/callback — payment gateway webhook.
#[tracing::instrument(skip(state, body))]
pub async fn payment_callback<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<GatewayCallbackBody>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state
        .service
        .apply_gateway_callback(parse_order_id(&id)?, body.outcome, body.gateway_ref)
        .await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/payment/verify-bank — mark a bank slip verified.
#[tracing::instrument(skip(state, body))]
pub async fn verify_bank<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<VerifyBankBody>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state
        .service
        .verify_bank_slip(parse_order_id(&id)?, body.slip_ref)
        .await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/pack — start packing.
#[tracing::instrument(skip(state))]
pub async fn pack<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state.service.pack_order(parse_order_id(&id)?).await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/dispatch — hand to a delivery agent.
#[tracing::instrument(skip(state, body))]
pub async fn dispatch<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<DispatchBody>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let agent = body
        .agent_id
        .map(AgentId::from_uuid)
        .ok_or(ApiError::Service(OrderError::AgentRequired.into()))?;
    let order = state
        .service
        .dispatch_order(parse_order_id(&id)?, agent)
        .await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/out-for-delivery — agent starts the delivery run.
#[tracing::instrument(skip(state))]
pub async fn out_for_delivery<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state.service.start_delivery_run(parse_order_id(&id)?).await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/deliver — close the delivery with evidence.
#[tracing::instrument(skip(state, body))]
pub async fn deliver<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<DeliveryEvidence>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state
        .service
        .deliver_order(parse_order_id(&id)?, body)
        .await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/delivery-outcome — record a failed attempt.
#[tracing::instrument(skip(state, body))]
pub async fn delivery_outcome<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<DeliveryOutcomeBody>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state
        .service
        .record_delivery_outcome(parse_order_id(&id)?, body.outcome, body.reason)
        .await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/redispatch — retry delivery after a failed attempt.
#[tracing::instrument(skip(state, body))]
pub async fn redispatch<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<DispatchBody>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state
        .service
        .redispatch_order(parse_order_id(&id)?, body.agent_id.map(AgentId::from_uuid))
        .await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/cancel — cancel pre-dispatch.
#[tracing::instrument(skip(state, body))]
pub async fn cancel<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state
        .service
        .cancel_order(parse_order_id(&id)?, body.reason)
        .await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/returns — open a return request.
#[tracing::instrument(skip(state, body))]
pub async fn init_return<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<InitReturnBody>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state
        .service
        .init_return(parse_order_id(&id)?, body.reason)
        .await?;
    Ok((StatusCode::CREATED, Json(order_response(&order))))
}

/// PATCH /orders/:id/returns — advance the return request.
#[tracing::instrument(skip(state, body))]
pub async fn update_return<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateReturnBody>,
) -> Result<Json<OrderResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let order = state
        .service
        .update_return(parse_order_id(&id)?, body.status)
        .await?;
    Ok(Json(order_response(&order)))
}

/// POST /orders/:id/refunds — open a refund record.
#[tracing::instrument(skip(state, body))]
pub async fn issue_refund<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<IssueRefundBody>,
) -> Result<(StatusCode, Json<RefundResponse>), ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let refund = state
        .service
        .issue_refund(
            parse_order_id(&id)?,
            body.amount_cents.map(Money::from_cents),
            body.notes,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(refund_response(&refund))))
}

/// GET /orders/:id/refunds — list refund records for an order.
#[tracing::instrument(skip(state))]
pub async fn list_refunds<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<RefundResponse>>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let refunds = state
        .service
        .refunds_for_order(parse_order_id(&id)?)
        .await?;
    Ok(Json(refunds.iter().map(refund_response).collect()))
}

/// PATCH /refunds/:id — advance a refund record.
#[tracing::instrument(skip(state, body))]
pub async fn update_refund<R, S, L, C>(
    State(state): State<Arc<AppState<R, S, L, C>>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateRefundBody>,
) -> Result<Json<RefundResponse>, ApiError>
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid refund ID: {e}")))?;
    let refund = state
        .service
        .update_refund(RefundId::from_uuid(uuid), body.status)
        .await?;
    Ok(Json(refund_response(&refund)))
}
