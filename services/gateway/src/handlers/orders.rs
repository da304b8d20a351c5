use crate::error::AppError;
use crate::models::{CancelOrderRequest, ModifyOrderRequest, NewOrderRequest, OrderResponse};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use types::ids::OrderId;
use types::order::{Order, OrderStatus};

pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<NewOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let order_id = state.intake.admit(payload).await?;

    // matching happens asynchronously; the order starts out PENDING
    Ok((
        StatusCode::ACCEPTED,
        Json(OrderResponse {
            order_id,
            status: OrderStatus::Pending,
        }),
    ))
}

pub async fn modify_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Json(payload): Json<ModifyOrderRequest>,
) -> Result<StatusCode, AppError> {
    state.intake.modify(order_id, payload).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<StatusCode, AppError> {
    state.intake.cancel(order_id, payload).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Ledger row if settled, otherwise the live book record.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    let stored = state
        .ledger
        .find_order_by_id(order_id)
        .await
        .map_err(|e| AppError::ServiceUnavailable(format!("Ledger error: {}", e)))?;
    if let Some(order) = stored {
        return Ok(Json(order));
    }

    let resting = state
        .index
        .get(order_id)
        .map_err(|e| AppError::ServiceUnavailable(format!("Orderbook index error: {}", e)))?;
    resting
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))
}
