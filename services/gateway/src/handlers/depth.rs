use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use market_data::{DepthSnapshot, SnapshotError};
use rust_decimal::Decimal;
use serde::Deserialize;
use types::ids::Symbol;

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub interval: Option<Decimal>,
}

pub async fn get_depth(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<DepthSnapshot>, AppError> {
    let symbol = Symbol::new(symbol);
    if !state.intake.is_listed(&symbol) {
        return Err(AppError::NotFound(format!("symbol {symbol}")));
    }

    let interval = query.interval.unwrap_or(state.depth_interval);
    match state.depth.snapshot(&symbol, interval) {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(err @ (SnapshotError::NonPositiveInterval(_) | SnapshotError::IntervalOutOfRange(_))) => {
            Err(AppError::BadRequest(err.to_string()))
        }
        Err(err) => Err(AppError::ServiceUnavailable(err.to_string())),
    }
}
