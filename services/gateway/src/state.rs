use market_data::DepthSnapshotBuilder;
use matching_engine::OrderbookIndex;
use persistence::Ledger;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::exchange::Exchange;
use crate::intake::OrderIntake;

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<OrderIntake>,
    pub index: Arc<dyn OrderbookIndex>,
    pub ledger: Arc<dyn Ledger>,
    pub depth: DepthSnapshotBuilder,
    /// Bucket width when a depth request does not name one
    pub depth_interval: Decimal,
}

impl AppState {
    pub fn new(exchange: &Exchange) -> Self {
        Self {
            intake: exchange.intake().clone(),
            index: exchange.index().clone(),
            ledger: exchange.ledger().clone(),
            depth: exchange.depth().clone(),
            depth_interval: exchange.config().depth_interval,
        }
    }
}
