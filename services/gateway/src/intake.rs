//! Order Intake
//!
//! Validates new, modify and cancel requests and queues them on the worker
//! that owns the symbol. Validation is stateless and runs on the caller's
//! task; only the enqueue step is ordered. A rejected request never reaches
//! a worker.

use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use types::errors::RejectReason;
use types::ids::{OrderId, Symbol};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderType};

use matching_engine::EngineCommand;
use persistence::SettlementBacklog;

use crate::models::{CancelOrderRequest, IntakeMessage, ModifyOrderRequest, NewOrderRequest};
use crate::partition::PartitionRouter;
use crate::worker::WorkItem;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntakeError {
    #[error("request rejected: {0}")]
    Rejected(#[from] RejectReason),

    /// Too many unsettled trades for the symbol
    #[error("settlement backlog full for {0}")]
    Backlogged(Symbol),

    #[error("matching worker for {0} is not running")]
    Unavailable(Symbol),
}

/// Upstream payload that could not be decoded (MalformedEvent).
#[derive(Debug, Error)]
#[error("malformed intake message: {0}")]
pub struct MalformedEvent(#[from] serde_json::Error);

/// Decode one upstream JSON message.
pub fn decode_command(payload: &[u8]) -> Result<IntakeMessage, MalformedEvent> {
    Ok(serde_json::from_slice(payload)?)
}

pub struct OrderIntake {
    symbols: HashSet<Symbol>,
    router: PartitionRouter,
    backlog: Arc<SettlementBacklog>,
}

impl OrderIntake {
    pub fn new(
        symbols: impl IntoIterator<Item = Symbol>,
        router: PartitionRouter,
        backlog: Arc<SettlementBacklog>,
    ) -> Self {
        Self {
            symbols: symbols.into_iter().collect(),
            router,
            backlog,
        }
    }

    pub fn is_listed(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }

    /// Validate a new order and queue it. Returns the assigned id.
    pub async fn admit(&self, request: NewOrderRequest) -> Result<OrderId, IntakeError> {
        let order = self.validate_new(request)?;
        self.ensure_capacity(&order.symbol)?;

        let order_id = order.order_id;
        debug!(
            order_id = %order_id,
            symbol = %order.symbol,
            side = %order.side,
            order_type = order.order_type.as_str(),
            "order admitted"
        );
        self.route(EngineCommand::Submit(order)).await?;
        Ok(order_id)
    }

    pub async fn modify(
        &self,
        order_id: OrderId,
        request: ModifyOrderRequest,
    ) -> Result<OrderId, IntakeError> {
        let symbol = self.listed_symbol(&request.symbol)?;
        let price = Price::new(request.price)
            .map_err(|err| RejectReason::InvalidPrice(err.to_string()))?;
        let quantity = valid_quantity(request.quantity)?;
        self.ensure_capacity(&symbol)?;

        self.route(EngineCommand::Modify {
            order_id,
            owner_id: request.owner_id,
            symbol,
            price,
            quantity,
        })
        .await?;
        Ok(order_id)
    }

    /// Cancels are accepted even while the symbol is backlogged; removing
    /// liquidity never creates trades.
    pub async fn cancel(
        &self,
        order_id: OrderId,
        request: CancelOrderRequest,
    ) -> Result<OrderId, IntakeError> {
        let symbol = self.listed_symbol(&request.symbol)?;
        self.route(EngineCommand::Cancel {
            order_id,
            owner_id: request.owner_id,
            symbol,
        })
        .await?;
        Ok(order_id)
    }

    /// Feed one upstream message through intake. Malformed payloads are
    /// logged and dropped, rejections are logged.
    pub async fn ingest(&self, payload: &[u8]) -> Option<OrderId> {
        let message = match decode_command(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, bytes = payload.len(), "dropping malformed intake message");
                return None;
            }
        };

        let result = match message {
            IntakeMessage::New(request) => self.admit(request).await,
            IntakeMessage::Modify {
                order_id,
                owner_id,
                symbol,
                price,
                quantity,
            } => {
                let request = ModifyOrderRequest {
                    owner_id,
                    symbol,
                    price,
                    quantity,
                };
                self.modify(order_id, request).await
            }
            IntakeMessage::Cancel {
                order_id,
                owner_id,
                symbol,
            } => self.cancel(order_id, CancelOrderRequest { owner_id, symbol }).await,
        };

        match result {
            Ok(order_id) => Some(order_id),
            Err(err) => {
                info!(error = %err, "intake message refused");
                None
            }
        }
    }

    /// Turn a request into a PENDING order, or say why it cannot be one.
    pub fn validate_new(&self, request: NewOrderRequest) -> Result<Order, RejectReason> {
        let symbol = self.listed_symbol(&request.symbol)?;
        let quantity = valid_quantity(request.quantity)?;

        let price = match (request.order_type, request.price) {
            (OrderType::Market, Some(_)) => return Err(RejectReason::UnexpectedPrice),
            (OrderType::Market, None) => None,
            (_, None) => return Err(RejectReason::MissingPrice),
            (_, Some(price)) => Some(
                Price::new(price).map_err(|err| RejectReason::InvalidPrice(err.to_string()))?,
            ),
        };

        Ok(Order::new(
            request.owner_id,
            symbol,
            request.side,
            request.order_type,
            price,
            quantity,
            types::now_nanos(),
        ))
    }

    fn listed_symbol(&self, raw: &str) -> Result<Symbol, RejectReason> {
        let symbol = Symbol::new(raw);
        if symbol.is_well_formed() && self.is_listed(&symbol) {
            Ok(symbol)
        } else {
            Err(RejectReason::UnknownSymbol(raw.to_string()))
        }
    }

    fn ensure_capacity(&self, symbol: &Symbol) -> Result<(), IntakeError> {
        if self.backlog.is_saturated(symbol) {
            warn!(
                symbol = %symbol,
                pending = self.backlog.pending(symbol),
                limit = self.backlog.limit(),
                "settlement backlog full, refusing order"
            );
            return Err(IntakeError::Backlogged(symbol.clone()));
        }
        Ok(())
    }

    async fn route(&self, command: EngineCommand) -> Result<(), IntakeError> {
        self.router
            .route(WorkItem::new(command))
            .await
            .map(|_| ())
            .map_err(|item| IntakeError::Unavailable(item.command.symbol().clone()))
    }
}

fn valid_quantity(value: Decimal) -> Result<Quantity, RejectReason> {
    Quantity::positive(value).map_err(|err| RejectReason::InvalidQuantity(err.to_string()))
}
