//! Event structures for matching engine
//!
//! Defines what the engine hands to settlement and back to its caller.

use serde::{Deserialize, Serialize};
use types::errors::RejectReason;
use types::ids::{OrderId, OwnerId, Symbol};
use types::numeric::{Price, Quantity};
use types::order::Order;
use types::trade::Trade;

use crate::matching::MatchStep;

/// One executed match: both updated orders and the trade between them.
///
/// This is the unit settlement persists and republishes downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub buy_order: Order,
    pub sell_order: Order,
    pub trade: Trade,
}

impl From<MatchStep> for Fill {
    fn from(step: MatchStep) -> Self {
        Self {
            buy_order: step.buy,
            sell_order: step.sell,
            trade: step.trade,
        }
    }
}

impl Fill {
    /// Updated state of `order_id` if it took part in this fill.
    pub fn order(&self, order_id: OrderId) -> Option<&Order> {
        if self.buy_order.order_id == order_id {
            Some(&self.buy_order)
        } else if self.sell_order.order_id == order_id {
            Some(&self.sell_order)
        } else {
            None
        }
    }
}

/// Mutation routed to the single writer of a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineCommand {
    Submit(Order),
    Modify {
        order_id: OrderId,
        owner_id: OwnerId,
        symbol: Symbol,
        price: Price,
        quantity: Quantity,
    },
    Cancel {
        order_id: OrderId,
        owner_id: OwnerId,
        symbol: Symbol,
    },
}

impl EngineCommand {
    pub fn symbol(&self) -> &Symbol {
        match self {
            EngineCommand::Submit(order) => &order.symbol,
            EngineCommand::Modify { symbol, .. } | EngineCommand::Cancel { symbol, .. } => symbol,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            EngineCommand::Submit(order) => order.order_id,
            EngineCommand::Modify { order_id, .. } | EngineCommand::Cancel { order_id, .. } => {
                *order_id
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineCommand::Submit(_) => "submit",
            EngineCommand::Modify { .. } => "modify",
            EngineCommand::Cancel { .. } => "cancel",
        }
    }
}

/// What happened to a command. Carries the order's state after matching.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// New order processed: resting, filled, or (market) remainder cancelled
    Accepted(Order),
    Modified(Order),
    Cancelled(Order),
    /// Target order is not resting (filled, cancelled or never seen)
    NotFound,
    /// Order id already reached a terminal state; nothing was done
    Duplicate,
    Rejected(RejectReason),
}

impl CommandOutcome {
    /// Order whose state changed, if any.
    pub fn order(&self) -> Option<&Order> {
        match self {
            CommandOutcome::Accepted(order)
            | CommandOutcome::Modified(order)
            | CommandOutcome::Cancelled(order) => Some(order),
            _ => None,
        }
    }
}
