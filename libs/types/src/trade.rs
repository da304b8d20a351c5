//! Trade execution types
//!
//! A trade is immutable once the matching engine creates it. The execution
//! price is always the maker's (resting) limit price.

use crate::ids::{OrderId, Symbol, TradeId};
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Liquidity role of an order within a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Resting order that provided liquidity
    Maker,
    /// Incoming order that caused the cross
    Taker,
}

/// Complete trade structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub symbol: Symbol,

    // Order references
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub taker_order_id: OrderId,

    pub price: Price,
    pub quantity: Quantity,
    pub trade_time: i64, // Unix nanos
}

impl Trade {
    pub fn new(
        symbol: Symbol,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        taker_order_id: OrderId,
        price: Price,
        quantity: Quantity,
        trade_time: i64,
    ) -> Self {
        debug_assert!(taker_order_id == buy_order_id || taker_order_id == sell_order_id);
        Self {
            trade_id: TradeId::new(),
            symbol,
            buy_order_id,
            sell_order_id,
            taker_order_id,
            price,
            quantity,
            trade_time,
        }
    }

    /// The order on the other side of the taker.
    pub fn maker_order_id(&self) -> OrderId {
        if self.taker_order_id == self.buy_order_id {
            self.sell_order_id
        } else {
            self.buy_order_id
        }
    }

    /// Role of `order_id` in this trade, or `None` if it did not take part.
    pub fn role_of(&self, order_id: OrderId) -> Option<Role> {
        if order_id == self.taker_order_id {
            Some(Role::Taker)
        } else if order_id == self.buy_order_id || order_id == self.sell_order_id {
            Some(Role::Maker)
        } else {
            None
        }
    }

    pub fn involves(&self, order_id: OrderId) -> bool {
        order_id == self.buy_order_id || order_id == self.sell_order_id
    }

    /// Calculate trade value (price × quantity)
    pub fn notional(&self) -> Decimal {
        self.quantity.as_decimal() * self.price.as_decimal()
    }
}
