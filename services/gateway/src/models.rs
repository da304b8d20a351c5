//! Wire shapes for intake requests and their responses.
//!
//! Prices and quantities arrive as plain decimals so that range and scale
//! problems come back as a [`RejectReason`](types::errors::RejectReason)
//! rather than a deserialization failure.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{OrderId, OwnerId};
use types::order::{OrderStatus, OrderType, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderRequest {
    pub owner_id: OwnerId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyOrderRequest {
    pub owner_id: OwnerId,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub owner_id: OwnerId,
    pub symbol: String,
}

/// Message from an upstream producer feeding intake directly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IntakeMessage {
    New(NewOrderRequest),
    Modify {
        order_id: OrderId,
        owner_id: OwnerId,
        symbol: String,
        price: Decimal,
        quantity: Decimal,
    },
    Cancel {
        order_id: OrderId,
        owner_id: OwnerId,
        symbol: String,
    },
}

/// Acknowledgement that a request was queued for matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
}
