//! Error types shared across the trading core
//!
//! Only the errors that cross crate boundaries live here. Index, ledger and
//! settlement failures are defined next to the code that raises them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a request was refused at intake (RejectedRequest).
///
/// Returned synchronously to the caller; a rejected request never reaches
/// a matching worker.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    #[error("limit order requires a price")]
    MissingPrice,

    #[error("market order must not carry a price")]
    UnexpectedPrice,

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("order is owned by another account")]
    NotOwner,

    #[error("new quantity {requested} must exceed filled quantity {filled}")]
    QuantityBelowFilled { requested: String, filled: String },

    #[error("order type {0} cannot be modified")]
    NotModifiable(String),

    #[error("order symbol does not match request symbol")]
    SymbolMismatch,
}

/// Fixed-point validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("value must be positive: {0}")]
    NonPositive(String),

    #[error("value must not be negative: {0}")]
    Negative(String),

    #[error("value {value} has more than {max} fractional digits")]
    ScaleTooLarge { value: String, max: u32 },

    #[error("value {value} has more than {max_digits} integer digits")]
    TooLarge { value: String, max_digits: u32 },

    #[error("not a decimal number: {0}")]
    Unparsable(String),
}

/// Order state-machine violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("fill of {fill} exceeds unfilled quantity {unfilled} on order {order_id}")]
    Overfill {
        order_id: String,
        fill: String,
        unfilled: String,
    },

    #[error("order {order_id} already in terminal state {status}")]
    AlreadyTerminal { order_id: String, status: String },

    #[error("zero-quantity fill on order {0}")]
    EmptyFill(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(
            RejectReason::MissingPrice.to_string(),
            "limit order requires a price"
        );
        assert!(RejectReason::UnknownSymbol("DOGEUSDT".into())
            .to_string()
            .contains("DOGEUSDT"));
    }

    #[test]
    fn test_reject_reason_wire_name() {
        let json = serde_json::to_string(&RejectReason::UnexpectedPrice).unwrap();
        assert_eq!(json, "\"UNEXPECTED_PRICE\"");
    }

    #[test]
    fn test_order_error_overfill_display() {
        let err = OrderError::Overfill {
            order_id: "o-1".into(),
            fill: "1.5".into(),
            unfilled: "1.0".into(),
        };
        assert!(err.to_string().contains("1.5"));
    }
}
