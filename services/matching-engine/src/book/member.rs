//! Sorted-set member encoding
//!
//! Each index entry stores `"{order_id}:{unfilled}:{modified_at}"` next to
//! its score, so a scan of one side yields the remaining quantity without a
//! trip to the record store.

use std::fmt;
use std::str::FromStr;
use types::ids::OrderId;
use types::numeric::Quantity;
use types::order::Order;

use super::index::IndexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub order_id: OrderId,
    pub unfilled: Quantity,
    pub modified_at: i64,
}

impl Member {
    pub fn of(order: &Order) -> Self {
        Self {
            order_id: order.order_id,
            unfilled: order.unfilled_quantity,
            modified_at: order.modified_at,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn decode(raw: &str) -> Result<Self, IndexError> {
        let corrupt = || IndexError::Corrupt(format!("bad index member {raw:?}"));

        let mut parts = raw.split(':');
        let (Some(id), Some(unfilled), Some(modified_at), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(corrupt());
        };

        Ok(Self {
            order_id: id.parse().map_err(|_| corrupt())?,
            unfilled: Quantity::from_str(unfilled).map_err(|_| corrupt())?,
            modified_at: modified_at.parse().map_err(|_| corrupt())?,
        })
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.order_id, self.unfilled, self.modified_at)
    }
}

impl FromStr for Member {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
