//! Types library for the exchange trading core
//!
//! Shared type definitions used by intake, matching, settlement and market
//! data. Every quantity and price is an exact decimal; nothing in this crate
//! touches floating point.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, TradeId, OwnerId, Symbol)
//! - `numeric`: Fixed-point decimal types (Price, Quantity)
//! - `order`: Order lifecycle types
//! - `trade`: Trade execution types
//! - `errors`: Error taxonomy shared across services

pub mod ids;
pub mod numeric;
pub mod order;
pub mod trade;
pub mod errors;

/// Current wall-clock time as Unix nanoseconds.
pub fn now_nanos() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX)
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::trade::*;
    pub use crate::errors::*;
}
