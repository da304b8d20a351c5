//! Market Data Service
//!
//! Derives a leveled, bucketed view of the live book for external
//! consumers. Never mutates matching state.
//!
//! # Architecture
//!
//! ```text
//!  Orderbook Index ──read──► DepthSnapshotBuilder
//!                                   │
//!             timer / DepthTrigger  │
//!                          ┌────────▼────────┐
//!                          │ DepthPublisher  │──► broadcast<DepthSnapshot>
//!                          └─────────────────┘
//! ```

pub mod snapshot;
pub mod publisher;

pub use publisher::{DepthPublisher, DepthPublisherConfig, DepthTrigger};
pub use snapshot::{DepthLevel, DepthSnapshot, DepthSnapshotBuilder, SnapshotError};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
