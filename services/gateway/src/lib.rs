//! Gateway: Order Intake and the process around the trading core
//!
//! Requests are validated here and queued on the matching worker that owns
//! their symbol. Everything after the queue (matching, settlement, depth)
//! runs asynchronously; callers only ever see intake-time rejections.

pub mod config;
pub mod error;
pub mod exchange;
pub mod handlers;
pub mod intake;
pub mod models;
pub mod partition;
pub mod router;
pub mod state;
pub mod worker;

pub use config::{Config, ConfigError};
pub use exchange::Exchange;
pub use intake::{IntakeError, OrderIntake, decode_command};
pub use router::create_router;
pub use state::AppState;
