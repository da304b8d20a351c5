//! Matching Engine Service
//!
//! Price-time priority matching over a sorted orderbook index.
//!
//! **Key Invariants:**
//! - All writes for one symbol come from one engine instance
//! - The book never stays crossed once a command has been processed
//! - `filled + unfilled == quantity` for every order, exactly
//! - Execution price is always the maker's limit price

pub mod book;
pub mod matching;
pub mod engine;
pub mod events;

pub use book::{IndexError, MemoryIndex, OrderbookIndex};
pub use engine::{EngineError, MatchingEngine};
pub use events::{CommandOutcome, EngineCommand, Fill};
