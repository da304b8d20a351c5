//! Order book infrastructure module
//!
//! Contains the priority score, the member encoding and the index that
//! holds the live book.

pub mod score;
pub mod member;
pub mod index;

pub use score::{PriorityClock, PriorityScore, SCORE_PRECISION};
pub use member::Member;
pub use index::{IndexError, IndexOp, MemoryIndex, OrderbookIndex, RestingOrder};
