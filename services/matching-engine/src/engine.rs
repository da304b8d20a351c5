//! Matching engine core
//!
//! Main coordinator for the orderbook index and matching logic. One engine
//! instance is the single writer for every symbol routed to its worker.
//!
//! Every match step is committed to the index as one batch. A failed index
//! call aborts the command; steps committed before the failure have already
//! been pushed to the caller's fill sink and must still be settled.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use types::errors::{OrderError, RejectReason};
use types::ids::{OrderId, OwnerId, Symbol};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderStatus, OrderType, Side};

use crate::book::{IndexError, IndexOp, OrderbookIndex, PriorityClock, RestingOrder};
use crate::events::{CommandOutcome, EngineCommand, Fill};
use crate::matching::{crossing, executor, MatchError};

/// Engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl EngineError {
    /// Whether running the same command again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Index(err) if !matches!(err, IndexError::ScoreOverflow(_) | IndexError::Unpriced(_))
        )
    }
}

/// Terminal ids remembered per worker before the oldest are forgotten.
pub const DEFAULT_FINALIZED_CAPACITY: usize = 100_000;

/// Terminal statuses of recently finalized orders, oldest evicted first.
///
/// An evicted id is no longer in the index either, so a late command for
/// it still finds nothing to act on.
#[derive(Debug)]
struct FinalizedOrders {
    statuses: HashMap<OrderId, OrderStatus>,
    order: VecDeque<OrderId>,
    capacity: usize,
}

impl FinalizedOrders {
    fn new(capacity: usize) -> Self {
        Self {
            statuses: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, order_id: OrderId, status: OrderStatus) {
        if self.statuses.insert(order_id, status).is_none() {
            self.order.push_back(order_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }

    fn get(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.statuses.get(order_id).copied()
    }

    fn contains_key(&self, order_id: &OrderId) -> bool {
        self.statuses.contains_key(order_id)
    }

    fn len(&self) -> usize {
        self.statuses.len()
    }
}

/// Main matching engine
pub struct MatchingEngine {
    index: Arc<dyn OrderbookIndex>,
    clock: PriorityClock,
    /// Ids that reached FILLED or CANCELLED on this worker
    finalized: FinalizedOrders,
    /// Market orders whose sweep was interrupted by an index failure
    in_flight: HashMap<OrderId, Order>,
}

impl MatchingEngine {
    pub fn new(index: Arc<dyn OrderbookIndex>) -> Self {
        Self::with_finalized_capacity(index, DEFAULT_FINALIZED_CAPACITY)
    }

    /// Engine remembering at most `capacity` terminal order ids.
    pub fn with_finalized_capacity(index: Arc<dyn OrderbookIndex>, capacity: usize) -> Self {
        Self {
            index,
            clock: PriorityClock::new(),
            finalized: FinalizedOrders::new(capacity),
            in_flight: HashMap::new(),
        }
    }

    pub fn index(&self) -> &Arc<dyn OrderbookIndex> {
        &self.index
    }

    /// Terminal status recorded for `order_id`, if any.
    pub fn finalized_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.finalized.get(&order_id)
    }

    /// Number of terminal ids currently remembered.
    pub fn finalized_len(&self) -> usize {
        self.finalized.len()
    }

    /// Apply one command and match until the symbol's book no longer crosses.
    ///
    /// Executed matches are appended to `fills` as soon as they are committed.
    pub fn execute(
        &mut self,
        command: EngineCommand,
        fills: &mut Vec<Fill>,
    ) -> Result<CommandOutcome, EngineError> {
        match command {
            EngineCommand::Submit(order) => self.submit(order, fills),
            EngineCommand::Modify {
                order_id,
                owner_id,
                symbol,
                price,
                quantity,
            } => self.modify(order_id, &owner_id, &symbol, price, quantity, fills),
            EngineCommand::Cancel {
                order_id,
                owner_id,
                symbol,
            } => self.cancel(order_id, &owner_id, &symbol),
        }
    }

    fn submit(&mut self, order: Order, fills: &mut Vec<Fill>) -> Result<CommandOutcome, EngineError> {
        if self.finalized.contains_key(&order.order_id) || order.is_terminal() {
            debug!(order_id = %order.order_id, "order already terminal, skipping");
            return Ok(CommandOutcome::Duplicate);
        }
        if order.order_type == OrderType::Market {
            return self.sweep(order, fills);
        }
        if order.price.is_none() {
            return Ok(CommandOutcome::Rejected(RejectReason::MissingPrice));
        }

        let order_id = order.order_id;
        let symbol = order.symbol.clone();

        if self.index.get(order_id)?.is_none() {
            let mut order = order;
            order.modified_at = self.clock.tick();
            self.index.commit(vec![IndexOp::Upsert(order.clone())])?;
            debug!(
                order_id = %order_id,
                symbol = %symbol,
                side = %order.side,
                price = ?order.price,
                quantity = %order.quantity,
                "order rested"
            );
        } else {
            debug!(order_id = %order_id, "order already resting, resuming match");
        }

        let mark = fills.len();
        self.drain(&symbol, order_id, fills)?;
        let order = self.current_state(order_id, &fills[mark..])?;
        Ok(CommandOutcome::Accepted(order))
    }

    /// Market orders never rest: take liquidity until filled or the
    /// opposing side is empty, then cancel whatever is left.
    fn sweep(&mut self, order: Order, fills: &mut Vec<Fill>) -> Result<CommandOutcome, EngineError> {
        let order_id = order.order_id;
        let mut order = self.in_flight.remove(&order_id).unwrap_or(order);

        while !order.is_filled() {
            let step = match self.take_best(&order) {
                Ok(Some(step)) => step,
                Ok(None) => break,
                Err(err) => {
                    self.in_flight.insert(order_id, order);
                    return Err(err);
                }
            };
            let (taker, maker) = match order.side {
                Side::BUY => (step.buy.clone(), &step.sell),
                Side::SELL => (step.sell.clone(), &step.buy),
            };
            if let Err(err) = self.index.commit(vec![executor::rest_or_remove(maker)]) {
                self.in_flight.insert(order_id, order);
                return Err(err.into());
            }
            if maker.is_filled() {
                self.finalized.insert(maker.order_id, OrderStatus::Filled);
            }
            order = taker;
            fills.push(step.into());
        }

        if !order.is_filled() {
            order.cancel(self.clock.tick())?;
            info!(
                order_id = %order_id,
                symbol = %order.symbol,
                unfilled = %order.unfilled_quantity,
                "market order remainder cancelled"
            );
        }
        self.finalized.insert(order_id, order.status);
        Ok(CommandOutcome::Accepted(order))
    }

    /// Match a market taker against the best opposing entry.
    fn take_best(&mut self, taker: &Order) -> Result<Option<executor::MatchStep>, EngineError> {
        let Some(best) = self.index.best(&taker.symbol, taker.side.opposite())? else {
            return Ok(None);
        };
        if !crossing::taker_accepts(taker, best.price) {
            return Ok(None);
        }
        let maker = self.load(&best)?;
        let now = self.clock.tick();
        let step = match taker.side {
            Side::BUY => executor::execute(taker, &maker, Some(taker.order_id), now)?,
            Side::SELL => executor::execute(&maker, taker, Some(taker.order_id), now)?,
        };
        Ok(Some(step))
    }

    fn modify(
        &mut self,
        order_id: OrderId,
        owner_id: &OwnerId,
        symbol: &Symbol,
        price: Price,
        quantity: Quantity,
        fills: &mut Vec<Fill>,
    ) -> Result<CommandOutcome, EngineError> {
        let Some(mut order) = self.resting(order_id)? else {
            return Ok(CommandOutcome::NotFound);
        };
        if &order.owner_id != owner_id {
            return Ok(CommandOutcome::Rejected(RejectReason::NotOwner));
        }
        if &order.symbol != symbol {
            return Ok(CommandOutcome::Rejected(RejectReason::SymbolMismatch));
        }
        if let Err(reason) = order.amend(price, quantity, self.clock.tick()) {
            return Ok(CommandOutcome::Rejected(reason));
        }

        // re-score from scratch: drop the old entry, insert the amended one
        self.index
            .commit(vec![IndexOp::Remove(order_id), IndexOp::Upsert(order.clone())])?;
        debug!(order_id = %order_id, price = %price, quantity = %quantity, "order modified");

        let mark = fills.len();
        self.drain(symbol, order_id, fills)?;
        let order = self.current_state(order_id, &fills[mark..])?;
        Ok(CommandOutcome::Modified(order))
    }

    fn cancel(
        &mut self,
        order_id: OrderId,
        owner_id: &OwnerId,
        symbol: &Symbol,
    ) -> Result<CommandOutcome, EngineError> {
        let Some(mut order) = self.resting(order_id)? else {
            debug!(order_id = %order_id, "cancel for order not in book");
            return Ok(CommandOutcome::NotFound);
        };
        if &order.owner_id != owner_id {
            return Ok(CommandOutcome::Rejected(RejectReason::NotOwner));
        }
        if &order.symbol != symbol {
            return Ok(CommandOutcome::Rejected(RejectReason::SymbolMismatch));
        }

        order.cancel(self.clock.tick())?;
        self.index.commit(vec![IndexOp::Remove(order_id)])?;
        self.finalized.insert(order_id, OrderStatus::Cancelled);
        debug!(order_id = %order_id, symbol = %symbol, "order cancelled");
        Ok(CommandOutcome::Cancelled(order))
    }

    /// Match the top of book repeatedly until it no longer crosses.
    fn drain(
        &mut self,
        symbol: &Symbol,
        taker: OrderId,
        fills: &mut Vec<Fill>,
    ) -> Result<(), EngineError> {
        loop {
            let Some(bid) = self.index.best(symbol, Side::BUY)? else {
                return Ok(());
            };
            let Some(ask) = self.index.best(symbol, Side::SELL)? else {
                return Ok(());
            };
            if !crossing::can_match(bid.price, ask.price) {
                return Ok(());
            }

            let buy = self.load(&bid)?;
            let sell = self.load(&ask)?;
            let step = executor::execute(&buy, &sell, Some(taker), self.clock.tick())?;

            self.index.commit(vec![
                executor::rest_or_remove(&step.buy),
                executor::rest_or_remove(&step.sell),
            ])?;

            for order in [&step.buy, &step.sell] {
                if order.is_filled() {
                    self.finalized.insert(order.order_id, OrderStatus::Filled);
                }
            }
            debug!(
                trade_id = %step.trade.trade_id,
                symbol = %symbol,
                price = %step.trade.price,
                quantity = %step.trade.quantity,
                buy_order_id = %step.buy.order_id,
                sell_order_id = %step.sell.order_id,
                "orders matched"
            );
            fills.push(step.into());
        }
    }

    /// Record of a live order, or `None` if it is terminal or unknown.
    fn resting(&self, order_id: OrderId) -> Result<Option<Order>, EngineError> {
        if self.finalized.contains_key(&order_id) {
            return Ok(None);
        }
        Ok(self.index.get(order_id)?)
    }

    /// Full record behind an index entry; the member and the record must agree.
    fn load(&self, entry: &RestingOrder) -> Result<Order, EngineError> {
        let order = self.index.get(entry.order_id())?.ok_or_else(|| {
            IndexError::Corrupt(format!("no record for indexed order {}", entry.order_id()))
        })?;
        if order.unfilled_quantity != entry.unfilled() {
            return Err(IndexError::Corrupt(format!(
                "order {} indexed with unfilled {} but record has {}",
                order.order_id,
                entry.unfilled(),
                order.unfilled_quantity
            ))
            .into());
        }
        Ok(order)
    }

    /// State of `order_id` after matching: still resting, or as left by
    /// the last fill it took part in.
    fn current_state(&self, order_id: OrderId, fills: &[Fill]) -> Result<Order, EngineError> {
        if let Some(order) = self.index.get(order_id)? {
            return Ok(order);
        }
        fills
            .iter()
            .rev()
            .find_map(|fill| fill.order(order_id).cloned())
            .ok_or_else(|| {
                IndexError::Corrupt(format!("order {order_id} vanished from the book")).into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::MemoryIndex;
    use types::ids::OwnerId;

    fn engine() -> MatchingEngine {
        MatchingEngine::new(Arc::new(MemoryIndex::new()))
    }

    fn limit(owner: &str, side: Side, price: u64, qty: &str) -> Order {
        Order::new(
            OwnerId::from(owner),
            Symbol::from("BTC/USDT"),
            side,
            OrderType::Limit,
            Some(Price::from_u64(price)),
            Quantity::from_str(qty).unwrap(),
            1708123456789000000,
        )
    }

    fn submit(engine: &mut MatchingEngine, order: Order) -> (CommandOutcome, Vec<Fill>) {
        let mut fills = Vec::new();
        let outcome = engine
            .execute(EngineCommand::Submit(order), &mut fills)
            .unwrap();
        (outcome, fills)
    }

    #[test]
    fn test_engine_resting_order() {
        let mut engine = engine();
        let order = limit("a", Side::BUY, 50000, "1.0");

        let (outcome, fills) = submit(&mut engine, order.clone());

        assert!(fills.is_empty());
        match outcome {
            CommandOutcome::Accepted(rested) => {
                assert_eq!(rested.status, OrderStatus::Pending);
                assert!(rested.modified_at > 0);
            }
            other => panic!("expected Accepted, got {other:?}"),
        }
        assert!(engine.index().get(order.order_id).unwrap().is_some());
    }

    #[test]
    fn test_engine_full_match() {
        let mut engine = engine();
        submit(&mut engine, limit("a", Side::SELL, 50000, "1.0"));

        let buy = limit("b", Side::BUY, 50000, "1.0");
        let (outcome, fills) = submit(&mut engine, buy.clone());

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].trade.quantity, Quantity::from_str("1.0").unwrap());
        assert_eq!(fills[0].trade.taker_order_id, buy.order_id);
        match outcome {
            CommandOutcome::Accepted(order) => assert_eq!(order.status, OrderStatus::Filled),
            other => panic!("expected Accepted, got {other:?}"),
        }
        assert_eq!(engine.finalized_status(buy.order_id), Some(OrderStatus::Filled));
    }

    #[test]
    fn test_engine_no_cross() {
        let mut engine = engine();
        submit(&mut engine, limit("a", Side::SELL, 51000, "1.0"));

        let (_, fills) = submit(&mut engine, limit("b", Side::BUY, 50000, "1.0"));
        assert!(fills.is_empty());
    }

    #[test]
    fn test_same_owner_orders_still_match() {
        let mut engine = engine();
        submit(&mut engine, limit("a", Side::SELL, 100, "1"));

        let (_, fills) = submit(&mut engine, limit("a", Side::BUY, 100, "1"));
        assert_eq!(fills.len(), 1);
    }

    #[test]
    fn test_cancel_resting_order() {
        let mut engine = engine();
        let order = limit("a", Side::BUY, 100, "1");
        submit(&mut engine, order.clone());

        let mut fills = Vec::new();
        let outcome = engine
            .execute(
                EngineCommand::Cancel {
                    order_id: order.order_id,
                    owner_id: OwnerId::from("a"),
                    symbol: order.symbol.clone(),
                },
                &mut fills,
            )
            .unwrap();

        match outcome {
            CommandOutcome::Cancelled(cancelled) => {
                assert_eq!(cancelled.status, OrderStatus::Cancelled)
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert!(engine.index().get(order.order_id).unwrap().is_none());
    }

    #[test]
    fn test_cancel_by_other_owner_rejected() {
        let mut engine = engine();
        let order = limit("a", Side::BUY, 100, "1");
        submit(&mut engine, order.clone());

        let outcome = engine
            .execute(
                EngineCommand::Cancel {
                    order_id: order.order_id,
                    owner_id: OwnerId::from("mallory"),
                    symbol: order.symbol.clone(),
                },
                &mut Vec::new(),
            )
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Rejected(RejectReason::NotOwner));
        assert!(engine.index().get(order.order_id).unwrap().is_some());
    }

    #[test]
    fn test_resubmit_terminal_order_is_duplicate() {
        let mut engine = engine();
        let sell = limit("a", Side::SELL, 100, "1");
        submit(&mut engine, sell.clone());
        submit(&mut engine, limit("b", Side::BUY, 100, "1"));

        let (outcome, fills) = submit(&mut engine, sell);
        assert_eq!(outcome, CommandOutcome::Duplicate);
        assert!(fills.is_empty());
    }

    #[test]
    fn test_market_order_remainder_cancelled() {
        let mut engine = engine();
        submit(&mut engine, limit("a", Side::SELL, 100, "0.5"));

        let market = Order::new(
            OwnerId::from("b"),
            Symbol::from("BTC/USDT"),
            Side::BUY,
            OrderType::Market,
            None,
            Quantity::from_str("2").unwrap(),
            1708123456789000000,
        );
        let (outcome, fills) = submit(&mut engine, market.clone());

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].trade.price, Price::from_u64(100));
        match outcome {
            CommandOutcome::Accepted(order) => {
                assert_eq!(order.status, OrderStatus::Cancelled);
                assert_eq!(order.filled_quantity, Quantity::from_str("0.5").unwrap());
                assert!(order.check_invariant());
            }
            other => panic!("expected Accepted, got {other:?}"),
        }
        assert!(engine.index().get(market.order_id).unwrap().is_none());
    }

    #[test]
    fn test_modify_below_filled_rejected() {
        let mut engine = engine();
        let buy = limit("a", Side::BUY, 100, "2");
        submit(&mut engine, buy.clone());
        submit(&mut engine, limit("b", Side::SELL, 100, "1"));

        let outcome = engine
            .execute(
                EngineCommand::Modify {
                    order_id: buy.order_id,
                    owner_id: OwnerId::from("a"),
                    symbol: buy.symbol.clone(),
                    price: Price::from_u64(100),
                    quantity: Quantity::from_str("1").unwrap(),
                },
                &mut Vec::new(),
            )
            .unwrap();

        assert!(matches!(
            outcome,
            CommandOutcome::Rejected(RejectReason::QuantityBelowFilled { .. })
        ));
    }

    #[test]
    fn test_finalized_memory_is_bounded() {
        let mut engine = MatchingEngine::with_finalized_capacity(Arc::new(MemoryIndex::new()), 3);
        let mut sells = Vec::new();
        for _ in 0..4 {
            let sell = limit("a", Side::SELL, 100, "1");
            submit(&mut engine, sell.clone());
            let (_, fills) = submit(&mut engine, limit("b", Side::BUY, 100, "1"));
            assert_eq!(fills.len(), 1);
            assert!(engine.finalized_len() <= 3);
            sells.push(sell);
        }

        assert_eq!(engine.finalized_len(), 3);
        assert_eq!(engine.finalized_status(sells[0].order_id), None);
        assert_eq!(engine.finalized_status(sells[3].order_id), Some(OrderStatus::Filled));

        // forgotten ids are gone from the book too
        let outcome = engine
            .execute(
                EngineCommand::Cancel {
                    order_id: sells[0].order_id,
                    owner_id: OwnerId::from("a"),
                    symbol: sells[0].symbol.clone(),
                },
                &mut Vec::new(),
            )
            .unwrap();
        assert_eq!(outcome, CommandOutcome::NotFound);
    }

    #[test]
    fn test_unscorable_price_is_not_retried() {
        let overflow = EngineError::Index(IndexError::ScoreOverflow("1e22".into()));
        assert!(!overflow.is_retryable());
        assert!(EngineError::Index(IndexError::Timeout("slow".into())).is_retryable());
    }
}
