//! Trade execution logic
//!
//! Turns one crossing pair into updated orders plus a trade. Nothing here
//! touches the index; the engine commits the result.

use thiserror::Error;
use types::errors::OrderError;
use types::ids::OrderId;
use types::order::{Order, Side};
use types::trade::Trade;

use crate::book::IndexOp;

/// Outcome of matching one buy/sell pair
#[derive(Debug, Clone, PartialEq)]
pub struct MatchStep {
    pub buy: Order,
    pub sell: Order,
    pub trade: Trade,
}

/// Match execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("maker order {0} has no limit price")]
    NoMakerPrice(OrderId),

    #[error("orders {0} and {1} are not a buy/sell pair of one symbol")]
    NotAPair(OrderId, OrderId),

    #[error(transparent)]
    Fill(#[from] OrderError),
}

/// Which side supplied the resting liquidity.
///
/// The taker is the order being processed when it is one of the pair.
/// Otherwise both were already resting and the earlier one is the maker.
pub fn maker_side(buy: &Order, sell: &Order, taker: Option<OrderId>) -> Side {
    match taker {
        Some(id) if id == buy.order_id => Side::SELL,
        Some(id) if id == sell.order_id => Side::BUY,
        _ if buy.modified_at <= sell.modified_at => Side::BUY,
        _ => Side::SELL,
    }
}

/// Execute a trade between a buy and a sell order
///
/// Fills `min(buy.unfilled, sell.unfilled)` at the maker's price.
pub fn execute(
    buy: &Order,
    sell: &Order,
    taker: Option<OrderId>,
    timestamp: i64,
) -> Result<MatchStep, MatchError> {
    if buy.side != Side::BUY || sell.side != Side::SELL || buy.symbol != sell.symbol {
        return Err(MatchError::NotAPair(buy.order_id, sell.order_id));
    }

    let (maker, taker_id) = match maker_side(buy, sell, taker) {
        Side::BUY => (buy, sell.order_id),
        Side::SELL => (sell, buy.order_id),
    };
    let price = maker.price.ok_or(MatchError::NoMakerPrice(maker.order_id))?;
    let quantity = buy.unfilled_quantity.min(sell.unfilled_quantity);

    let mut buy = buy.clone();
    let mut sell = sell.clone();
    buy.fill(quantity, timestamp)?;
    sell.fill(quantity, timestamp)?;

    let trade = Trade::new(
        buy.symbol.clone(),
        buy.order_id,
        sell.order_id,
        taker_id,
        price,
        quantity,
        timestamp,
    );

    Ok(MatchStep { buy, sell, trade })
}

/// Index mutation for an order that was resting before the fill: filled
/// orders leave the book, partial fills stay at their original score.
pub fn rest_or_remove(order: &Order) -> IndexOp {
    if order.is_filled() {
        IndexOp::Remove(order.order_id)
    } else {
        IndexOp::Upsert(order.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{OwnerId, Symbol};
    use types::numeric::{Price, Quantity};
    use types::order::{OrderStatus, OrderType};

    fn order(side: Side, price: Option<u64>, qty: &str, ts: i64) -> Order {
        let order_type = if price.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        };
        Order::new(
            OwnerId::from("u-1"),
            Symbol::from("BTC/USDT"),
            side,
            order_type,
            price.map(Price::from_u64),
            Quantity::from_str(qty).unwrap(),
            ts,
        )
    }

    #[test]
    fn test_execute_at_maker_price() {
        let buy = order(Side::BUY, Some(50100), "1.0", 1);
        let sell = order(Side::SELL, Some(50000), "0.5", 2);

        // resting buy, incoming sell: buyer is maker
        let step = execute(&buy, &sell, Some(sell.order_id), 3).unwrap();

        assert_eq!(step.trade.price, Price::from_u64(50100));
        assert_eq!(step.trade.quantity, Quantity::from_str("0.5").unwrap());
        assert_eq!(step.trade.taker_order_id, sell.order_id);
        assert_eq!(step.buy.status, OrderStatus::PartiallyFilled);
        assert_eq!(step.sell.status, OrderStatus::Filled);
        assert!(step.buy.check_invariant() && step.sell.check_invariant());
    }

    #[test]
    fn test_earlier_order_is_maker_without_taker() {
        let buy = order(Side::BUY, Some(101), "1", 20);
        let sell = order(Side::SELL, Some(99), "1", 10);

        assert_eq!(maker_side(&buy, &sell, None), Side::SELL);
        let step = execute(&buy, &sell, None, 30).unwrap();
        assert_eq!(step.trade.price, Price::from_u64(99));
        assert_eq!(step.trade.taker_order_id, buy.order_id);
    }

    #[test]
    fn test_market_taker_uses_maker_price() {
        let buy = order(Side::BUY, None, "2", 20);
        let sell = order(Side::SELL, Some(99), "1", 10);

        let step = execute(&buy, &sell, Some(buy.order_id), 30).unwrap();
        assert_eq!(step.trade.price, Price::from_u64(99));
        assert_eq!(step.buy.unfilled_quantity, Quantity::from_str("1").unwrap());
    }

    #[test]
    fn test_rejects_same_side_pair() {
        let a = order(Side::BUY, Some(100), "1", 1);
        let b = order(Side::BUY, Some(100), "1", 2);
        assert!(matches!(execute(&a, &b, None, 3), Err(MatchError::NotAPair(..))));
    }

    #[test]
    fn test_rest_or_remove() {
        let buy = order(Side::BUY, Some(100), "1.0", 1);
        let sell = order(Side::SELL, Some(100), "0.4", 2);
        let step = execute(&buy, &sell, Some(sell.order_id), 3).unwrap();

        assert!(matches!(rest_or_remove(&step.sell), IndexOp::Remove(id) if id == sell.order_id));
        match rest_or_remove(&step.buy) {
            IndexOp::Upsert(o) => {
                assert_eq!(o.unfilled_quantity, Quantity::from_str("0.6").unwrap());
                assert_eq!(o.modified_at, buy.modified_at);
            }
            other => panic!("expected upsert, got {other:?}"),
        }
    }
}
