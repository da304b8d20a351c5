//! End-to-end intake → matching → settlement → depth
//!
//! Runs the full core on the in-memory ledger and index, through both the
//! intake API and the HTTP router.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;

use gateway::models::{CancelOrderRequest, NewOrderRequest};
use gateway::{AppState, Config, Exchange, IntakeError, create_router};
use matching_engine::book::{IndexError, IndexOp, RestingOrder};
use matching_engine::{MemoryIndex, OrderbookIndex};
use persistence::{InMemoryLedger, Ledger, LedgerError, OrderWrite, SettlementEvent};
use types::ids::{OrderId, OwnerId, Symbol};
use types::order::{Order, OrderStatus, OrderType, Side};
use types::trade::Trade;

fn config() -> Config {
    Config {
        symbols: vec![Symbol::from("BTCUSDT"), Symbol::from("ETHUSDT")],
        workers: 2,
        readmission_delay: Duration::from_millis(5),
        ..Config::default()
    }
}

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn limit(owner: &str, side: Side, price: &str, qty: &str) -> NewOrderRequest {
    NewOrderRequest {
        owner_id: OwnerId::from(owner),
        symbol: "BTCUSDT".into(),
        side,
        order_type: OrderType::Limit,
        price: Some(d(price)),
        quantity: d(qty),
    }
}

async fn next_event(events: &mut broadcast::Receiver<SettlementEvent>) -> SettlementEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no settlement event within 5s")
        .unwrap()
}

#[tokio::test]
async fn test_crossing_orders_settle_and_refresh_depth() {
    let ledger = Arc::new(InMemoryLedger::new());
    let exchange = Exchange::start(config(), ledger.clone());
    let mut events = exchange.settlement_events();
    let mut depth = exchange.depth_updates();
    let intake = exchange.intake().clone();

    let maker = intake.admit(limit("maker", Side::SELL, "50000", "1.0")).await.unwrap();
    let taker = intake.admit(limit("taker", Side::BUY, "50100", "0.4")).await.unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.trade.sell_order_id, maker);
    assert_eq!(event.trade.buy_order_id, taker);
    assert_eq!(event.trade.taker_order_id, taker);
    assert_eq!(event.trade.price.as_decimal(), d("50000"));
    assert_eq!(event.trade.quantity.as_decimal(), d("0.4"));
    assert_eq!(event.buy_order.status, OrderStatus::Filled);
    assert_eq!(event.sell_order.status, OrderStatus::PartiallyFilled);

    // a depth push follows the settlement, showing the remaining 0.6
    let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = depth.recv().await.unwrap();
            if snapshot.symbol == Symbol::from("BTCUSDT")
                && snapshot.asks.first().map(|l| l.quantity.as_decimal()) == Some(d("0.6"))
            {
                return snapshot;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(snapshot.asks[0].price, d("50000"));
    assert!(snapshot.bids.is_empty());

    drop(intake);
    exchange.shutdown().await;

    let stored_maker = ledger.find_order_by_id(maker).await.unwrap().unwrap();
    assert_eq!(stored_maker.status, OrderStatus::PartiallyFilled);
    assert_eq!(stored_maker.filled_quantity.as_decimal(), d("0.4"));
    assert_eq!(ledger.trade_count().await, 1);
    assert_eq!(ledger.find_trades_by_order(maker).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_then_market_finds_empty_book() {
    let ledger = Arc::new(InMemoryLedger::new());
    let exchange = Exchange::start(config(), ledger.clone());
    let intake = exchange.intake().clone();

    let resting = intake.admit(limit("alice", Side::BUY, "100", "2")).await.unwrap();
    intake
        .cancel(
            resting,
            CancelOrderRequest {
                owner_id: OwnerId::from("alice"),
                symbol: "BTCUSDT".into(),
            },
        )
        .await
        .unwrap();
    let market = intake
        .admit(NewOrderRequest {
            owner_id: OwnerId::from("bob"),
            symbol: "BTCUSDT".into(),
            side: Side::SELL,
            order_type: OrderType::Market,
            price: None,
            quantity: d("1"),
        })
        .await
        .unwrap();

    drop(intake);
    exchange.shutdown().await;

    let cancelled = ledger.find_order_by_id(resting).await.unwrap().unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    let market = ledger.find_order_by_id(market).await.unwrap().unwrap();
    assert_eq!(market.status, OrderStatus::Cancelled);
    assert!(market.filled_quantity.is_zero());
    assert_eq!(ledger.trade_count().await, 0);
}

#[tokio::test]
async fn test_symbols_match_independently() {
    let ledger = Arc::new(InMemoryLedger::new());
    let exchange = Exchange::start(config(), ledger.clone());
    let intake = exchange.intake().clone();

    for symbol in ["BTCUSDT", "ETHUSDT"] {
        let mut sell = limit("mm", Side::SELL, "10", "1");
        sell.symbol = symbol.into();
        let mut buy = limit("mm", Side::BUY, "10", "1");
        buy.symbol = symbol.into();
        intake.admit(sell).await.unwrap();
        intake.admit(buy).await.unwrap();
    }

    drop(intake);
    exchange.shutdown().await;

    let btc = ledger.recent_trades(&Symbol::from("BTCUSDT"), 10).await.unwrap();
    let eth = ledger.recent_trades(&Symbol::from("ETHUSDT"), 10).await.unwrap();
    assert_eq!(btc.len(), 1);
    assert_eq!(eth.len(), 1);
}

/// Index whose commits fail a fixed number of times, starting at the
/// `fail_from`th call.
struct FlakyIndex {
    inner: MemoryIndex,
    commits: AtomicUsize,
    fail_from: usize,
    failures: usize,
}

impl OrderbookIndex for FlakyIndex {
    fn best(&self, symbol: &Symbol, side: Side) -> Result<Option<RestingOrder>, IndexError> {
        self.inner.best(symbol, side)
    }

    fn get(&self, order_id: OrderId) -> Result<Option<Order>, IndexError> {
        self.inner.get(order_id)
    }

    fn side_entries(&self, symbol: &Symbol, side: Side) -> Result<Vec<RestingOrder>, IndexError> {
        self.inner.side_entries(symbol, side)
    }

    fn commit(&self, ops: Vec<IndexOp>) -> Result<(), IndexError> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.fail_from && n < self.fail_from + self.failures {
            return Err(IndexError::Unavailable("injected".into()));
        }
        self.inner.commit(ops)
    }
}

#[tokio::test]
async fn test_index_failure_is_retried() {
    // commits: #1 sell rests, #2 buy rests, #3 and #4 the match (fail), #5 succeeds
    let index = Arc::new(FlakyIndex {
        inner: MemoryIndex::new(),
        commits: AtomicUsize::new(0),
        fail_from: 3,
        failures: 2,
    });
    let ledger = Arc::new(InMemoryLedger::new());
    let exchange = Exchange::start_with_index(config(), ledger.clone(), index.clone());
    let mut events = exchange.settlement_events();
    let intake = exchange.intake().clone();

    let sell = intake.admit(limit("s", Side::SELL, "100", "1")).await.unwrap();
    let buy = intake.admit(limit("b", Side::BUY, "100", "1")).await.unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event.trade.buy_order_id, buy);
    assert_eq!(event.trade.sell_order_id, sell);
    assert!(index.inner.is_empty());

    drop(intake);
    exchange.shutdown().await;
    assert_eq!(ledger.trade_count().await, 1);
    assert!(all_filled(&ledger, &[buy, sell]).await);
}

#[tokio::test]
async fn test_cancel_after_failed_submit_is_honoured() {
    // commit #1 (the buy resting) fails once; the retry must land before the cancel runs
    let index = Arc::new(FlakyIndex {
        inner: MemoryIndex::new(),
        commits: AtomicUsize::new(0),
        fail_from: 1,
        failures: 1,
    });
    let ledger = Arc::new(InMemoryLedger::new());
    let exchange = Exchange::start_with_index(config(), ledger.clone(), index.clone());
    let intake = exchange.intake().clone();

    let buy = intake.admit(limit("alice", Side::BUY, "100", "1")).await.unwrap();
    intake
        .cancel(
            buy,
            CancelOrderRequest {
                owner_id: OwnerId::from("alice"),
                symbol: "BTCUSDT".into(),
            },
        )
        .await
        .unwrap();

    drop(intake);
    exchange.shutdown().await;

    assert_eq!(index.commits.load(Ordering::SeqCst), 3);
    assert!(index.inner.get(buy).unwrap().is_none());
    let stored = ledger.find_order_by_id(buy).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
}

async fn all_filled(ledger: &InMemoryLedger, ids: &[OrderId]) -> bool {
    for id in ids {
        match ledger.find_order_by_id(*id).await {
            Ok(Some(order)) if order.status == OrderStatus::Filled => {}
            _ => return false,
        }
    }
    true
}

/// Ledger whose settlement writes never return within the timeout.
struct StalledLedger {
    inner: InMemoryLedger,
}

#[async_trait]
impl Ledger for StalledLedger {
    async fn persist_orders(&self, _writes: Vec<OrderWrite>) -> Result<Vec<Order>, LedgerError> {
        std::future::pending().await
    }

    async fn persist_trade(&self, trade: &Trade) -> Result<(), LedgerError> {
        self.inner.persist_trade(trade).await
    }

    async fn commit_settlement(
        &self,
        _writes: Vec<OrderWrite>,
        _trade: &Trade,
    ) -> Result<Vec<Order>, LedgerError> {
        std::future::pending().await
    }

    async fn find_order_by_id(&self, order_id: OrderId) -> Result<Option<Order>, LedgerError> {
        self.inner.find_order_by_id(order_id).await
    }

    async fn find_orders_by_owner_and_window(
        &self,
        owner_id: &OwnerId,
        from: i64,
        to: i64,
    ) -> Result<Vec<Order>, LedgerError> {
        self.inner
            .find_orders_by_owner_and_window(owner_id, from, to)
            .await
    }

    async fn recent_trades(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Trade>, LedgerError> {
        self.inner.recent_trades(symbol, limit).await
    }

    async fn find_trades_by_order(&self, order_id: OrderId) -> Result<Vec<Trade>, LedgerError> {
        self.inner.find_trades_by_order(order_id).await
    }
}

#[tokio::test]
async fn test_backlogged_symbol_refuses_new_orders() {
    let config = Config {
        backlog_limit: 1,
        ledger_timeout: Duration::from_secs(3600),
        ..config()
    };
    let exchange = Exchange::start(config, Arc::new(StalledLedger { inner: InMemoryLedger::new() }));
    let intake = exchange.intake().clone();
    let backlog = exchange.backlog().clone();
    let btc = Symbol::from("BTCUSDT");

    intake.admit(limit("a", Side::BUY, "100", "1")).await.unwrap();
    for _ in 0..500 {
        if backlog.pending(&btc) >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(backlog.is_saturated(&btc));

    let err = intake
        .admit(limit("a", Side::BUY, "99", "1"))
        .await
        .unwrap_err();
    assert_eq!(err, IntakeError::Backlogged(btc.clone()));

    // other symbols keep trading
    let mut eth = limit("a", Side::BUY, "99", "1");
    eth.symbol = "ETHUSDT".into();
    assert!(intake.admit(eth).await.is_ok());
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_http_order_lifecycle() {
    let ledger = Arc::new(InMemoryLedger::new());
    let exchange = Exchange::start(config(), ledger.clone());
    let mut events = exchange.settlement_events();
    let app = create_router(AppState::new(&exchange));

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/orders",
            json!({"owner_id": "alice", "symbol": "BTCUSDT", "side": "SELL",
                   "order_type": "LIMIT", "price": "101.5", "quantity": "2"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = body_json(response).await;
    assert_eq!(accepted["status"], "PENDING");
    let sell_id = accepted["order_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/orders",
            json!({"owner_id": "bob", "symbol": "BTCUSDT", "side": "BUY",
                   "order_type": "MARKET", "quantity": "0.5"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    next_event(&mut events).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/orders/{sell_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let order = body_json(response).await;
    assert_eq!(order["status"], "PARTIALLY_FILLED");
    assert_eq!(order["unfilled_quantity"], "1.5");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/depth/btcusdt?interval=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let depth = body_json(response).await;
    assert_eq!(depth["asks"][0]["price"], "100");
    assert_eq!(depth["asks"][0]["quantity"], "1.5");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/orders/{sell_id}"))
                .header("content-type", "application/json")
                .body(Body::from(json!({"owner_id": "alice", "symbol": "BTCUSDT"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    drop(app);
    exchange.shutdown().await;
    let sell_id = OrderId::from_str(&sell_id).unwrap();
    let stored = ledger.find_order_by_id(sell_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_http_rejections() {
    let exchange = Exchange::start(config(), Arc::new(InMemoryLedger::new()));
    let app = create_router(AppState::new(&exchange));

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/orders",
            json!({"owner_id": "alice", "symbol": "BTCUSDT", "side": "BUY",
                   "order_type": "LIMIT", "quantity": "1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"], "MISSING_PRICE");

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/orders",
            json!({"owner_id": "alice", "symbol": "NOPE", "side": "BUY",
                   "order_type": "MARKET", "quantity": "1"}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error"], "UNKNOWN_SYMBOL");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/orders/{}", OrderId::new()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/depth/BTCUSDT?interval=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/depth/BTCUSDT?interval=0.0000000000000000000000000001")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/orders",
            json!({"owner_id": "alice", "symbol": "BTCUSDT", "side": "BUY",
                   "order_type": "LIMIT", "price": "10000000000000000000000", "quantity": "1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"], "INVALID_PRICE");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/depth/DOGEUSDT")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
