//! Trade settlement
//!
//! Writes the engine's view of both matched orders plus the trade to the
//! ledger as one unit. Row versions are re-read on every attempt and the
//! engine's in-memory result is written again; nothing is re-matched.
//!
//! A settlement that still fails after `max_attempts` is fatal: the book
//! already moved, so the mismatch goes to the [`ReconciliationLog`] and is
//! logged at `error`. It is never dropped.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use types::ids::{OrderId, TradeId};
use types::order::Order;
use types::trade::Trade;

use matching_engine::Fill;

use crate::ledger::{Ledger, LedgerError, OrderWrite};

// ── Config & errors ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Attempts per settlement, the first one included
    pub max_attempts: u32,
    /// Deadline for each ledger call
    pub call_timeout: Duration,
    /// Linear backoff unit between attempts
    pub retry_backoff: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            call_timeout: Duration::from_secs(2),
            retry_backoff: Duration::from_millis(20),
        }
    }
}

/// Conflicts and timeouts are retried inside the settler; only the final
/// failure reaches the caller, carrying the last ledger error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    /// Retries exhausted; the book and the ledger disagree until reconciled
    #[error("settlement of {subject} failed after {attempts} attempts: {last}")]
    Fatal {
        subject: String,
        attempts: u32,
        last: LedgerError,
    },
}

// ── Events ──────────────────────────────────────────────────────────

/// Published once per trade that reached the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementEvent {
    pub buy_order: Order,
    pub sell_order: Order,
    pub trade: Trade,
    pub settled_at: i64,
}

// ── Reconciliation ──────────────────────────────────────────────────

/// A write the ledger never accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub trade_id: Option<TradeId>,
    pub order_ids: Vec<OrderId>,
    pub orders: Vec<Order>,
    pub trade: Option<Trade>,
    pub reason: String,
    pub logged_at: i64,
}

/// Out-of-band queue of fatal settlements awaiting repair.
#[derive(Debug, Default)]
pub struct ReconciliationLog {
    entries: Mutex<Vec<ReconciliationEntry>>,
}

impl ReconciliationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: ReconciliationEntry) {
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<ReconciliationEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand the pending entries to a repair job.
    pub fn drain(&self) -> Vec<ReconciliationEntry> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ReconciliationEntry>> {
        // entries stay valid even if a recorder panicked mid-push
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Settler ─────────────────────────────────────────────────────────

pub struct Settler {
    ledger: Arc<dyn Ledger>,
    config: SettlementConfig,
    reconciliation: Arc<ReconciliationLog>,
    events: broadcast::Sender<SettlementEvent>,
}

impl Settler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        config: SettlementConfig,
        reconciliation: Arc<ReconciliationLog>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            ledger,
            config,
            reconciliation,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn reconciliation(&self) -> &Arc<ReconciliationLog> {
        &self.reconciliation
    }

    /// Persist a fill and publish its settlement event.
    ///
    /// Returns `Ok(None)` when the trade id is already in the ledger.
    pub async fn settle(&self, fill: &Fill) -> Result<Option<SettlementEvent>, SettlementError> {
        let trade = &fill.trade;
        let mut last = LedgerError::Unavailable("no attempt made".into());

        for attempt in 1..=self.config.max_attempts {
            let result = match self.writes_for(&[&fill.buy_order, &fill.sell_order]).await {
                Ok(writes) => {
                    self.call(self.ledger.commit_settlement(writes, trade)).await
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(stored) => {
                    let event = Self::event_from(stored, fill);
                    debug!(
                        trade_id = %trade.trade_id,
                        symbol = %trade.symbol,
                        attempt,
                        "trade settled"
                    );
                    // no subscribers is fine
                    let _ = self.events.send(event.clone());
                    return Ok(Some(event));
                }
                Err(LedgerError::DuplicateTrade(trade_id)) => {
                    debug!(trade_id = %trade_id, "trade already settled");
                    return Ok(None);
                }
                Err(err) => {
                    warn!(
                        trade_id = %trade.trade_id,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %err,
                        "settlement attempt failed"
                    );
                    last = err;
                }
            }
            self.backoff(attempt).await;
        }

        Err(self.escalate(
            format!("trade {}", trade.trade_id),
            Some(trade.clone()),
            vec![fill.buy_order.clone(), fill.sell_order.clone()],
            last,
        ))
    }

    /// Persist an order transition that produced no trade (rested,
    /// cancelled, modified, market remainder cancelled).
    pub async fn persist_order_state(&self, order: &Order) -> Result<Order, SettlementError> {
        let mut last = LedgerError::Unavailable("no attempt made".into());

        for attempt in 1..=self.config.max_attempts {
            let result = match self.writes_for(&[order]).await {
                Ok(writes) => self.call(self.ledger.persist_orders(writes)).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(mut stored) => {
                    debug!(
                        order_id = %order.order_id,
                        status = %order.status,
                        attempt,
                        "order state persisted"
                    );
                    return Ok(stored.pop().unwrap_or_else(|| order.clone()));
                }
                Err(err) => {
                    warn!(
                        order_id = %order.order_id,
                        attempt,
                        error = %err,
                        "order persist attempt failed"
                    );
                    last = err;
                }
            }
            self.backoff(attempt).await;
        }

        Err(self.escalate(
            format!("order {}", order.order_id),
            None,
            vec![order.clone()],
            last,
        ))
    }

    /// Pair each order with the row version currently in the ledger.
    async fn writes_for(&self, orders: &[&Order]) -> Result<Vec<OrderWrite>, LedgerError> {
        let mut writes = Vec::with_capacity(orders.len());
        for order in orders {
            let current = self
                .call(self.ledger.find_order_by_id(order.order_id))
                .await?;
            let expected = current.map_or(0, |row| row.version);
            writes.push(OrderWrite::new((*order).clone(), expected));
        }
        Ok(writes)
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: std::future::Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.config.call_timeout)),
        }
    }

    async fn backoff(&self, attempt: u32) {
        if attempt < self.config.max_attempts {
            tokio::time::sleep(self.config.retry_backoff * attempt).await;
        }
    }

    fn event_from(stored: Vec<Order>, fill: &Fill) -> SettlementEvent {
        let find = |id: OrderId, fallback: &Order| {
            stored
                .iter()
                .find(|o| o.order_id == id)
                .cloned()
                .unwrap_or_else(|| fallback.clone())
        };
        SettlementEvent {
            buy_order: find(fill.buy_order.order_id, &fill.buy_order),
            sell_order: find(fill.sell_order.order_id, &fill.sell_order),
            trade: fill.trade.clone(),
            settled_at: types::now_nanos(),
        }
    }

    fn escalate(
        &self,
        subject: String,
        trade: Option<Trade>,
        orders: Vec<Order>,
        last: LedgerError,
    ) -> SettlementError {
        let order_ids: Vec<OrderId> = orders.iter().map(|o| o.order_id).collect();
        error!(
            subject = %subject,
            order_ids = ?order_ids,
            attempts = self.config.max_attempts,
            error = %last,
            "settlement fatal, queued for reconciliation"
        );
        self.reconciliation.record(ReconciliationEntry {
            trade_id: trade.as_ref().map(|t| t.trade_id),
            order_ids,
            orders,
            trade,
            reason: last.to_string(),
            logged_at: types::now_nanos(),
        });
        SettlementError::Fatal {
            subject,
            attempts: self.config.max_attempts,
            last,
        }
    }
}
