//! Depth publisher
//!
//! Pushes `{symbol, bids, asks, timestamp}` snapshots to subscribers over a
//! broadcast channel, on a fixed period for every configured symbol and on
//! demand when a symbol's book changed. A snapshot whose checksum equals
//! the last one sent for that symbol is skipped.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use types::ids::Symbol;

use crate::snapshot::{DepthSnapshot, DepthSnapshotBuilder, SnapshotError};

#[derive(Debug, Clone)]
pub struct DepthPublisherConfig {
    pub symbols: Vec<Symbol>,
    pub bucket_interval: Decimal,
    pub period: Duration,
}

/// Requests an out-of-cycle snapshot for a symbol.
#[derive(Debug, Clone)]
pub struct DepthTrigger {
    tx: mpsc::Sender<Symbol>,
}

impl DepthTrigger {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Symbol>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Ask for a refresh. A full queue already holds pending refreshes,
    /// so the request is dropped rather than waited on.
    pub fn request(&self, symbol: Symbol) {
        if let Err(mpsc::error::TrySendError::Full(symbol)) = self.tx.try_send(symbol) {
            debug!(symbol = %symbol, "depth refresh already pending");
        }
    }
}

pub struct DepthPublisher {
    builder: DepthSnapshotBuilder,
    config: DepthPublisherConfig,
    tx: broadcast::Sender<DepthSnapshot>,
    last_checksum: HashMap<Symbol, String>,
}

impl DepthPublisher {
    pub fn new(builder: DepthSnapshotBuilder, config: DepthPublisherConfig, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            builder,
            config,
            tx,
            last_checksum: HashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DepthSnapshot> {
        self.tx.subscribe()
    }

    /// Sender half, for subscribing after the publisher has been moved
    /// into its task.
    pub fn sender(&self) -> broadcast::Sender<DepthSnapshot> {
        self.tx.clone()
    }

    /// Build and send one snapshot. Returns whether anything was sent.
    pub fn publish(&mut self, symbol: &Symbol) -> Result<bool, SnapshotError> {
        let snapshot = self.builder.snapshot(symbol, self.config.bucket_interval)?;

        if self.last_checksum.get(symbol) == Some(&snapshot.checksum) {
            return Ok(false);
        }
        self.last_checksum
            .insert(symbol.clone(), snapshot.checksum.clone());

        // no subscribers is fine
        let _ = self.tx.send(snapshot);
        Ok(true)
    }

    /// Run until every [`DepthTrigger`] is dropped.
    pub async fn run(mut self, mut requests: mpsc::Receiver<Symbol>) {
        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            symbols = self.config.symbols.len(),
            period_ms = self.config.period.as_millis() as u64,
            "depth publisher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for symbol in self.config.symbols.clone() {
                        self.publish_logged(&symbol);
                    }
                }
                request = requests.recv() => match request {
                    Some(symbol) => self.publish_logged(&symbol),
                    None => break,
                },
            }
        }
        info!("depth publisher stopped");
    }

    fn publish_logged(&mut self, symbol: &Symbol) {
        if let Err(err) = self.publish(symbol) {
            warn!(symbol = %symbol, error = %err, "depth snapshot failed");
        }
    }
}
