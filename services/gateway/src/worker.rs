//! Matching workers
//!
//! Each worker drains one bounded queue and is the only writer for the
//! symbols routed to it. Fills and order state changes are handed to the
//! worker's settlement partition; the worker never waits on the ledger
//! unless that queue is full.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use matching_engine::{CommandOutcome, EngineCommand, EngineError, Fill, MatchingEngine, OrderbookIndex};
use persistence::{SettlementHandle, SettlementJob};

/// One admitted command waiting in a worker queue.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub command: EngineCommand,
}

impl WorkItem {
    pub fn new(command: EngineCommand) -> Self {
        Self { command }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Extra attempts after a transient index failure.
    pub max_readmissions: u32,
    pub readmission_delay: Duration,
}

pub struct MatchingWorker {
    partition: usize,
    engine: MatchingEngine,
    settlement: SettlementHandle,
    config: WorkerConfig,
}

impl MatchingWorker {
    /// Start a worker on its own task and return its queue.
    pub fn spawn(
        partition: usize,
        index: Arc<dyn OrderbookIndex>,
        settlement: SettlementHandle,
        config: WorkerConfig,
        capacity: usize,
    ) -> (mpsc::Sender<WorkItem>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = Self {
            partition,
            engine: MatchingEngine::new(index),
            settlement,
            config,
        };
        let task = tokio::spawn(worker.run(rx));
        (tx, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<WorkItem>) {
        info!(partition = self.partition, "matching worker started");
        while let Some(item) = rx.recv().await {
            let _ = self.process(item).await;
        }
        info!(partition = self.partition, "matching worker stopped");
    }

    /// Run one command through the engine and hand its results to
    /// settlement.
    ///
    /// A transient index failure is retried here, before the next queued
    /// command, so later commands for the symbol never overtake it.
    pub async fn process(&mut self, item: WorkItem) -> Result<CommandOutcome, EngineError> {
        let command = item.command;
        let order_id = command.order_id();
        let kind = command.kind();
        let mut attempt = 0;

        loop {
            match self.attempt(&command).await {
                Ok(outcome) => {
                    match &outcome {
                        CommandOutcome::Rejected(reason) => {
                            info!(order_id = %order_id, command = kind, reason = %reason, "command rejected");
                        }
                        CommandOutcome::NotFound => {
                            debug!(order_id = %order_id, command = kind, "target order not resting");
                        }
                        CommandOutcome::Duplicate => {
                            debug!(order_id = %order_id, command = kind, "order already terminal");
                        }
                        _ => {}
                    }
                    return Ok(outcome);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_readmissions => {
                    attempt += 1;
                    warn!(
                        order_id = %order_id,
                        command = kind,
                        attempt,
                        error = %err,
                        "index failure, retrying command"
                    );
                    tokio::time::sleep(self.config.readmission_delay).await;
                }
                Err(err) => {
                    error!(
                        order_id = %order_id,
                        symbol = %command.symbol(),
                        command = kind,
                        attempts = attempt + 1,
                        error = %err,
                        "command abandoned"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// One engine pass. Fills committed before a failure are settled
    /// regardless.
    async fn attempt(&mut self, command: &EngineCommand) -> Result<CommandOutcome, EngineError> {
        let order_id = command.order_id();
        let mut fills = Vec::new();
        let result = self.engine.execute(command.clone(), &mut fills);

        let last_state = fills
            .iter()
            .rev()
            .find_map(|fill| fill.order(order_id))
            .cloned();
        for fill in fills {
            self.settle_fill(fill).await;
        }

        if let Ok(outcome) = &result {
            if let Some(order) = outcome.order() {
                if last_state.as_ref() != Some(order) {
                    self.enqueue(SettlementJob::OrderState(order.clone())).await;
                }
            }
        }
        result
    }

    async fn settle_fill(&self, fill: Fill) {
        debug!(
            trade_id = %fill.trade.trade_id,
            symbol = %fill.trade.symbol,
            price = %fill.trade.price,
            quantity = %fill.trade.quantity,
            "fill queued for settlement"
        );
        self.enqueue(SettlementJob::Fill(fill)).await;
    }

    async fn enqueue(&self, job: SettlementJob) {
        if let Err(err) = self.settlement.enqueue(job).await {
            error!(partition = self.partition, error = %err, "settlement queue closed, job lost");
        }
    }
}
