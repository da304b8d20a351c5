//! Process wiring
//!
//! ```text
//!  intake ──► worker queue[p] ──► MatchingWorker[p] ──► settlement queue[p]
//!                                      │                      │
//!                               OrderbookIndex           Settler ──► Ledger
//!                                      │                      │
//!                          DepthSnapshotBuilder ◄── trigger ◄─┘ events
//!                                      │
//!                               DepthPublisher ──► broadcast<DepthSnapshot>
//! ```

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use market_data::{DepthPublisher, DepthPublisherConfig, DepthSnapshot, DepthSnapshotBuilder, DepthTrigger};
use matching_engine::{MemoryIndex, OrderbookIndex};
use persistence::{
    Ledger, ReconciliationLog, SettlementBacklog, SettlementEvent, SettlementPipeline, Settler,
};

use crate::config::Config;
use crate::intake::OrderIntake;
use crate::partition::PartitionRouter;
use crate::worker::{MatchingWorker, WorkerConfig};

/// Running trading core.
pub struct Exchange {
    config: Config,
    intake: Arc<OrderIntake>,
    index: Arc<dyn OrderbookIndex>,
    ledger: Arc<dyn Ledger>,
    settler: Arc<Settler>,
    backlog: Arc<SettlementBacklog>,
    depth: DepthSnapshotBuilder,
    snapshots: broadcast::Sender<DepthSnapshot>,
    workers: Vec<JoinHandle<()>>,
    pipeline: SettlementPipeline,
    bridge: JoinHandle<()>,
    publisher: JoinHandle<()>,
}

impl Exchange {
    /// Start workers, settlement and depth publishing over an in-process
    /// index.
    pub fn start(config: Config, ledger: Arc<dyn Ledger>) -> Self {
        Self::start_with_index(config, ledger, Arc::new(MemoryIndex::new()))
    }

    pub fn start_with_index(
        config: Config,
        ledger: Arc<dyn Ledger>,
        index: Arc<dyn OrderbookIndex>,
    ) -> Self {
        let settler = Arc::new(Settler::new(
            ledger.clone(),
            config.settlement(),
            Arc::new(ReconciliationLog::new()),
            config.event_capacity,
        ));
        let backlog = Arc::new(SettlementBacklog::new(config.backlog_limit));
        let pipeline = SettlementPipeline::spawn(
            config.workers,
            config.settlement_queue_capacity,
            settler.clone(),
            backlog.clone(),
        );

        let worker_config = WorkerConfig {
            max_readmissions: config.max_readmissions,
            readmission_delay: config.readmission_delay,
        };
        let mut queues = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);
        for partition in 0..pipeline.partitions() {
            let Some(settlement) = pipeline.handle(partition) else {
                continue;
            };
            let (queue, task) = MatchingWorker::spawn(
                partition,
                index.clone(),
                settlement,
                worker_config,
                config.queue_capacity,
            );
            queues.push(queue);
            workers.push(task);
        }

        let intake = Arc::new(OrderIntake::new(
            config.symbols.iter().cloned(),
            PartitionRouter::new(queues),
            backlog.clone(),
        ));

        let depth = DepthSnapshotBuilder::new(index.clone());
        let publisher = DepthPublisher::new(
            depth.clone(),
            DepthPublisherConfig {
                symbols: config.symbols.clone(),
                bucket_interval: config.depth_interval,
                period: config.depth_period,
            },
            config.event_capacity,
        );
        let snapshots = publisher.sender();
        let (trigger, requests) = DepthTrigger::channel(config.symbols.len() * 4);
        let bridge = tokio::spawn(refresh_depth_on_settlement(settler.subscribe(), trigger));
        let publisher = tokio::spawn(publisher.run(requests));

        info!(
            workers = workers.len(),
            symbols = config.symbols.len(),
            backlog_limit = config.backlog_limit,
            "exchange core started"
        );

        Self {
            config,
            intake,
            index,
            ledger,
            settler,
            backlog,
            depth,
            snapshots,
            workers,
            pipeline,
            bridge,
            publisher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn intake(&self) -> &Arc<OrderIntake> {
        &self.intake
    }

    pub fn index(&self) -> &Arc<dyn OrderbookIndex> {
        &self.index
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn depth(&self) -> &DepthSnapshotBuilder {
        &self.depth
    }

    pub fn backlog(&self) -> &Arc<SettlementBacklog> {
        &self.backlog
    }

    pub fn reconciliation(&self) -> &Arc<ReconciliationLog> {
        self.settler.reconciliation()
    }

    /// Settlement event stream (buy order, sell order, trade).
    pub fn settlement_events(&self) -> broadcast::Receiver<SettlementEvent> {
        self.settler.subscribe()
    }

    pub fn depth_updates(&self) -> broadcast::Receiver<DepthSnapshot> {
        self.snapshots.subscribe()
    }

    /// Drain queued commands and settlements, then stop every task.
    ///
    /// Other holders of the intake handle must be dropped first or the
    /// workers keep waiting for input.
    pub async fn shutdown(self) {
        let Self {
            intake,
            settler,
            workers,
            pipeline,
            bridge,
            publisher,
            ..
        } = self;

        drop(intake);
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "matching worker panicked");
            }
        }
        pipeline.shutdown().await;
        drop(settler);
        let _ = bridge.await;
        let _ = publisher.await;
        info!("exchange core stopped");
    }
}

/// Ask for a fresh depth snapshot of every symbol that just settled a trade.
async fn refresh_depth_on_settlement(
    mut events: broadcast::Receiver<SettlementEvent>,
    trigger: DepthTrigger,
) {
    loop {
        match events.recv().await {
            Ok(event) => trigger.request(event.trade.symbol),
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "depth refresh fell behind settlement events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
