//! Settlement pipeline
//!
//! One bounded queue and one settlement task per matching partition. Jobs
//! from a partition are settled strictly in the order the worker produced
//! them, and the worker never waits on ledger I/O unless the queue is full.
//!
//! [`SettlementBacklog`] counts unsettled jobs per symbol so intake can stop
//! admitting orders for a symbol whose ledger is falling behind the book.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use types::ids::Symbol;
use types::order::Order;

use matching_engine::Fill;

use crate::settlement::Settler;

/// Unit of work for a settlement task.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementJob {
    Fill(Fill),
    OrderState(Order),
}

impl SettlementJob {
    pub fn symbol(&self) -> &Symbol {
        match self {
            SettlementJob::Fill(fill) => &fill.trade.symbol,
            SettlementJob::OrderState(order) => &order.symbol,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("settlement pipeline closed")]
pub struct PipelineClosed;

/// Unsettled job count per symbol.
#[derive(Debug)]
pub struct SettlementBacklog {
    pending: DashMap<Symbol, usize>,
    limit: usize,
}

impl SettlementBacklog {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: DashMap::new(),
            limit,
        }
    }

    pub fn pending(&self, symbol: &Symbol) -> usize {
        self.pending.get(symbol).map_or(0, |n| *n)
    }

    /// Whether new orders for `symbol` must be refused.
    pub fn is_saturated(&self, symbol: &Symbol) -> bool {
        self.pending(symbol) >= self.limit
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn increment(&self, symbol: &Symbol) {
        *self.pending.entry(symbol.clone()).or_insert(0) += 1;
    }

    fn decrement(&self, symbol: &Symbol) {
        if let Some(mut n) = self.pending.get_mut(symbol) {
            *n = n.saturating_sub(1);
        }
    }
}

/// Producer side of one partition's settlement queue.
#[derive(Debug, Clone)]
pub struct SettlementHandle {
    tx: mpsc::Sender<SettlementJob>,
    backlog: Arc<SettlementBacklog>,
}

impl SettlementHandle {
    /// Queue a job, waiting for room if the queue is full.
    pub async fn enqueue(&self, job: SettlementJob) -> Result<(), PipelineClosed> {
        let symbol = job.symbol().clone();
        self.backlog.increment(&symbol);
        if self.tx.send(job).await.is_err() {
            self.backlog.decrement(&symbol);
            return Err(PipelineClosed);
        }
        Ok(())
    }

    pub fn backlog(&self) -> &Arc<SettlementBacklog> {
        &self.backlog
    }
}

pub struct SettlementPipeline {
    handles: Vec<SettlementHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl SettlementPipeline {
    /// Spawn one settlement task per partition.
    pub fn spawn(
        partitions: usize,
        capacity: usize,
        settler: Arc<Settler>,
        backlog: Arc<SettlementBacklog>,
    ) -> Self {
        let mut handles = Vec::with_capacity(partitions);
        let mut tasks = Vec::with_capacity(partitions);

        for partition in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            handles.push(SettlementHandle {
                tx,
                backlog: backlog.clone(),
            });
            tasks.push(tokio::spawn(run_partition(
                partition,
                rx,
                settler.clone(),
                backlog.clone(),
            )));
        }

        Self { handles, tasks }
    }

    pub fn handle(&self, partition: usize) -> Option<SettlementHandle> {
        self.handles.get(partition).cloned()
    }

    pub fn partitions(&self) -> usize {
        self.handles.len()
    }

    /// Close every queue and wait until all queued jobs are settled.
    ///
    /// Handles cloned out of the pipeline keep their queue open; drop them
    /// first.
    pub async fn shutdown(self) {
        drop(self.handles);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn run_partition(
    partition: usize,
    mut rx: mpsc::Receiver<SettlementJob>,
    settler: Arc<Settler>,
    backlog: Arc<SettlementBacklog>,
) {
    debug!(partition, "settlement task started");
    while let Some(job) = rx.recv().await {
        let symbol = job.symbol().clone();
        // fatal errors are escalated by the settler itself
        let _ = match &job {
            SettlementJob::Fill(fill) => settler.settle(fill).await.map(|_| ()),
            SettlementJob::OrderState(order) => {
                settler.persist_order_state(order).await.map(|_| ())
            }
        };
        backlog.decrement(&symbol);
    }
    info!(partition, "settlement task stopped");
}
