//! Static symbol → worker partitioning
//!
//! A symbol always lands on the same worker for the life of the process,
//! which makes that worker the single writer of the symbol's book.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::mpsc;
use types::ids::Symbol;

use crate::worker::WorkItem;

/// Worker index owning `symbol` among `partitions` workers.
pub fn partition_of(symbol: &Symbol, partitions: usize) -> usize {
    // DefaultHasher::new() uses fixed keys, so the mapping is stable per build
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// Sending halves of every worker queue.
#[derive(Debug, Clone)]
pub struct PartitionRouter {
    queues: Vec<mpsc::Sender<WorkItem>>,
}

impl PartitionRouter {
    pub fn new(queues: Vec<mpsc::Sender<WorkItem>>) -> Self {
        Self { queues }
    }

    pub fn partitions(&self) -> usize {
        self.queues.len()
    }

    pub fn partition(&self, symbol: &Symbol) -> usize {
        partition_of(symbol, self.queues.len())
    }

    /// Queue an item behind everything already queued for its symbol.
    ///
    /// Waits when the worker's queue is full. Fails only when the worker
    /// is gone, handing the item back.
    pub async fn route(&self, item: WorkItem) -> Result<usize, WorkItem> {
        let partition = self.partition(item.command.symbol());
        match self.queues.get(partition) {
            Some(queue) => queue
                .send(item)
                .await
                .map(|_| partition)
                .map_err(|mpsc::error::SendError(item)| item),
            None => Err(item),
        }
    }
}
