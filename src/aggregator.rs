//! Single-consumer collection of fetched entries.
//!
//! Producers send whole entry batches over an mpsc channel. One consumer task owns the
//! [`EntryMap`] and is the only code that ever writes it, so no lock is needed. The map
//! is handed back only once every sender is gone and the channel has drained.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::feed::Entry;

/// Entries keyed by link. A later entry with the same link replaces the earlier one.
pub type EntryMap = HashMap<String, Entry>;

pub type EntrySender = mpsc::UnboundedSender<Vec<Entry>>;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("entry consumer failed: {0}")]
    Consumer(#[from] tokio::task::JoinError),
}

pub struct Aggregator {
    tx: EntrySender,
    consumer: JoinHandle<EntryMap>,
}

impl Aggregator {
    /// Opens the channel and starts the consumer task.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume(rx));
        Self { tx, consumer }
    }

    /// A handle for one producer. The channel stays open while any handle is alive.
    pub fn sender(&self) -> EntrySender {
        self.tx.clone()
    }

    /// Closes the aggregator's own end of the channel and waits for the consumer to
    /// drain it.
    ///
    /// Call this only after every producer has finished and dropped its sender;
    /// otherwise this waits for the stragglers.
    pub async fn finish(self) -> Result<EntryMap, AggregateError> {
        drop(self.tx);
        let entries = self.consumer.await?;
        debug!(unique = entries.len(), "Entry consumer drained");
        Ok(entries)
    }
}

async fn consume(mut rx: mpsc::UnboundedReceiver<Vec<Entry>>) -> EntryMap {
    let mut entries = EntryMap::new();
    while let Some(batch) = rx.recv().await {
        for entry in batch {
            entries.insert(entry.link.clone(), entry);
        }
    }
    entries
}
