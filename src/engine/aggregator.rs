//! Result Aggregator
//!
//! Single consumer that drains domain records from a bounded channel into
//! the module inventory while workers are still running. The orchestrator
//! stops it only after every worker has joined; on stop it drains whatever
//! is still buffered and hands the inventory back as its acknowledgment.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Sending half given to workers. `send` waits when the aggregator lags.
pub type RecordSender<T> = mpsc::Sender<T>;

/// Handle to a running aggregator
#[derive(Debug)]
pub struct Aggregator<T> {
    stop_tx: oneshot::Sender<oneshot::Sender<Vec<T>>>,
    handle: JoinHandle<()>,
}

impl<T: Send + 'static> Aggregator<T> {
    /// Spawn the consumer; returns the handle and the sender for workers
    pub fn spawn(capacity: usize) -> (Self, RecordSender<T>) {
        let (tx, mut rx) = mpsc::channel::<T>(capacity.max(1));
        let (stop_tx, mut stop_rx) = oneshot::channel::<oneshot::Sender<Vec<T>>>();

        let handle = tokio::spawn(async move {
            let mut inventory = Vec::new();
            let mut open = true;

            let ack = loop {
                tokio::select! {
                    biased;
                    record = rx.recv(), if open => match record {
                        Some(record) => inventory.push(record),
                        // All senders gone; keep waiting for the explicit stop.
                        None => open = false,
                    },
                    ack = &mut stop_rx => break ack,
                }
            };

            // Senders have all completed by now; pick up anything still queued.
            while let Ok(record) = rx.try_recv() {
                inventory.push(record);
            }
            tracing::debug!("Aggregator stopping with {} records", inventory.len());

            if let Ok(ack) = ack {
                let _ = ack.send(inventory);
            }
        });

        (Self { stop_tx, handle }, tx)
    }

    /// Stop the consumer and take the inventory.
    ///
    /// Must only be called once no worker can send any more records.
    pub async fn stop(self) -> Vec<T> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let inventory = if self.stop_tx.send(ack_tx).is_ok() {
            ack_rx.await.unwrap_or_default()
        } else {
            Vec::new()
        };
        if let Err(e) = self.handle.await {
            tracing::error!("Aggregator task ended abnormally: {}", e);
        }
        inventory
    }
}
