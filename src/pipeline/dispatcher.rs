use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};

use crate::model::RawRecord;
use crate::{Error, Result};

/// Receiving half of the intake queue, shared by every worker of every pool.
pub type IntakeReceiver = Arc<Mutex<mpsc::Receiver<RawRecord>>>;

/// Creates the shared intake queue holding at most `capacity` records.
pub fn intake_queue(capacity: usize) -> (Dispatcher, IntakeReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let dispatcher = Dispatcher {
        tx: Arc::new(RwLock::new(Some(tx))),
        capacity,
    };
    (dispatcher, Arc::new(Mutex::new(rx)))
}

/// Entry point of the pipeline; cloned into every request handler.
///
/// Dropping the last sender (via [`Dispatcher::close`]) lets workers drain
/// the queue and stop.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Arc<RwLock<Option<mpsc::Sender<RawRecord>>>>,
    capacity: usize,
}

impl Dispatcher {
    /// Enqueues one record, waiting while the queue is full.
    pub async fn enqueue(&self, record: RawRecord) -> Result<()> {
        let tx = self.sender()?;
        tx.send(record).await.map_err(|_| Error::QueueClosed)
    }

    /// Like [`Dispatcher::enqueue`], but gives up after `wait`.
    pub async fn enqueue_timeout(&self, record: RawRecord, wait: Duration) -> Result<()> {
        let tx = self.sender()?;
        match tx.send_timeout(record, wait).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(Error::Timeout {
                message: format!("intake queue full for {:?}", wait),
            }),
            Err(SendTimeoutError::Closed(_)) => Err(Error::QueueClosed),
        }
    }

    /// Stops accepting records. Enqueues already waiting for a slot still complete.
    pub fn close(&self) {
        self.tx.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().as_ref().map_or(true, |tx| tx.is_closed())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx
            .read()
            .as_ref()
            .map_or(0, |tx| self.capacity - tx.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sender(&self) -> Result<mpsc::Sender<RawRecord>> {
        self.tx.read().clone().ok_or(Error::QueueClosed)
    }
}
