use tokio::sync::{mpsc, Mutex};

/// Unbounded FIFO between one producer loop and one consumer loop.
///
/// `push` never blocks. `try_pop` is a non-blocking poll and `pop` waits for
/// the next item, waking as soon as the producer enqueues.
pub struct PendingQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<T: Send> PendingQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn push(&self, item: T) {
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.tx.send(item);
    }

    /// Returns `None` when the queue is empty, or while another task is
    /// parked in `pop`.
    pub fn try_pop(&self) -> Option<T> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Cancel-safe: dropping the future never loses an item.
    pub async fn pop(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

impl<T: Send> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
