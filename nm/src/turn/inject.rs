//! Mid-turn injection queue
//!
//! External callers (the wire session, the task scheduler, alarms) push
//! text while a turn is in flight; the loop drains the queue at the safe
//! point before each provider call and appends the content as user
//! messages. FIFO between injections; an injection enqueued before a
//! provider call is always visible to that call.

use tokio::sync::mpsc;

/// Queue depth. Senders briefly await when the loop is far behind.
pub const INJECTION_QUEUE_DEPTH: usize = 64;

/// Create a linked injection queue
pub fn injection_channel() -> (InjectionTx, InjectionRx) {
    let (tx, rx) = mpsc::channel(INJECTION_QUEUE_DEPTH);
    (InjectionTx { tx }, InjectionRx { rx })
}

/// Sender half; cheap to clone
#[derive(Clone)]
pub struct InjectionTx {
    tx: mpsc::Sender<String>,
}

impl InjectionTx {
    /// Enqueue, waiting if the queue is full. Returns false when the loop
    /// side is gone.
    pub async fn inject(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).await.is_ok()
    }

    /// Enqueue without waiting; false when full or closed
    pub fn try_inject(&self, text: impl Into<String>) -> bool {
        self.tx.try_send(text.into()).is_ok()
    }
}

/// Receiver half, owned by the turn loop
pub struct InjectionRx {
    rx: mpsc::Receiver<String>,
}

impl InjectionRx {
    /// Everything queued so far, in FIFO order
    pub fn try_drain(&mut self) -> Vec<String> {
        let mut drained = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            drained.push(text);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = injection_channel();
        tx.inject("first").await;
        tx.inject("second").await;
        tx.inject("third").await;

        assert_eq!(rx.try_drain(), vec!["first", "second", "third"]);
        assert!(rx.try_drain().is_empty());
    }

    #[tokio::test]
    async fn test_clone_senders_share_queue() {
        let (tx, mut rx) = injection_channel();
        let tx2 = tx.clone();
        tx.inject("a").await;
        tx2.inject("b").await;

        assert_eq!(rx.try_drain().len(), 2);
    }
}
