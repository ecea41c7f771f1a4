use signstream_common::frame::Window;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A sealed window on its way to the prediction service, tagged with the
/// session it was captured in.
#[derive(Debug)]
pub struct DispatchTask {
    pub generation: u64,
    pub window: Window,
}

/// Producer half of the dispatch queue: an unbounded FIFO with an
/// observable length.
#[derive(Debug)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<DispatchTask>,
    pending: Arc<AtomicUsize>,
}

/// Consumer half, shared by every worker of a pool. Workers take turns
/// holding the receiver, so tasks come out strictly in enqueue order.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: Mutex<mpsc::UnboundedReceiver<DispatchTask>>,
    pending: Arc<AtomicUsize>,
}

pub fn dispatch_queue() -> (DispatchQueue, Arc<QueueReceiver>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let receiver = QueueReceiver {
        rx: Mutex::new(rx),
        pending: Arc::clone(&pending),
    };
    (DispatchQueue { tx, pending }, Arc::new(receiver))
}

impl DispatchQueue {
    /// Returns `false` if every worker has gone away.
    pub fn enqueue(&self, task: DispatchTask) -> bool {
        // Counted before the send so a dequeue can never underflow.
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Windows sealed but not yet picked up by a worker.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueReceiver {
    /// Wait for the oldest task. `None` once the producer is dropped and
    /// the queue is drained.
    pub async fn dequeue(&self) -> Option<DispatchTask> {
        let task = self.rx.lock().await.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(task)
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(seq: u64) -> DispatchTask {
        DispatchTask {
            generation: 1,
            window: Window::new(seq, Vec::new()),
        }
    }

    #[tokio::test]
    async fn fifo_with_observable_length() {
        let (queue, receiver) = dispatch_queue();
        assert!(queue.is_empty());
        for seq in 0..3 {
            assert!(queue.enqueue(task(seq)));
        }
        assert_eq!(queue.len(), 3);

        let order: Vec<u64> = vec![
            receiver.dequeue().await.unwrap().window.seq,
            receiver.dequeue().await.unwrap().window.seq,
        ];
        assert_eq!(order, vec![0, 1]);
        assert_eq!(queue.len(), 1);
        assert_eq!(receiver.len(), 1);
    }

    #[tokio::test]
    async fn drained_queue_ends_after_producer_drops() {
        let (queue, receiver) = dispatch_queue();
        queue.enqueue(task(0));
        drop(queue);
        assert_eq!(receiver.dequeue().await.map(|t| t.window.seq), Some(0));
        assert!(receiver.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn enqueue_fails_without_consumer() {
        let (queue, receiver) = dispatch_queue();
        drop(receiver);
        assert!(!queue.enqueue(task(0)));
        assert_eq!(queue.len(), 0);
    }
}
