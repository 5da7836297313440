//! FIFO hand-off of job ids from submission to the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use inferq_core::JobId;

/// The worker side of the queue is gone; the id was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job queue is closed, job {0} was not enqueued")]
pub struct QueueClosed(pub JobId);

/// Create a connected queue pair.
pub fn job_queue() -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        JobQueue {
            tx,
            depth: depth.clone(),
        },
        JobReceiver { rx, depth },
    )
}

/// Producer handle. Cloneable; enqueue never blocks.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<JobId>,
    depth: Arc<AtomicUsize>,
}

impl JobQueue {
    pub fn enqueue(&self, job_id: JobId) -> Result<(), QueueClosed> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.tx.send(job_id).map_err(|e| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            QueueClosed(e.0)
        })
    }

    /// Ids enqueued but not yet taken by the worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Consumer handle, owned by the worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<JobId>,
    depth: Arc<AtomicUsize>,
}

impl JobReceiver {
    /// Wait for the next id in submission order.
    ///
    /// Cancel safe: dropping the future never loses an id. Returns `None` once
    /// every producer is dropped and the queue is drained.
    pub async fn dequeue(&mut self) -> Option<JobId> {
        let id = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dequeues_in_enqueue_order() {
        let (queue, mut rx) = job_queue();
        let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        for id in &ids {
            queue.enqueue(*id).unwrap();
        }
        assert_eq!(queue.depth(), 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.dequeue().await.unwrap());
        }
        assert_eq!(seen, ids);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn closed_queue_rejects_enqueue() {
        let (queue, rx) = job_queue();
        drop(rx);

        let id = JobId::new();
        assert_eq!(queue.enqueue(id), Err(QueueClosed(id)));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn dequeue_ends_when_producers_are_gone() {
        let (queue, mut rx) = job_queue();
        let id = JobId::new();
        queue.enqueue(id).unwrap();
        drop(queue);

        assert_eq!(rx.dequeue().await, Some(id));
        assert_eq!(rx.dequeue().await, None);
    }
}
