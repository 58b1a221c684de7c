use crate::error::ResolveError;
use std::time::Duration;
use tokio::{
    sync::mpsc::{
        self,
        error::TrySendError,
    },
    time::Instant,
};

/// Creates the bounded channel between resolver calls and the batch processor.
pub fn request_queue(capacity: usize) -> (RequestQueue, RequestReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RequestQueue { tx }, RequestReceiver { rx, capacity })
}

/// Producer half. Cloned into every resolver call.
#[derive(Clone)]
pub struct RequestQueue {
    tx: mpsc::Sender<String>,
}

impl RequestQueue {
    /// Enqueues an id, waiting for room if the queue is full.
    pub async fn push(&self, instance_id: String) -> Result<(), ResolveError> {
        self.tx.send(instance_id).await.map_err(|_| ResolveError::Shutdown)
    }

    /// Enqueues an id if there is room right now. A full or closed queue hands the id back.
    pub fn try_push(&self, instance_id: String) -> Result<(), TrySendError<String>> {
        self.tx.try_send(instance_id)
    }

    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer half, owned by the batch processor.
pub struct RequestReceiver {
    rx: mpsc::Receiver<String>,
    capacity: usize,
}

impl RequestReceiver {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Takes up to `max` ids. Waits for the first one indefinitely, then keeps collecting until `max` ids are in hand
    /// or `window` has passed since the first arrived. Returns an empty batch once all producers are gone.
    pub async fn drain_up_to(&mut self, max: usize, window: Duration) -> Vec<String> {
        let max = max.max(1);
        let mut batch = Vec::with_capacity(max);

        if self.rx.recv_many(&mut batch, max).await == 0 {
            return batch;
        }

        let deadline = Instant::now() + window;
        while batch.len() < max {
            let remaining = max - batch.len();
            match tokio::time::timeout_at(deadline, self.rx.recv_many(&mut batch, remaining)).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }

        batch
    }

    /// Stops accepting ids and returns whatever was still queued.
    pub fn close(&mut self) -> Vec<String> {
        self.rx.close();
        let mut leftover = Vec::new();
        while let Ok(id) = self.rx.try_recv() {
            leftover.push(id);
        }
        leftover
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_stops_at_max() {
        let (queue, mut receiver) = request_queue(8);
        for i in 0..8 {
            queue.push(format!("i-{i}")).await.unwrap();
        }
        assert_eq!(queue.queued(), 8);

        let batch = receiver.drain_up_to(5, Duration::from_secs(5)).await;
        assert_eq!(batch, vec!["i-0", "i-1", "i-2", "i-3", "i-4"]);
        let batch = receiver.drain_up_to(5, Duration::from_millis(10)).await;
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn drain_collects_late_arrivals_within_window() {
        let (queue, mut receiver) = request_queue(8);
        let producer = tokio::spawn(async move {
            queue.push("i-1".to_string()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.push("i-2".to_string()).await.unwrap();
            queue
        });

        let batch = receiver.drain_up_to(8, Duration::from_millis(500)).await;
        assert_eq!(batch, vec!["i-1", "i-2"]);
        drop(producer.await.unwrap());
    }

    #[tokio::test]
    async fn isolated_id_does_not_stall() {
        let (queue, mut receiver) = request_queue(8);
        queue.push("i-1".to_string()).await.unwrap();

        let started = std::time::Instant::now();
        let batch = receiver.drain_up_to(8, Duration::from_millis(30)).await;
        assert_eq!(batch, vec!["i-1"]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn push_after_close_is_shutdown() {
        let (queue, mut receiver) = request_queue(2);
        queue.push("i-1".to_string()).await.unwrap();
        assert_eq!(receiver.close(), vec!["i-1"]);
        assert_eq!(queue.push("i-2".to_string()).await, Err(ResolveError::Shutdown));
    }

    #[tokio::test]
    async fn try_push_hands_back_id_when_full() {
        let (queue, mut receiver) = request_queue(1);
        queue.try_push("i-1".to_string()).unwrap();
        assert!(matches!(queue.try_push("i-2".to_string()), Err(TrySendError::Full(id)) if id == "i-2"));

        receiver.close();
        assert!(matches!(queue.try_push("i-3".to_string()), Err(TrySendError::Closed(_))));
    }

    #[tokio::test]
    async fn drain_returns_empty_when_producers_are_gone() {
        let (queue, mut receiver) = request_queue(2);
        drop(queue);
        assert!(receiver.drain_up_to(2, Duration::from_millis(10)).await.is_empty());
    }
}
