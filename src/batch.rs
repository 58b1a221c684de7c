use crate::{
    cache::DnsCache,
    lookup::{
        self,
        InstanceLookup,
    },
    pending::{
        PendingRequests,
        Resolution,
    },
    queue::RequestReceiver,
    stats::ProviderStats,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use tokio::sync::oneshot;

/// The single background task that turns queued instance ids into batched lookup calls.
pub struct BatchProcessor<L> {
    pub(crate) lookup: Arc<L>,
    pub(crate) cache: DnsCache,
    pub(crate) pending: PendingRequests,
    pub(crate) receiver: RequestReceiver,
    pub(crate) batch_window: Duration,
    pub(crate) stats: Arc<ProviderStats>,
}

impl<L: InstanceLookup> BatchProcessor<L> {
    /// Runs until `shutdown` fires (or its sender is dropped) or every queue producer is gone. On exit no batch is in
    /// flight, the queue is closed and all remaining waiters are released with a shutdown error.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let max_batch = self.receiver.capacity();
        info!(max_batch, batch_window = ?self.batch_window, "Starting batch processing");

        loop {
            let batch = tokio::select! {
                _ = &mut shutdown => break,
                batch = self.receiver.drain_up_to(max_batch, self.batch_window) => batch,
            };

            if batch.is_empty() {
                debug!("request queue closed");
                break;
            }

            let size = batch.len();
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Shutdown while a batch of {size} instances was in flight");
                    break;
                }
                _ = self.process(batch) => {}
            }
        }

        let leftover = self.receiver.close();
        let released = self.pending.clear();
        info!(leftover = leftover.len(), released, "Batch processing stopped");
    }

    /// Issues one lookup for `batch` and settles every id in it. Never fails: lookup errors are reported to the
    /// waiters of this batch and the loop moves on.
    async fn process(&self, batch: Vec<String>) {
        debug!("Describing batch of {} instances", batch.len());
        self.stats.record_batch();

        let reservations = match self.lookup.describe_instances(&batch).await {
            Ok(reservations) => reservations,
            Err(err) => {
                error!(size = batch.len(), "Instance lookup failed: {err}");
                self.stats.record_lookup_failure();
                let reason: Arc<str> = err.to_string().into();
                for instance_id in &batch {
                    self.pending.unmark(instance_id, Resolution::Failed(reason.clone()));
                }
                return;
            }
        };

        let resolved: HashMap<String, String> = lookup::dns_names(reservations).collect();
        let mut missing = Vec::new();
        let mut found = Vec::with_capacity(batch.len());
        for instance_id in batch {
            if resolved.contains_key(&instance_id) {
                found.push(instance_id);
            } else {
                missing.push(instance_id);
            }
        }

        // the cache must be populated before waiters are woken
        self.cache.extend(resolved);

        for instance_id in &found {
            self.pending.unmark(instance_id, Resolution::Resolved);
        }

        if !missing.is_empty() {
            warn!(?missing, "Lookup did not return {} instances", missing.len());
            self.stats.record_not_found(missing.len());
            for instance_id in &missing {
                self.pending.unmark(instance_id, Resolution::NotFound);
            }
        }

        trace!(resolved = found.len(), "Batch done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::LookupError,
        lookup::{
            FixtureLookup,
            Instance,
            Reservation,
        },
        queue::request_queue,
    };

    struct FailingLookup;

    impl InstanceLookup for FailingLookup {
        async fn describe_instances(&self, _instance_ids: &[String]) -> Result<Vec<Reservation>, LookupError> {
            Err(LookupError::Throttled)
        }
    }

    fn batch_processor<L: InstanceLookup>(lookup: L, capacity: usize) -> (BatchProcessor<L>, crate::queue::RequestQueue) {
        let (queue, receiver) = request_queue(capacity);
        let processor = BatchProcessor {
            lookup: Arc::new(lookup),
            cache: DnsCache::default(),
            pending: PendingRequests::default(),
            receiver,
            batch_window: Duration::from_millis(10),
            stats: Default::default(),
        };
        (processor, queue)
    }

    #[tokio::test]
    async fn writes_cache_before_unmarking() {
        let lookup = FixtureLookup::new(vec![Reservation {
            instances: vec![Instance::new("i-1", "dns-1")],
        }]);
        let (processor, _queue) = batch_processor(lookup, 4);

        let found = processor.pending.try_mark("i-1").into_wait();
        let missing = processor.pending.try_mark("i-2").into_wait();
        processor.process(vec!["i-1".to_string(), "i-2".to_string()]).await;

        assert_eq!(found.wait(Duration::from_secs(1)).await, Ok(Resolution::Resolved));
        assert_eq!(missing.wait(Duration::from_secs(1)).await, Ok(Resolution::NotFound));
        assert_eq!(processor.cache.get("i-1").as_deref(), Some("dns-1"));
        assert_eq!(processor.cache.get("i-2"), None);
        assert!(processor.pending.is_empty());
        assert_eq!(processor.stats.snapshot().not_found, 1);
    }

    #[tokio::test]
    async fn failed_lookup_unmarks_whole_batch() {
        let (processor, _queue) = batch_processor(FailingLookup, 4);

        let waits: Vec<_> = ["i-1", "i-2"]
            .into_iter()
            .map(|id| processor.pending.try_mark(id).into_wait())
            .collect();
        processor.process(vec!["i-1".to_string(), "i-2".to_string()]).await;

        for wait in waits {
            let resolution = wait.wait(Duration::from_secs(1)).await.unwrap();
            assert!(matches!(resolution, Resolution::Failed(_)));
        }
        assert!(processor.cache.is_empty());
        assert_eq!(processor.stats.snapshot().lookup_failures, 1);
    }

    #[tokio::test]
    async fn shutdown_releases_queued_waiters() {
        let (processor, queue) = batch_processor(FixtureLookup::default(), 4);
        let pending = processor.pending.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let wait = pending.try_mark("i-1").into_wait();
        let task = tokio::spawn(processor.run(shutdown_rx));
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(wait.wait(Duration::from_secs(1)).await, Err(crate::ResolveError::Shutdown));
        assert!(queue.push("i-2".to_string()).await.is_err());
    }
}
