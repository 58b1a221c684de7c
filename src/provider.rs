use crate::{
    batch::BatchProcessor,
    cache::DnsCache,
    config::ProviderConfig,
    error::{
        ConfigError,
        ResolveError,
    },
    lookup::InstanceLookup,
    pending::{
        Mark,
        PendingRequests,
        Resolution,
    },
    queue::{
        request_queue,
        RequestQueue,
        RequestReceiver,
    },
    stats::{
        ProviderStats,
        StatsSnapshot,
    },
};
use std::{
    sync::{
        Arc,
        Mutex,
        PoisonError,
    },
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::error::TrySendError,
        oneshot,
    },
    task::JoinHandle,
    time::Instant,
};

enum Worker {
    Idle(RequestReceiver),
    Running {
        shutdown: oneshot::Sender<()>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Resolves instance ids to private DNS names, coalescing concurrent lookups into batched remote calls.
///
/// Construct it once, call [`InstanceDnsProvider::start_batch_processing`] and share it (e.g. in an `Arc`) with
/// every task that needs to resolve instances. [`InstanceDnsProvider::shutdown`] stops the background task.
pub struct InstanceDnsProvider<L> {
    config: ProviderConfig,
    lookup: Arc<L>,
    cache: DnsCache,
    pending: PendingRequests,
    queue: RequestQueue,
    stats: Arc<ProviderStats>,
    worker: Mutex<Worker>,
}

impl<L: InstanceLookup> InstanceDnsProvider<L> {
    /// Creates an idle provider. Fails if `config` has a zero queue capacity or wait timeout.
    pub fn new(config: ProviderConfig, lookup: L) -> Result<Self, ConfigError> {
        config.validate()?;
        let (queue, receiver) = request_queue(config.queue_capacity);

        Ok(Self {
            config,
            lookup: Arc::new(lookup),
            cache: DnsCache::default(),
            pending: PendingRequests::default(),
            queue,
            stats: Default::default(),
            worker: Mutex::new(Worker::Idle(receiver)),
        })
    }

    /// Spawns the batch processor onto the current tokio runtime. Returns false if it was started before (or the
    /// provider is shut down), in which case nothing happens.
    pub fn start_batch_processing(&self) -> bool {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let receiver = match std::mem::replace(&mut *worker, Worker::Stopped) {
            Worker::Idle(receiver) => receiver,
            other => {
                *worker = other;
                debug!("batch processing already started");
                return false;
            }
        };

        let processor = BatchProcessor {
            lookup: self.lookup.clone(),
            cache: self.cache.clone(),
            pending: self.pending.clone(),
            receiver,
            batch_window: self.config.batch_window,
            stats: self.stats.clone(),
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(processor.run(shutdown_rx));
        *worker = Worker::Running { shutdown, handle };
        true
    }

    /// Stops the batch processor and waits for it to exit. Callers still waiting get [`ResolveError::Shutdown`],
    /// later cache misses fail the same way. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let worker = std::mem::replace(
            &mut *self.worker.lock().unwrap_or_else(PoisonError::into_inner),
            Worker::Stopped,
        );

        match worker {
            Worker::Running { shutdown, handle } => {
                let _ = shutdown.send(());
                if let Err(err) = handle.await {
                    error!("batch processor did not stop cleanly: {err}");
                }
            }
            Worker::Idle(mut receiver) => {
                receiver.close();
                self.pending.clear();
            }
            Worker::Stopped => {}
        }
    }

    /// Returns the private DNS name of `instance_id`, waiting for a batched lookup on a cache miss.
    ///
    /// Concurrent calls for the same id share a single queued request. The wait is bounded by
    /// [`ProviderConfig::wait_timeout`].
    pub async fn private_dns_name(&self, instance_id: &str) -> Result<String, ResolveError> {
        self.private_dns_name_within(instance_id, self.config.wait_timeout).await
    }

    /// Like [`InstanceDnsProvider::private_dns_name`] with a caller-specific bound on the wait. Timing out (or
    /// dropping the future) does not affect other callers waiting on the same id: once marked, the id is queued and
    /// resolved whether or not the caller that marked it is still around.
    #[instrument(level = "trace", skip(self))]
    pub async fn private_dns_name_within(&self, instance_id: &str, timeout: Duration) -> Result<String, ResolveError> {
        if let Some(name) = self.cache.get(instance_id) {
            self.stats.record_cache_hit();
            return Ok(name);
        }
        self.stats.record_cache_miss();

        let deadline = Instant::now() + timeout;

        let wait = match self.pending.try_mark(instance_id) {
            Mark::Marked(wait) => {
                // a batch may have finished between the cache check and the mark
                if let Some(name) = self.cache.get(instance_id) {
                    self.pending.settle(instance_id, wait.generation(), Resolution::Resolved);
                    return Ok(name);
                }
                self.enqueue(instance_id, wait.generation())?;
                wait
            }
            Mark::AlreadyPending(wait) => {
                trace!("joining pending request");
                self.stats.record_coalesced();
                wait
            }
        };

        let resolution = match wait.wait(deadline.saturating_duration_since(Instant::now())).await {
            Ok(resolution) => resolution,
            Err(ResolveError::Timeout { id, .. }) => {
                debug!("gave up waiting for resolution");
                self.stats.record_timeout();
                return Err(ResolveError::Timeout { id, after: timeout });
            }
            Err(err) => return Err(err),
        };

        match resolution {
            Resolution::Resolved => self
                .cache
                .get(instance_id)
                .ok_or_else(|| ResolveError::NotFound(instance_id.to_string())),
            Resolution::NotFound => Err(ResolveError::NotFound(instance_id.to_string())),
            Resolution::Failed(reason) => Err(ResolveError::LookupFailed {
                id: instance_id.to_string(),
                reason,
            }),
        }
    }

    /// Queues a freshly marked id without awaiting, so nothing between the mark and the enqueue can be cancelled.
    /// With the queue full the push continues in its own task and completes once the processor makes room.
    fn enqueue(&self, instance_id: &str, generation: u64) -> Result<(), ResolveError> {
        match self.queue.try_push(instance_id.to_string()) {
            Ok(()) => {
                self.stats.record_enqueued();
                Ok(())
            }
            Err(TrySendError::Full(instance_id)) => {
                debug!(queued = self.queue.queued(), "request queue is full, waiting for room in the background");
                let queue = self.queue.clone();
                let pending = self.pending.clone();
                let stats = self.stats.clone();
                tokio::spawn(async move {
                    match queue.push(instance_id.clone()).await {
                        Ok(()) => stats.record_enqueued(),
                        Err(_) => {
                            pending.abandon(&instance_id, generation);
                        }
                    }
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.abandon(instance_id, generation);
                Err(ResolveError::Shutdown)
            }
        }
    }

    /// Cached name of `instance_id`, without queueing anything.
    pub fn cached_dns_name(&self, instance_id: &str) -> Option<String> {
        self.cache.get(instance_id)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{
        FixtureLookup,
        Instance,
        Reservation,
    };
    use std::time::Duration;

    fn fixture() -> FixtureLookup {
        FixtureLookup::new(vec![Reservation {
            instances: vec![Instance::new("i-1", "dns-1")],
        }])
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let provider = InstanceDnsProvider::new(ProviderConfig::default(), fixture()).unwrap();
        assert!(provider.start_batch_processing());
        assert!(!provider.start_batch_processing());
        provider.shutdown().await;
        assert!(!provider.start_batch_processing());
    }

    #[test]
    fn rejects_unusable_config() {
        let zero_capacity = ProviderConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            InstanceDnsProvider::new(zero_capacity, fixture()).err(),
            Some(ConfigError::ZeroCapacity)
        );

        let zero_timeout = ProviderConfig {
            wait_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            InstanceDnsProvider::new(zero_timeout, fixture()).err(),
            Some(ConfigError::ZeroWaitTimeout)
        );
    }

    #[tokio::test]
    async fn miss_after_shutdown_fails_fast() {
        let provider = InstanceDnsProvider::new(ProviderConfig::default(), fixture()).unwrap();
        provider.start_batch_processing();
        provider.shutdown().await;
        provider.shutdown().await;

        assert_eq!(provider.private_dns_name("i-1").await, Err(ResolveError::Shutdown));
        assert_eq!(provider.pending_requests(), 0);
    }

    #[tokio::test]
    async fn full_queue_times_out_but_keeps_request() {
        let config = ProviderConfig {
            queue_capacity: 1,
            wait_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        // never started, so nothing drains the queue
        let provider = InstanceDnsProvider::new(config, fixture()).unwrap();

        let first = provider.private_dns_name("i-1").await;
        assert!(matches!(first, Err(ResolveError::Timeout { .. })));
        assert!(provider.pending.is_pending("i-1"));

        let second = provider.private_dns_name("i-2").await;
        assert!(matches!(second, Err(ResolveError::Timeout { .. })));
        assert!(provider.pending.is_pending("i-2"));
        assert_eq!(provider.stats().enqueued, 1);
        assert_eq!(provider.stats().timeouts, 2);
    }

    #[tokio::test]
    async fn cancelled_caller_leaves_request_queued() {
        let config = ProviderConfig {
            queue_capacity: 1,
            ..Default::default()
        };
        let provider = InstanceDnsProvider::new(config, fixture()).unwrap();
        provider.queue.push("i-2".to_string()).await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(20), provider.private_dns_name("i-1")).await;
        assert!(cancelled.is_err());
        assert!(provider.pending.is_pending("i-1"));

        provider.start_batch_processing();
        assert_eq!(provider.private_dns_name("i-1").await.unwrap(), "dns-1");
        assert_eq!(provider.stats().enqueued, 1);
        provider.shutdown().await;
    }
}
