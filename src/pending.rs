use crate::error::ResolveError;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};
use tokio::sync::watch;

/// How the batch processor finished with a pending instance id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The name was written to the cache before the id was unmarked.
    Resolved,
    NotFound,
    Failed(Arc<str>),
}

struct Slot {
    generation: u64,
    tx: watch::Sender<Option<Resolution>>,
}

#[derive(Default)]
struct Slots {
    next_generation: u64,
    by_id: HashMap<String, Slot>,
}

/// The set of instance ids that are queued or in flight.
///
/// Each pending id carries a watch channel, so every caller waiting on the same id is woken by the single
/// [`PendingRequests::unmark`] that ends the request. Dropping a slot without sending (see
/// [`PendingRequests::clear`]) wakes waiters with [`ResolveError::Shutdown`].
///
/// Every mark gets a generation. The operations taking one only touch the slot created by that mark, so a stale
/// owner can't end a request that was cleared and marked again in the meantime.
///
/// The lock is synchronous and never held across an await.
#[derive(Default, Clone)]
pub struct PendingRequests {
    slots: Arc<Mutex<Slots>>,
}

/// Result of [`PendingRequests::try_mark`].
pub enum Mark {
    /// The caller won the race and must enqueue the id.
    Marked(PendingWait),
    /// Someone else enqueued the id already; only wait.
    AlreadyPending(PendingWait),
}

impl Mark {
    pub fn into_wait(self) -> PendingWait {
        match self {
            Mark::Marked(wait) | Mark::AlreadyPending(wait) => wait,
        }
    }
}

/// A subscription to the outcome of one pending id.
pub struct PendingWait {
    instance_id: String,
    generation: u64,
    rx: watch::Receiver<Option<Resolution>>,
}

impl PendingRequests {
    /// Marks `instance_id` as pending unless it already is. Check and insert happen under one lock.
    pub fn try_mark(&self, instance_id: &str) -> Mark {
        let mut slots = self.slots();
        if let Some(slot) = slots.by_id.get(instance_id) {
            return Mark::AlreadyPending(PendingWait {
                instance_id: instance_id.to_string(),
                generation: slot.generation,
                rx: slot.tx.subscribe(),
            });
        }

        let generation = slots.next_generation;
        slots.next_generation += 1;
        let (tx, rx) = watch::channel(None);
        slots.by_id.insert(instance_id.to_string(), Slot { generation, tx });
        Mark::Marked(PendingWait {
            instance_id: instance_id.to_string(),
            generation,
            rx,
        })
    }

    /// Removes `instance_id` and publishes `resolution` to all of its waiters. Returns false if it was not pending.
    pub fn unmark(&self, instance_id: &str, resolution: Resolution) -> bool {
        let slot = self.slots().by_id.remove(instance_id);
        match slot {
            Some(slot) => {
                slot.tx.send_replace(Some(resolution));
                true
            }
            None => false,
        }
    }

    /// Like [`PendingRequests::unmark`], but only if the id is still pending under `generation`.
    pub fn settle(&self, instance_id: &str, generation: u64, resolution: Resolution) -> bool {
        match self.remove_generation(instance_id, generation) {
            Some(slot) => {
                slot.tx.send_replace(Some(resolution));
                true
            }
            None => false,
        }
    }

    /// Removes `instance_id` without an outcome if it is still pending under `generation`. Its waiters see
    /// [`ResolveError::Shutdown`].
    pub fn abandon(&self, instance_id: &str, generation: u64) -> bool {
        self.remove_generation(instance_id, generation).is_some()
    }

    /// Drops every pending id without an outcome. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut slots = self.slots();
        let count = slots.by_id.len();
        slots.by_id.clear();
        count
    }

    pub fn is_pending(&self, instance_id: &str) -> bool {
        self.slots().by_id.contains_key(instance_id)
    }

    pub fn len(&self) -> usize {
        self.slots().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().by_id.is_empty()
    }

    fn remove_generation(&self, instance_id: &str, generation: u64) -> Option<Slot> {
        let mut slots = self.slots();
        match slots.by_id.get(instance_id) {
            Some(slot) if slot.generation == generation => slots.by_id.remove(instance_id),
            Some(_) => {
                trace!(instance_id, generation, "slot was marked again, leaving it alone");
                None
            }
            None => None,
        }
    }

    // A panic while holding the lock cannot leave the map half-updated, so poisoning is ignored.
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PendingWait {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Generation of the mark this subscription belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits until the id is unmarked, at most `timeout`. A timeout only affects this waiter.
    pub async fn wait(mut self, timeout: Duration) -> Result<Resolution, ResolveError> {
        let outcome = tokio::time::timeout(timeout, async {
            self.rx.wait_for(Option::is_some).await.map(|it| it.clone())
        })
        .await;

        match outcome {
            Ok(Ok(Some(resolution))) => Ok(resolution),
            Ok(Ok(None)) | Ok(Err(_)) => Err(ResolveError::Shutdown),
            Err(_) => Err(ResolveError::Timeout {
                id: self.instance_id,
                after: timeout,
            }),
        }
    }
}
