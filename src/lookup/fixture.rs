use super::{
    InstanceLookup,
    Reservation,
};
use crate::error::LookupError;
use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;

/// Serves lookups from a fixed set of reservations, optionally with simulated api latency.
///
/// Clones share the call counters, so a clone kept by a test observes calls made through the provider.
#[derive(Clone, Default)]
pub struct FixtureLookup {
    reservations: Arc<Vec<Reservation>>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl FixtureLookup {
    pub fn new(reservations: Vec<Reservation>) -> Self {
        Self {
            reservations: Arc::new(reservations),
            ..Default::default()
        }
    }

    /// Loads a YAML (or JSON) list of reservations.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        let path = path.as_ref();
        debug!(?path, "loading instance fixtures");
        let content = tokio::fs::read_to_string(path).await?;
        let reservations: Vec<Reservation> =
            serde_yaml::from_str(&content).map_err(|err| LookupError::Parse(format!("{}: {err}", path.display())))?;
        Ok(Self::new(reservations))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of `describe_instances` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of ids passed to each call, in call order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().await.clone()
    }
}

impl InstanceLookup for FixtureLookup {
    async fn describe_instances(&self, instance_ids: &[String]) -> Result<Vec<Reservation>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().await.push(instance_ids.len());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let wanted: HashSet<&str> = instance_ids.iter().map(String::as_str).collect();
        let reservations = self
            .reservations
            .iter()
            .filter_map(|reservation| {
                let instances: Vec<_> = reservation
                    .instances
                    .iter()
                    .filter(|instance| wanted.contains(instance.instance_id.as_str()))
                    .cloned()
                    .collect();
                (!instances.is_empty()).then_some(Reservation { instances })
            })
            .collect();

        Ok(reservations)
    }
}
