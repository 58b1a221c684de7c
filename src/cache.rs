use std::{
    collections::HashMap,
    sync::{
        Arc,
        PoisonError,
        RwLock,
    },
};

/// Maps instance ids to their resolved private DNS name.
///
/// An entry with an empty name is a valid resolution (the instance has no private DNS name), distinct from a missing
/// entry. Entries are never evicted.
///
/// The lock is never held across an await, so lookups don't need an async context.
#[derive(Default, Clone)]
pub struct DnsCache {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl DnsCache {
    pub fn get(&self, instance_id: &str) -> Option<String> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(instance_id).cloned()
    }

    pub fn set(&self, instance_id: impl Into<String>, dns_name: impl Into<String>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance_id.into(), dns_name.into());
    }

    /// Inserts a whole batch under a single write lock.
    pub fn extend(&self, resolved: impl IntoIterator<Item = (String, String)>) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).extend(resolved);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}
