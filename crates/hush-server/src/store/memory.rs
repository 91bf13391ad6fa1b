use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time;
use tracing::{debug, info, warn};

use super::{check_condition, expiry_from, now, PutCondition, SecretStore, StoreError, StoredRecord};

/// Process-local store. Records vanish with the process.
///
/// Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, (StoredRecord, i64)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, (StoredRecord, i64)>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Unix timestamp at which the live record under `key` expires.
    pub fn expires_at(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = now();
        Ok(self
            .lock()?
            .get(key)
            .filter(|(_, exp)| now < *exp)
            .map(|(_, exp)| *exp))
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn prune(&self) -> Result<usize, StoreError> {
        let now = now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, (_, exp)| now < *exp);
        let removed = before - entries.len();
        if removed > 0 {
            info!(removed, "pruned expired secrets");
        }
        Ok(removed)
    }

    /// Spawn a background Tokio task that calls `prune()` every `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune() {
                    warn!(error = %e, "background sweep error");
                }
            }
        });
    }
}

impl SecretStore for MemoryStore {
    fn put(
        &self,
        record: &StoredRecord,
        ttl: Duration,
        condition: PutCondition,
    ) -> Result<(), StoreError> {
        let now = now();
        let mut entries = self.lock()?;

        let current = entries
            .get(&record.key)
            .filter(|(_, exp)| now < *exp)
            .map(|(r, _)| r.viewed);
        check_condition(current, condition)?;

        entries.insert(record.key.clone(), (record.clone(), expiry_from(now, ttl)));
        debug!(viewed = record.viewed, ttl_secs = ttl.as_secs(), "stored secret");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        let now = now();
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((record, exp)) if now < *exp => Ok(Some(record.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    fn record(key: &str, viewed: bool) -> StoredRecord {
        StoredRecord {
            key: key.into(),
            secret: "value".into(),
            viewed,
            nonce: None,
            tag: None,
            salt: None,
            pass: false,
        }
    }

    #[test]
    fn put_get_and_conditions() {
        let s = MemoryStore::new();
        s.put(&record("K", false), DAY, PutCondition::Absent).unwrap();
        assert_eq!(
            s.put(&record("K", false), DAY, PutCondition::Absent),
            Err(StoreError::AlreadyExists)
        );
        s.put(&record("K", true), Duration::from_secs(10), PutCondition::Viewed(false))
            .unwrap();
        assert_eq!(
            s.put(&record("K", true), DAY, PutCondition::Viewed(false)),
            Err(StoreError::ConditionFailed)
        );
        assert!(s.get("K").unwrap().unwrap().viewed);
    }

    #[test]
    fn expired_records_are_gone() {
        let s = MemoryStore::new();
        s.put(&record("A", false), Duration::ZERO, PutCondition::Absent)
            .unwrap();
        s.put(&record("B", false), Duration::ZERO, PutCondition::Absent)
            .unwrap();
        s.put(&record("C", false), DAY, PutCondition::Absent).unwrap();
        assert_eq!(s.get("A").unwrap(), None);
        assert_eq!(s.expires_at("B").unwrap(), None);
        assert_eq!(s.prune().unwrap(), 1);
        assert!(s.get("C").unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_drops_unread_expired_records() {
        let s = MemoryStore::new();
        for i in 0..100 {
            s.put(&record(&format!("K{i}"), false), Duration::ZERO, PutCondition::Absent)
                .unwrap();
        }
        s.put(&record("LIVE", false), DAY, PutCondition::Absent)
            .unwrap();
        s.clone().spawn_sweep(Duration::from_millis(10));

        time::sleep(Duration::from_millis(100)).await;
        let entries = s.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("LIVE"));
    }

    #[test]
    fn clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.put(&record("K", false), DAY, PutCondition::Absent).unwrap();
        assert!(b.get("K").unwrap().is_some());
    }
}
