use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{debug, info, warn};

use super::{check_condition, expiry_from, now, PutCondition, SecretStore, StoreError, StoredRecord};

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Leading byte of every encoded envelope, so the layout can change later
/// without guessing at old bytes.
const ENVELOPE_V1: u8 = 0x01;

/// What actually sits in the `secrets` table: the record plus its expiry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    /// Unix timestamp (seconds) at and after which the record is gone.
    expires_at: i64,
    record: StoredRecord,
}

impl Envelope {
    fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Durable store backed by a single redb file.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(unavailable)?;

        let write_txn = db.begin_write().map_err(unavailable)?;
        write_txn.open_table(SECRETS).map_err(unavailable)?;
        write_txn.commit().map_err(unavailable)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Unix timestamp at which the live record under `key` expires.
    pub fn expires_at(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.live_envelope(key)?.map(|e| e.expires_at))
    }

    fn live_envelope(&self, key: &str) -> Result<Option<Envelope>, StoreError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let table = read_txn.open_table(SECRETS).map_err(unavailable)?;

        let raw_bytes: Option<Vec<u8>> = table
            .get(key)
            .map_err(unavailable)?
            .map(|guard| guard.value().to_vec());

        match raw_bytes {
            None => Ok(None),
            Some(bytes) => {
                let envelope = decode(&bytes)?;
                if envelope.is_expired(now()) {
                    Ok(None)
                } else {
                    Ok(Some(envelope))
                }
            }
        }
    }

    /// Remove every expired record. Returns how many were removed.
    pub fn prune(&self) -> Result<usize, StoreError> {
        let now = now();

        // Collect expired keys in a read pass first.
        let expired_keys: Vec<String> = {
            let read_txn = self.db.begin_read().map_err(unavailable)?;
            let table = read_txn.open_table(SECRETS).map_err(unavailable)?;
            let mut keys = Vec::new();
            for item in table.iter().map_err(unavailable)? {
                let (k, v) = item.map_err(unavailable)?;
                match decode(v.value()) {
                    Ok(envelope) if !envelope.is_expired(now) => {}
                    Ok(_) => keys.push(k.value().to_owned()),
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable record");
                        keys.push(k.value().to_owned());
                    }
                }
            }
            keys
        };

        if expired_keys.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let mut removed = 0usize;
        {
            let mut table = write_txn.open_table(SECRETS).map_err(unavailable)?;
            for key in &expired_keys {
                // Re-check: the key may have been rewritten since the read pass.
                let still_expired = match table.get(key.as_str()).map_err(unavailable)? {
                    Some(guard) => decode(guard.value()).map_or(true, |e| e.is_expired(now)),
                    None => false,
                };
                if still_expired {
                    table.remove(key.as_str()).map_err(unavailable)?;
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(unavailable)?;

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

impl SecretStore for RedbStore {
    fn put(
        &self,
        record: &StoredRecord,
        ttl: Duration,
        condition: PutCondition,
    ) -> Result<(), StoreError> {
        let now = now();
        let bytes = encode(&Envelope {
            expires_at: expiry_from(now, ttl),
            record: record.clone(),
        })?;

        // redb serialises write transactions, so the check below and the
        // insert are atomic against every other put.
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        {
            let mut table = write_txn.open_table(SECRETS).map_err(unavailable)?;

            let current: Option<Vec<u8>> = table
                .get(record.key.as_str())
                .map_err(unavailable)?
                .map(|guard| guard.value().to_vec());
            let current_viewed = match current.as_deref().map(decode) {
                Some(Ok(envelope)) => (!envelope.is_expired(now)).then_some(envelope.record.viewed),
                // Nothing readable lives here; a fresh record may take the key.
                Some(Err(e)) if condition == PutCondition::Absent => {
                    warn!(error = %e, "overwriting undecodable record");
                    None
                }
                Some(Err(e)) => return Err(e),
                None => None,
            };
            check_condition(current_viewed, condition)?;

            table
                .insert(record.key.as_str(), bytes.as_slice())
                .map_err(unavailable)?;
        }
        write_txn.commit().map_err(unavailable)?;

        debug!(viewed = record.viewed, ttl_secs = ttl.as_secs(), "stored secret");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.live_envelope(key)?.map(|e| e.record))
    }
}

fn unavailable(e: impl Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn encode(envelope: &Envelope) -> Result<Vec<u8>, StoreError> {
    let payload = bincode::serde::encode_to_vec(envelope, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(format!("bincode encode: {e}")))?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(ENVELOPE_V1);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<Envelope, StoreError> {
    match bytes.split_first() {
        Some((&ENVELOPE_V1, rest)) => {
            let (envelope, _) =
                bincode::serde::decode_from_slice(rest, bincode::config::standard())
                    .map_err(|e| StoreError::Corrupt(format!("bincode decode: {e}")))?;
            Ok(envelope)
        }
        Some((marker, _)) => Err(StoreError::Corrupt(format!(
            "unknown envelope marker {marker:#04x}"
        ))),
        None => Err(StoreError::Corrupt("empty record".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn make_store() -> (RedbStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = RedbStore::open(&path).unwrap();
        (store, dir)
    }

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
    fn put_get() {
        let (s, _dir) = make_store();
        s.put(&record("K", false), DAY, PutCondition::Absent).unwrap();
        assert_eq!(s.get("K").unwrap(), Some(record("K", false)));
        assert_eq!(s.get("missing").unwrap(), None);
    }

    #[test]
    fn insert_if_absent_rejects_duplicate() {
        let (s, _dir) = make_store();
        s.put(&record("K", false), DAY, PutCondition::Absent).unwrap();
        assert_eq!(
            s.put(&record("K", false), DAY, PutCondition::Absent),
            Err(StoreError::AlreadyExists)
        );
    }

    #[test]
    fn conditional_update_only_once() {
        let (s, _dir) = make_store();
        s.put(&record("K", false), DAY, PutCondition::Absent).unwrap();
        let ten = Duration::from_secs(10);
        s.put(&record("K", true), ten, PutCondition::Viewed(false))
            .unwrap();
        assert_eq!(
            s.put(&record("K", true), ten, PutCondition::Viewed(false)),
            Err(StoreError::ConditionFailed)
        );
        assert!(s.get("K").unwrap().unwrap().viewed);
    }

    #[test]
    fn ttl_expiry() {
        let (s, _dir) = make_store();
        // TTL = 0 means already expired.
        s.put(&record("EXPIRED", false), Duration::ZERO, PutCondition::Absent)
            .unwrap();
        assert_eq!(s.get("EXPIRED").unwrap(), None);
        // An expired record no longer blocks the key.
        s.put(&record("EXPIRED", false), DAY, PutCondition::Absent)
            .unwrap();
        assert!(s.get("EXPIRED").unwrap().is_some());
    }

    #[test]
    fn update_of_expired_record_fails() {
        let (s, _dir) = make_store();
        s.put(&record("K", false), Duration::ZERO, PutCondition::Absent)
            .unwrap();
        assert_eq!(
            s.put(&record("K", true), DAY, PutCondition::Viewed(false)),
            Err(StoreError::ConditionFailed)
        );
    }

    #[test]
    fn prune_removes_only_expired() {
        let (s, _dir) = make_store();
        s.put(&record("LIVE", false), DAY, PutCondition::Absent).unwrap();
        s.put(&record("DEAD", false), Duration::ZERO, PutCondition::Absent)
            .unwrap();
        assert_eq!(s.prune().unwrap(), 1);
        assert_eq!(s.prune().unwrap(), 0);
        assert!(s.get("LIVE").unwrap().is_some());
    }

    #[test]
    fn expires_at_tracks_ttl() {
        let (s, _dir) = make_store();
        let before = now();
        s.put(&record("K", false), DAY, PutCondition::Absent).unwrap();
        let exp = s.expires_at("K").unwrap().unwrap();
        assert!(exp >= before + 86_400 && exp <= now() + 86_400);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        {
            let s = RedbStore::open(&path).unwrap();
            s.put(&record("K", false), DAY, PutCondition::Absent).unwrap();
        }
        let s = RedbStore::open(&path).unwrap();
        assert_eq!(s.get("K").unwrap(), Some(record("K", false)));
    }

    fn write_raw(s: &RedbStore, key: &str, bytes: &[u8]) {
        let write_txn = s.db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(SECRETS).unwrap();
            table.insert(key, bytes).unwrap();
        }
        write_txn.commit().unwrap();
    }

    #[test]
    fn insert_if_absent_replaces_undecodable_record() {
        let (s, _dir) = make_store();
        write_raw(&s, "K", &[0x7f, 1, 2, 3]);
        assert!(matches!(s.get("K"), Err(StoreError::Corrupt(_))));

        s.put(&record("K", false), DAY, PutCondition::Absent).unwrap();
        assert_eq!(s.get("K").unwrap(), Some(record("K", false)));
    }

    #[test]
    fn conditional_update_of_undecodable_record_is_corrupt() {
        let (s, _dir) = make_store();
        write_raw(&s, "K", &[]);
        assert!(matches!(
            s.put(&record("K", true), DAY, PutCondition::Viewed(false)),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_marker() {
        assert!(matches!(decode(&[0x7f, 0]), Err(StoreError::Corrupt(_))));
        assert!(matches!(decode(&[]), Err(StoreError::Corrupt(_))));
    }
}
