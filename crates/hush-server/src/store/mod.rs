pub mod db;
pub mod memory;
pub mod model;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub use db::RedbStore;
pub use memory::MemoryStore;
pub use model::{Payload, SecretRecord, StoredRecord, VIEWED_SENTINEL};

/// Precondition a [`SecretStore::put`] must satisfy before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// No live record exists under the key.
    Absent,
    /// A live record exists and its `viewed` flag equals the given value.
    Viewed(bool),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `PutCondition::Absent` failed: the key is taken.
    #[error("key already exists")]
    AlreadyExists,

    /// `PutCondition::Viewed` failed: record missing or in another state.
    #[error("conditional update rejected")]
    ConditionFailed,

    /// The call did not complete within its deadline.
    #[error("storage call timed out")]
    Timeout,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Key-value storage with per-record expiry.
///
/// Expiry is the store's job: a record whose TTL has elapsed must behave as
/// absent for both `get` and `put`. Calls are synchronous; callers that need
/// a deadline run them on a blocking thread.
pub trait SecretStore: Send + Sync + 'static {
    /// Write `record` under `record.key` with a fresh TTL, if `condition`
    /// holds. Check and write are atomic with respect to other `put` calls.
    fn put(
        &self,
        record: &StoredRecord,
        ttl: Duration,
        condition: PutCondition,
    ) -> Result<(), StoreError>;

    /// Fetch a live record. Expired records are `None`.
    fn get(&self, key: &str) -> Result<Option<StoredRecord>, StoreError>;
}

pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub(crate) fn expiry_from(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
}

/// Shared condition check for store implementations. `current` is the live
/// record's `viewed` flag, or `None` when no live record exists.
pub(crate) fn check_condition(
    current: Option<bool>,
    condition: PutCondition,
) -> Result<(), StoreError> {
    match (condition, current) {
        (PutCondition::Absent, None) => Ok(()),
        (PutCondition::Absent, Some(_)) => Err(StoreError::AlreadyExists),
        (PutCondition::Viewed(expected), Some(viewed)) if viewed == expected => Ok(()),
        (PutCondition::Viewed(_), _) => Err(StoreError::ConditionFailed),
    }
}
