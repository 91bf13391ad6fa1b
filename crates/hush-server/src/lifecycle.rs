//! Create, reveal-once and expire.
//!
//! Per record: `Created(unviewed) -> Viewed(residual TTL) -> Gone`. Expiry
//! belongs to the store; nothing here sweeps.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{debug, info, warn};

use crate::crypto::{CipherEngine, SALT_LEN};
use crate::error::{Error, Result};
use crate::keygen::{KeyGenerator, OsKeyGenerator};
use crate::store::{PutCondition, SecretRecord, SecretStore, StoreError, StoredRecord};

pub const DAY_SECS: u64 = 86_400;
pub const MIN_TTL_SECS: u64 = DAY_SECS;
pub const MAX_TTL_SECS: u64 = 7 * DAY_SECS;
pub const DEFAULT_TTL_SECS: u64 = MAX_TTL_SECS;

/// How long a revealed record lingers (holding only the sentinel) before the
/// store drops it.
pub const VIEWED_TTL: Duration = Duration::from_secs(10);

/// Longest accepted message, in characters.
pub const MAX_CONTENT_CHARS: usize = 1500;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fresh keys tried before a create gives up on collisions.
const MAX_KEY_ATTEMPTS: usize = 5;

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

#[derive(Clone, Deserialize)]
pub struct CreateRequest {
    pub content: String,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Empty means store in clear.
    #[serde(default)]
    pub passphrase: String,
    /// Set by [`LifecycleManager::create_password`]; not accepted from clients.
    #[serde(skip_deserializing)]
    pub is_password: bool,
}

impl fmt::Debug for CreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateRequest")
            .field("content", &"[REDACTED]")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("encrypted", &!self.passphrase.is_empty())
            .field("is_password", &self.is_password)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateResponse {
    pub key: String,
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct PasswordResponse {
    pub key: String,
    pub password: String,
}

impl fmt::Debug for PasswordResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordResponse")
            .field("key", &self.key)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct RevealRequest {
    pub key: String,
    #[serde(default)]
    pub passphrase: String,
}

impl fmt::Debug for RevealRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevealRequest")
            .field("key", &key_hint(&self.key))
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct RevealResponse {
    pub content: String,
    pub is_password: bool,
}

impl fmt::Debug for RevealResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevealResponse")
            .field("content", &"[REDACTED]")
            .field("is_password", &self.is_password)
            .finish()
    }
}

/// Orchestrates the secret lifecycle over an injected store.
///
/// Cheap to clone; clones share the store handle and key generator.
#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn SecretStore>,
    keys: Arc<dyn KeyGenerator>,
    cipher: CipherEngine,
    store_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            keys: Arc::new(OsKeyGenerator),
            cipher: CipherEngine::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_cipher(mut self, cipher: CipherEngine) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_key_generator(mut self, keys: Arc<dyn KeyGenerator>) -> Self {
        self.keys = keys;
        self
    }

    /// Deadline applied to every individual storage call.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn generate_password(&self) -> String {
        self.keys.generate_password()
    }

    /// Store a secret and return its public key.
    pub async fn create(&self, request: CreateRequest) -> Result<CreateResponse> {
        validate_create(&request)?;

        let CreateRequest {
            content,
            ttl_seconds,
            passphrase,
            is_password,
        } = request;
        let cipher = self.cipher;
        let payload = run_blocking(move || cipher.encrypt(&content, &passphrase)).await??;
        let encrypted = payload.is_encrypted();
        let ttl = Duration::from_secs(ttl_seconds);

        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let key = self.keys.generate_public_key();
            let stored = StoredRecord::from(&SecretRecord {
                key: key.clone(),
                payload: payload.clone(),
                is_password,
                viewed: false,
            });

            match self
                .call_store(move |s| s.put(&stored, ttl, PutCondition::Absent))
                .await
            {
                Ok(()) => {
                    info!(
                        key = key_hint(&key),
                        encrypted,
                        is_password,
                        ttl_seconds,
                        "secret created"
                    );
                    return Ok(CreateResponse { key });
                }
                Err(StoreError::AlreadyExists) => {
                    warn!(attempt, "public key collision, retrying with a fresh key");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Internal(format!(
            "no unused public key after {MAX_KEY_ATTEMPTS} attempts"
        )))
    }

    /// Generate a password and store it as a secret.
    pub async fn create_password(
        &self,
        ttl_seconds: u64,
        passphrase: String,
    ) -> Result<PasswordResponse> {
        let password = self.generate_password();
        let created = self
            .create(CreateRequest {
                content: password.clone(),
                ttl_seconds,
                passphrase,
                is_password: true,
            })
            .await?;
        Ok(PasswordResponse {
            key: created.key,
            password,
        })
    }

    /// Exchange a key (and passphrase) for the secret, exactly once.
    ///
    /// A wrong passphrase leaves the record as it was. On success the record
    /// is overwritten with the sentinel, marked viewed and given
    /// [`VIEWED_TTL`]; that write is conditional on the record still being
    /// unviewed, and only the caller whose write lands gets the content.
    pub async fn reveal(&self, request: RevealRequest) -> Result<RevealResponse> {
        let RevealRequest { key, passphrase } = request;
        let key = key.trim().to_owned();
        if key.is_empty() {
            return Err(Error::Validation("key must not be empty".into()));
        }

        let lookup = key.clone();
        let Some(stored) = self.call_store(move |s| s.get(&lookup)).await? else {
            return Err(self.not_found(passphrase).await);
        };
        let record = SecretRecord::try_from(stored)?;

        if record.viewed {
            debug!(key = key_hint(&key), "secret already viewed");
            return Err(self.not_found(passphrase).await);
        }

        let cipher = self.cipher;
        let payload = record.payload.clone();
        let content = match run_blocking(move || cipher.decrypt(&payload, &passphrase)).await? {
            Ok(content) => content,
            Err(e) => {
                info!(key = key_hint(&key), "reveal rejected: cannot decrypt");
                return Err(e.into());
            }
        };

        let consumed = StoredRecord::from(&record.consumed());
        if let Err(e) = self
            .call_store(move |s| s.put(&consumed, VIEWED_TTL, PutCondition::Viewed(false)))
            .await
        {
            if e == StoreError::ConditionFailed {
                debug!(key = key_hint(&key), "lost reveal race");
            }
            return Err(e.into());
        }

        info!(
            key = key_hint(&key),
            is_password = record.is_password,
            "secret revealed and destroyed"
        );
        Ok(RevealResponse {
            content,
            is_password: record.is_password,
        })
    }

    /// `NotFound`, after the same key derivation a sealed record would have
    /// cost, so an unknown key and a wrong passphrase take as long as each
    /// other.
    async fn not_found(&self, passphrase: String) -> Error {
        if !passphrase.is_empty() {
            let cipher = self.cipher;
            let _ = run_blocking(move || cipher.derive_key(&passphrase, &[0u8; SALT_LEN])).await;
        }
        Error::NotFound
    }

    /// Run a store call on the blocking pool under the configured deadline.
    async fn call_store<T, F>(&self, op: F) -> std::result::Result<T, StoreError>
    where
        F: FnOnce(&dyn SecretStore) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || op(store.as_ref()));
        match time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Unavailable(format!("storage task failed: {e}"))),
            Err(_) => {
                warn!(timeout_ms = self.store_timeout.as_millis() as u64, "storage call timed out");
                Err(StoreError::Timeout)
            }
        }
    }
}

/// KDF work is slow on purpose; keep it off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("worker task failed: {e}")))
}

fn validate_create(request: &CreateRequest) -> Result<()> {
    if !(MIN_TTL_SECS..=MAX_TTL_SECS).contains(&request.ttl_seconds) {
        return Err(Error::Validation(format!(
            "ttl_seconds must be between {MIN_TTL_SECS} and {MAX_TTL_SECS}"
        )));
    }
    if request.content.is_empty() {
        return Err(Error::Validation("content must not be empty".into()));
    }
    if request.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(Error::Validation(format!(
            "content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(())
}

/// First few characters of a key; enough to correlate log lines without
/// writing a usable key to the log.
fn key_hint(key: &str) -> &str {
    key.char_indices().nth(4).map_or(key, |(i, _)| &key[..i])
}
