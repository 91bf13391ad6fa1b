use serde::{Deserialize, Serialize};

use super::StoreError;

/// Payload written over a secret once it has been revealed.
pub const VIEWED_SENTINEL: &str = "Aaaaand it's gone.";

/// Secret content as held in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Stored in clear (no passphrase was given).
    Plain { secret: String },
    /// ChaCha20Poly1305 output. All fields are standard base64.
    Sealed {
        ciphertext: String,
        nonce: String,
        tag: String,
        salt: String,
    },
}

impl Payload {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Payload::Sealed { .. })
    }
}

/// A secret as the lifecycle manager sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub key: String,
    pub payload: Payload,
    /// Generated password rather than a free-text message.
    pub is_password: bool,
    pub viewed: bool,
}

impl SecretRecord {
    /// The consumed form of this record: sentinel payload, `viewed` set.
    pub fn consumed(&self) -> Self {
        Self {
            key: self.key.clone(),
            payload: Payload::Plain {
                secret: VIEWED_SENTINEL.to_owned(),
            },
            is_password: self.is_password,
            viewed: true,
        }
    }
}

/// Storage shape of a record. TTL is not part of it; stores carry expiry
/// out-of-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub secret: String,
    pub viewed: bool,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    pub pass: bool,
}

impl From<&SecretRecord> for StoredRecord {
    fn from(record: &SecretRecord) -> Self {
        let (secret, nonce, tag, salt) = match &record.payload {
            Payload::Plain { secret } => (secret.clone(), None, None, None),
            Payload::Sealed {
                ciphertext,
                nonce,
                tag,
                salt,
            } => (
                ciphertext.clone(),
                Some(nonce.clone()),
                Some(tag.clone()),
                Some(salt.clone()),
            ),
        };
        Self {
            key: record.key.clone(),
            secret,
            viewed: record.viewed,
            nonce,
            tag,
            salt,
            pass: record.is_password,
        }
    }
}

impl TryFrom<StoredRecord> for SecretRecord {
    type Error = StoreError;

    fn try_from(stored: StoredRecord) -> Result<Self, Self::Error> {
        let payload = match (stored.nonce, stored.tag, stored.salt) {
            (None, None, None) => Payload::Plain {
                secret: stored.secret,
            },
            (Some(nonce), Some(tag), Some(salt)) => Payload::Sealed {
                ciphertext: stored.secret,
                nonce,
                tag,
                salt,
            },
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "record {} carries a partial cipher envelope",
                    stored.key
                )))
            }
        };
        Ok(Self {
            key: stored.key,
            payload,
            is_password: stored.pass,
            viewed: stored.viewed,
        })
    }
}
