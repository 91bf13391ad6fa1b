//! Passphrase-based sealing of secret payloads.
//!
//! Keys come from Argon2id over the passphrase and a random per-record salt;
//! payloads are sealed with ChaCha20Poly1305 and the tag is kept detached so
//! nonce, tag, salt and ciphertext can each be stored as a text field.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::store::Payload;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const SALT_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Tag did not verify: wrong passphrase or tampered data.
    #[error("authentication failed")]
    Authentication,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("encryption failed")]
    Encryption,
}

/// 32-byte key derived from a passphrase.
#[derive(ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory in KiB.
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl KdfParams {
    /// Interactive profile: 19 MiB, 2 passes, 1 lane.
    pub const INTERACTIVE: Self = Self {
        m_cost: 19 * 1024,
        t_cost: 2,
        p_cost: 1,
    };
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::INTERACTIVE
    }
}

/// Seals and opens payloads. Holds no key material between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct CipherEngine {
    params: KdfParams,
}

impl CipherEngine {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    /// Derive a 32-byte key from `passphrase` and `salt` using Argon2id.
    pub fn derive_key(&self, passphrase: &str, salt: &[u8]) -> Result<DerivedKey, CryptoError> {
        let params = Params::new(
            self.params.m_cost,
            self.params.t_cost,
            self.params.p_cost,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::Kdf(format!("argon2 params: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_LEN];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::Kdf(format!("argon2 hash: {e}")))?;

        let derived = DerivedKey(key);
        key.zeroize();
        Ok(derived)
    }

    /// Seal `plaintext` under `passphrase`. An empty passphrase stores the
    /// text as-is.
    pub fn encrypt(&self, plaintext: &str, passphrase: &str) -> Result<Payload, CryptoError> {
        if passphrase.is_empty() {
            return Ok(Payload::Plain {
                secret: plaintext.to_owned(),
            });
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = self.derive_key(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buffer)
            .map_err(|_| CryptoError::Encryption)?;

        Ok(Payload::Sealed {
            ciphertext: STANDARD.encode(&buffer),
            nonce: STANDARD.encode(nonce_bytes),
            tag: STANDARD.encode(tag),
            salt: STANDARD.encode(salt),
        })
    }

    /// Open `payload` with `passphrase`. Plain payloads come back unchanged.
    ///
    /// Every failure on a sealed payload, malformed fields included, is
    /// reported as [`CryptoError::Authentication`].
    pub fn decrypt(&self, payload: &Payload, passphrase: &str) -> Result<String, CryptoError> {
        let (ciphertext, nonce, tag, salt) = match payload {
            Payload::Plain { secret } => return Ok(secret.clone()),
            Payload::Sealed {
                ciphertext,
                nonce,
                tag,
                salt,
            } => (ciphertext, nonce, tag, salt),
        };
        if passphrase.is_empty() {
            return Err(CryptoError::Authentication);
        }

        let nonce = decode_exact(nonce, NONCE_LEN)?;
        let tag = decode_exact(tag, TAG_LEN)?;
        let salt = decode_exact(salt, SALT_LEN)?;
        let mut buffer = STANDARD
            .decode(ciphertext)
            .map_err(|_| CryptoError::Authentication)?;

        let key = self.derive_key(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| CryptoError::Authentication)?;

        String::from_utf8(buffer).map_err(|_| CryptoError::Authentication)
    }
}

fn decode_exact(field: &str, len: usize) -> Result<Vec<u8>, CryptoError> {
    let bytes = STANDARD
        .decode(field)
        .map_err(|_| CryptoError::Authentication)?;
    if bytes.len() != len {
        return Err(CryptoError::Authentication);
    }
    Ok(bytes)
}
