use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Length of a generated public key.
pub const PUBLIC_KEY_LEN: usize = 24;

/// Length of a generated password.
pub const PASSWORD_LEN: usize = 12;

/// ASCII letters, digits and punctuation.
const PASSWORD_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
abcdefghijklmnopqrstuvwxyz\
0123456789\
!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Source of public keys and passwords.
///
/// Implementations must draw from a cryptographically secure source; the
/// manager treats whatever comes back as unguessable.
pub trait KeyGenerator: Send + Sync {
    fn generate_public_key(&self) -> String;
    fn generate_password(&self) -> String;
}

/// Default generator backed by the operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeyGenerator;

impl KeyGenerator for OsKeyGenerator {
    fn generate_public_key(&self) -> String {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(PUBLIC_KEY_LEN)
            .map(char::from)
            .collect()
    }

    fn generate_password(&self) -> String {
        (0..PASSWORD_LEN)
            .map(|_| char::from(PASSWORD_CHARSET[OsRng.gen_range(0..PASSWORD_CHARSET.len())]))
            .collect()
    }
}
