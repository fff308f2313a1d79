use std::borrow::Cow;
use std::fmt::Debug;

use hmac::{Hmac, Mac};
use itertools::Itertools;
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const GENERATED_KEY_LENGTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum HmacKeyError {
    #[error("hmac key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("hmac key must not be empty")]
    Empty,
    #[error("hmac key has an invalid length")]
    InvalidLength
}

/// Secret used to redact identifiers. The keyed state is computed once and cloned for
/// every identifier.
#[derive(Clone)]
pub struct HmacKey {
    mac: HmacSha256
}

impl HmacKey {
    pub fn new(secret: &[u8]) -> Result<HmacKey, HmacKeyError> {
        if secret.is_empty() {
            return Err(HmacKeyError::Empty);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| HmacKeyError::InvalidLength)?;
        Ok(HmacKey { mac })
    }

    pub fn from_hex(secret: &str) -> Result<HmacKey, HmacKeyError> {
        HmacKey::new(&hex::decode(secret.trim())?)
    }

    pub fn generate() -> HmacKey {
        let mut secret = [0u8; GENERATED_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut secret);
        HmacKey { mac: HmacSha256::new_from_slice(&secret).unwrap_or_else(|_| unreachable!()) }
    }

    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl Debug for HmacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HmacKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Default)]
pub enum Redaction {
    #[default]
    None,
    Hmac(HmacKey)
}

impl Redaction {
    // Dotted paths are redacted per component so the nesting stays visible
    pub fn redact_path<'a>(&self, path: &'a str) -> Cow<'a, str> {
        match self {
            Redaction::None => Cow::Borrowed(path),
            Redaction::Hmac(key) => Cow::Owned(path.split('.').map(|c| key.sign(c.as_bytes())).join("."))
        }
    }
}
