//! HMAC-SHA256 signing over the canonical encoding of a fence.

use crate::error::{FenceError, FenceResult};
use crate::types::{FenceRating, FenceType};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Domain tag prepended to every canonical encoding. Bump on wire changes.
pub const CANONICAL_DOMAIN: &str = "prompt-fence/v1";

/// Length of a decoded signature in bytes.
pub const SIGNATURE_LEN: usize = 32;

/// Injective byte encoding of the signed fields.
///
/// Each field is written as an 8-byte big-endian length followed by its
/// UTF-8 bytes, so no two field tuples share an encoding.
pub fn canonical_bytes(
    content: &str,
    fence_type: FenceType,
    rating: FenceRating,
    source: &str,
    timestamp: &str,
) -> Vec<u8> {
    let fields: [&str; 6] = [
        CANONICAL_DOMAIN,
        fence_type.as_str(),
        rating.as_str(),
        source,
        timestamp,
        content,
    ];
    let total: usize = fields.iter().map(|f| 8 + f.len()).sum();
    let mut out = Vec::with_capacity(total);
    for field in fields {
        out.extend_from_slice(&(field.len() as u64).to_be_bytes());
        out.extend_from_slice(field.as_bytes());
    }
    out
}

/// A named HMAC secret.
#[derive(Clone)]
pub struct SigningKey {
    id: String,
    secret: Vec<u8>,
}

impl SigningKey {
    pub fn new(id: impl Into<String>, secret: impl Into<Vec<u8>>) -> FenceResult<Self> {
        let id = id.into();
        let secret = secret.into();
        if id.is_empty() {
            return Err(FenceError::config("key id must not be empty"));
        }
        if id.contains(|c: char| c == '"' || c == '<' || c == '>' || c == '&') {
            return Err(FenceError::config(format!(
                "key id '{}' contains a reserved character",
                id
            )));
        }
        if secret.is_empty() {
            return Err(FenceError::config(format!("key '{}' has an empty secret", id)));
        }
        Ok(Self { id, secret })
    }

    /// Decode a hex-encoded secret.
    pub fn from_hex(id: impl Into<String>, secret_hex: &str) -> FenceResult<Self> {
        let secret = hex::decode(secret_hex.trim())?;
        Self::new(id, secret)
    }

    /// Identifier carried in the `kid` attribute.
    pub fn id(&self) -> &str {
        &self.id
    }

    fn mac(&self, canonical: &[u8]) -> FenceResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| FenceError::config(format!("invalid key '{}': {}", self.id, e)))?;
        mac.update(canonical);
        Ok(mac)
    }

    /// Hex-encoded tag over `canonical`.
    pub fn sign_bytes(&self, canonical: &[u8]) -> FenceResult<String> {
        Ok(hex::encode(self.mac(canonical)?.finalize().into_bytes()))
    }

    /// Constant-time check of a decoded tag against `canonical`.
    pub fn verify_bytes(&self, canonical: &[u8], tag: &[u8]) -> bool {
        match self.mac(canonical) {
            Ok(mac) => {
                let expected = mac.finalize().into_bytes();
                if expected.len() != tag.len() {
                    return false;
                }
                expected.as_slice().ct_eq(tag).into()
            }
            Err(_) => false,
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One active signing key plus retired keys still accepted for verification.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: Vec<SigningKey>,
    active: usize,
}

impl KeyRing {
    /// Ring whose only key is `active`.
    pub fn new(active: SigningKey) -> Self {
        Self {
            keys: vec![active],
            active: 0,
        }
    }

    /// Ring with no keys; signing and verifier construction fail until one is added.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a verification-only key. Replaces a retired key with the same id;
    /// a key named like the active key is ignored.
    pub fn with_retired(mut self, key: SigningKey) -> Self {
        if self.keys.is_empty() {
            self.keys.push(key);
            self.active = 0;
            return self;
        }
        match self.position(key.id()) {
            Some(i) if i == self.active => {}
            Some(i) => self.keys[i] = key,
            None => self.keys.push(key),
        }
        self
    }

    /// Install `key` as the signing key, keeping the previous one for verification.
    pub fn rotate(&mut self, key: SigningKey) {
        match self.position(key.id()) {
            Some(i) => {
                self.keys[i] = key;
                self.active = i;
            }
            None => {
                self.keys.push(key);
                self.active = self.keys.len() - 1;
            }
        }
    }

    /// The signing key, if any.
    pub fn active(&self) -> Option<&SigningKey> {
        self.keys.get(self.active)
    }

    /// Active or retired key named `id`.
    pub fn get(&self, id: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.id() == id)
    }

    /// Number of keys, active included.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Ids of every key, active first.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.id())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.id() == id)
    }

    /// Sign the fields with the active key, returning `(key_id, signature)`.
    pub fn sign(
        &self,
        content: &str,
        fence_type: FenceType,
        rating: FenceRating,
        source: &str,
        timestamp: &str,
    ) -> FenceResult<(String, String)> {
        let key = self
            .active()
            .ok_or_else(|| FenceError::config("no signing key configured"))?;
        let canonical = canonical_bytes(content, fence_type, rating, source, timestamp);
        Ok((key.id().to_string(), key.sign_bytes(&canonical)?))
    }

    /// Check a hex signature over `canonical`.
    ///
    /// With `key_id` only that key is tried; otherwise every key in the ring.
    /// Returns the id of the matching key.
    pub fn verify(
        &self,
        canonical: &[u8],
        signature_hex: &str,
        key_id: Option<&str>,
    ) -> FenceResult<String> {
        let tag = hex::decode(signature_hex)
            .map_err(|_| FenceError::mismatch("signature is not valid hex"))?;
        if tag.len() != SIGNATURE_LEN {
            return Err(FenceError::mismatch(format!(
                "signature is {} bytes, expected {}",
                tag.len(),
                SIGNATURE_LEN
            )));
        }

        match key_id {
            Some(id) => {
                let key = self
                    .get(id)
                    .ok_or_else(|| FenceError::mismatch(format!("unknown key id '{}'", id)))?;
                if key.verify_bytes(canonical, &tag) {
                    Ok(key.id().to_string())
                } else {
                    Err(FenceError::mismatch("signature does not match fence contents"))
                }
            }
            None => {
                // Every key is checked so timing does not reveal which one matched.
                let mut matched: Option<&SigningKey> = None;
                for key in &self.keys {
                    if key.verify_bytes(canonical, &tag) && matched.is_none() {
                        matched = Some(key);
                    }
                }
                matched
                    .map(|k| k.id().to_string())
                    .ok_or_else(|| FenceError::mismatch("signature does not match fence contents"))
            }
        }
    }
}
