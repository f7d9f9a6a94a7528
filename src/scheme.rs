//! Password storage schemes.
//!
//! Stored values may carry a `{SCHEME}` prefix. The engine only needs to
//! know whether a value is in a recognized encoding, to verify a candidate
//! against a stored value and to hash cleartext on write.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use subtle::ConstantTimeEq;

use crate::error::PolicyResult;

/// The reversible encoding that still allows quality checks.
pub const CLEARTEXT: &str = "CLEARTEXT";

/// Salted SHA-256: `{SSHA256}` followed by base64 of digest then salt.
pub const SSHA256: &str = "SSHA256";

const SALT_LEN: usize = 8;
const DIGEST_LEN: usize = 32;

pub trait PasswordSchemes: Send + Sync {
    /// Whether `scheme` (without braces, any case) is a registered encoding.
    fn is_known(&self, scheme: &str) -> bool;

    /// Checks a candidate plaintext against one stored value.
    fn verify(&self, stored: &[u8], candidate: &[u8]) -> bool;

    /// Encodes a cleartext value for storage.
    fn hash(&self, plaintext: &[u8]) -> PolicyResult<Vec<u8>>;
}

/// Name of the `{SCHEME}` prefix of `value`, if it has one.
pub fn scheme_prefix(value: &[u8]) -> Option<&str> {
    if value.first() != Some(&b'{') {
        return None;
    }
    let end = value.iter().position(|&b| b == b'}')?;
    std::str::from_utf8(&value[1..end]).ok()
}

/// The recognized scheme of `value`, or `None` for unencoded values.
pub fn scheme_of<'a>(schemes: &dyn PasswordSchemes, value: &'a [u8]) -> Option<&'a str> {
    scheme_prefix(value).filter(|s| schemes.is_known(s))
}

/// Strips a `{CLEARTEXT}` prefix. Other encoded values yield `None`.
pub fn checkable_plaintext<'a>(schemes: &dyn PasswordSchemes, value: &'a [u8]) -> Option<&'a [u8]> {
    match scheme_of(schemes, value) {
        None => Some(value),
        Some(s) if s.eq_ignore_ascii_case(CLEARTEXT) => Some(&value[s.len() + 2..]),
        Some(_) => None,
    }
}

/// Constant-time byte comparison.
pub fn bytes_equal(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

fn ssha256_digest(plaintext: &[u8], salt: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(plaintext);
    hasher.update(salt);
    hasher.finalize().into()
}

fn verify_ssha256(encoded: &[u8], candidate: &[u8]) -> bool {
    let Ok(raw) = BASE64.decode(encoded) else {
        return false;
    };
    if raw.len() <= DIGEST_LEN {
        return false;
    }
    let (digest, salt) = raw.split_at(DIGEST_LEN);
    bytes_equal(digest, &ssha256_digest(candidate, salt))
}

/// Knows `{CLEARTEXT}`, hashes with `{SSHA256}`, and accepts any names
/// registered with [`DefaultSchemes::with_scheme`].
///
/// Values in other registered schemes cannot be verified here; an embedder
/// with support for them supplies its own [`PasswordSchemes`].
#[derive(Debug, Clone)]
pub struct DefaultSchemes {
    known: BTreeSet<String>,
}

impl Default for DefaultSchemes {
    fn default() -> Self {
        let mut known = BTreeSet::new();
        known.insert(CLEARTEXT.to_string());
        known.insert(SSHA256.to_string());
        Self { known }
    }
}

impl DefaultSchemes {
    pub fn with_scheme(mut self, name: &str) -> Self {
        self.known.insert(name.to_ascii_uppercase());
        self
    }
}

impl PasswordSchemes for DefaultSchemes {
    fn is_known(&self, scheme: &str) -> bool {
        self.known.contains(&scheme.to_ascii_uppercase())
    }

    fn verify(&self, stored: &[u8], candidate: &[u8]) -> bool {
        if let Some(s) = scheme_of(self, stored).filter(|s| s.eq_ignore_ascii_case(SSHA256)) {
            return verify_ssha256(&stored[s.len() + 2..], candidate);
        }
        match checkable_plaintext(self, stored) {
            Some(plain) => bytes_equal(plain, candidate),
            None => false,
        }
    }

    fn hash(&self, plaintext: &[u8]) -> PolicyResult<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut raw = ssha256_digest(plaintext, &salt).to_vec();
        raw.extend_from_slice(&salt);
        Ok(format!("{{{}}}{}", SSHA256, BASE64.encode(raw)).into_bytes())
    }
}
