//! Deterministic job fingerprints for deduplication.
//!
//! A fingerprint hashes only the semantically distinguishing inputs of a
//! job (source asset and prompt variation), never the full descriptor —
//! volatile fields like seed must not affect dedup. The fingerprint is
//! embedded into clip metadata as a tagged substring so future runs can
//! recognize already-materialized work.

use sha2::{Digest, Sha256};

use crate::defaults::{FINGERPRINT_MARKER, FINGERPRINT_WIDTH};

/// Short deterministic identifier for a job's distinguishing inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive a fingerprint from the distinguishing inputs of a job.
    ///
    /// `asset` is the source asset name (or a generation index for pure
    /// text-to-image jobs); `variation` is the overriding prompt text.
    /// Pure function: identical inputs always yield the same fingerprint.
    pub fn derive(asset: &str, variation: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(asset.as_bytes());
        hasher.update(b"\x1f"); // separator so ("ab","c") != ("a","bc")
        hasher.update(variation.as_bytes());
        let hash = hex::encode(hasher.finalize());
        Self(hash[..FINGERPRINT_WIDTH].to_string())
    }

    /// Reconstruct a fingerprint from its hex form (e.g. read from a ledger).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The hex form of this fingerprint.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tagged form embedded into clip metadata: `[bfp:<hex>]`.
    pub fn tag(&self) -> String {
        format!("[{}:{}]", FINGERPRINT_MARKER, self.0)
    }

    /// Extract an embedded fingerprint tag from free-form metadata text.
    ///
    /// Returns the first well-formed `[bfp:<hex>]` occurrence, if any.
    pub fn find_in(text: &str) -> Option<Self> {
        let open = format!("[{}:", FINGERPRINT_MARKER);
        let start = text.find(&open)? + open.len();
        let rest = &text[start..];
        let end = rest.find(']')?;
        let hex = &rest[..end];
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(hex.to_string()))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
