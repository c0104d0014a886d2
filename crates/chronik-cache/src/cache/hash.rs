//! Content hashing of the per-subject transaction order.
//!
//! The digest is a stable fingerprint of order only (not the records):
//! SHA-256 over the canonical JSON encoding of the txid sequence,
//! hex-encoded. It detects drift between a loaded view and the durable
//! header; no security property is claimed.

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Hashes a txid sequence into a lowercase hex digest.
///
/// JSON array encoding is canonical for a string sequence: element order
/// is significant and there is no whitespace variance with a fixed
/// serializer.
#[must_use]
pub fn hash_tx_order(tx_order: &[String]) -> String {
    let canonical =
        serde_json::to_vec(tx_order).expect("a string sequence always serializes");
    let digest = Sha256::digest(&canonical);

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
