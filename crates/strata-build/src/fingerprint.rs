//! Content fingerprints for source units

use sha2::{Digest, Sha256};

/// SHA-256 of `content`, lower-case hex
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a source text
pub fn compute_fingerprint(text: &str) -> String {
    compute_hash(text.as_bytes())
}
