//! Period seals.
//!
//! A closed period is sealed by storing the Merkle root of its rows.
//! Recomputing the root later shows whether anything rewrote the period
//! after it closed.

use sha2::{Digest, Sha256};

/// Hashes one stored bucket row into a Merkle leaf.
///
/// The magnitude is hashed by its bit pattern so the digest never depends
/// on float formatting.
pub fn row_leaf(
    granularity: &str,
    period_key: &str,
    category: &str,
    count: i64,
    total_magnitude: f64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(granularity.as_bytes());
    hasher.update(b"|");
    hasher.update(period_key.as_bytes());
    hasher.update(b"|");
    hasher.update(category.as_bytes());
    hasher.update(b"|");
    hasher.update(count.to_be_bytes());
    hasher.update(total_magnitude.to_bits().to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Build a Merkle tree from a list of hashes and return the root.
pub fn build_merkle_root(hashes: &[String]) -> Option<String> {
    if hashes.is_empty() {
        return None;
    }

    let mut current_level: Vec<String> = hashes.to_vec();

    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|chunk| match chunk {
                [left, right] => hash_pair(left, right),
                // Odd number of hashes: duplicate the last one
                [last] => hash_pair(last, last),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }

    current_level.pop()
}

fn hash_pair(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

/// A sealed period whose rows no longer match the stored digest.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SealMismatch {
    pub granularity: String,
    pub period_key: String,
    pub expected: String,
    pub actual: Option<String>,
}
