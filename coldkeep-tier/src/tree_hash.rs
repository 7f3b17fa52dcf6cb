//! Archival tree hash.
//!
//! The cold tier requires a Merkle-style digest with every upload: the payload
//! is split into 1 MiB leaves, each leaf is SHA-256 hashed, and digests are
//! combined pairwise left to right (an unpaired last node is carried up
//! unchanged) until a single digest remains. Empty input hashes to
//! `SHA256("")`.
//!
//! [`TreeHasher`] computes the tree hash and the linear SHA-256 of the same
//! bytes in one pass. The result depends only on content, never on how the
//! caller slices its buffers.

use coldkeep_core::limits::TREE_HASH_CHUNK_BYTES;
use sha2::{Digest, Sha256};

/// Digests of one payload, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDigest {
    /// Tree hash over 1 MiB leaves.
    pub tree_hash: String,
    /// Plain SHA-256 over the whole payload.
    pub linear_sha256: String,
    /// Payload length in bytes.
    pub len: u64,
}

/// Incremental tree hash and linear digest computation.
#[derive(Debug, Clone, Default)]
pub struct TreeHasher {
    linear: Sha256,
    leaf: Sha256,
    leaf_len: usize,
    leaves: Vec<[u8; 32]>,
    len: u64,
}

impl TreeHasher {
    /// Creates an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes into both digests.
    pub fn update(&mut self, mut data: &[u8]) {
        self.linear.update(data);
        self.len += data.len() as u64;

        while !data.is_empty() {
            let take = (TREE_HASH_CHUNK_BYTES - self.leaf_len).min(data.len());
            self.leaf.update(&data[..take]);
            self.leaf_len += take;
            data = &data[take..];

            if self.leaf_len == TREE_HASH_CHUNK_BYTES {
                self.leaves.push(self.leaf.finalize_reset().into());
                self.leaf_len = 0;
            }
        }

        debug_assert!(self.leaf_len < TREE_HASH_CHUNK_BYTES);
    }

    /// Number of bytes fed so far.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if no bytes were fed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consumes the hasher and returns both digests.
    #[must_use]
    pub fn finalize(mut self) -> TreeDigest {
        if self.leaf_len > 0 || self.leaves.is_empty() {
            self.leaves.push(self.leaf.finalize().into());
        }

        TreeDigest {
            tree_hash: hex::encode(combine(self.leaves)),
            linear_sha256: hex::encode(self.linear.finalize()),
            len: self.len,
        }
    }
}

/// Reduces leaf digests to the root digest.
fn combine(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    assert!(!level.is_empty(), "tree hash needs at least one leaf");

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut hasher = Sha256::new();
                    hasher.update(left);
                    hasher.update(right);
                    hasher.finalize().into()
                }
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level[0]
}

/// Computes the hex tree hash of `bytes`.
#[must_use]
pub fn tree_hash(bytes: &[u8]) -> String {
    let mut hasher = TreeHasher::new();
    hasher.update(bytes);
    hasher.finalize().tree_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: usize = TREE_HASH_CHUNK_BYTES;

    fn sha(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn pair(left: [u8; 32], right: [u8; 32]) -> [u8; 32] {
        let mut joined = left.to_vec();
        joined.extend_from_slice(&right);
        sha(&joined)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_empty_input_is_sha256_of_empty() {
        assert_eq!(
            tree_hash(&[]),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_single_leaf_equals_linear() {
        let data = payload(1000);
        let mut hasher = TreeHasher::new();
        hasher.update(&data);
        let digest = hasher.finalize();
        assert_eq!(digest.tree_hash, digest.linear_sha256);
        assert_eq!(digest.len, 1000);
    }

    #[test]
    fn test_exactly_one_mib_is_one_leaf() {
        let data = payload(MIB);
        assert_eq!(tree_hash(&data), hex::encode(sha(&data)));
    }

    #[test]
    fn test_three_leaves_carry_unpaired_node() {
        let data = payload(2 * MIB + 10);
        let a = sha(&data[..MIB]);
        let b = sha(&data[MIB..2 * MIB]);
        let c = sha(&data[2 * MIB..]);
        let expected = pair(pair(a, b), c);
        assert_eq!(tree_hash(&data), hex::encode(expected));
    }

    #[test]
    fn test_four_leaves_balanced() {
        let data = payload(4 * MIB);
        let leaves: Vec<_> = data.chunks(MIB).map(sha).collect();
        let expected = pair(pair(leaves[0], leaves[1]), pair(leaves[2], leaves[3]));
        assert_eq!(tree_hash(&data), hex::encode(expected));
    }

    #[test]
    fn test_independent_of_caller_buffering() {
        let data = payload(3 * MIB + 777);
        let whole = tree_hash(&data);

        for piece in [1usize, 4096, 65_537, MIB - 1, MIB + 3] {
            let mut hasher = TreeHasher::new();
            for chunk in data.chunks(piece) {
                hasher.update(chunk);
            }
            let digest = hasher.finalize();
            assert_eq!(digest.tree_hash, whole, "piece size {piece}");
            assert_eq!(digest.linear_sha256, hex::encode(sha(&data)));
            assert_eq!(digest.len, data.len() as u64);
        }
    }

    #[test]
    fn test_empty_updates_change_nothing() {
        let mut hasher = TreeHasher::new();
        hasher.update(&[]);
        assert!(hasher.is_empty());
        hasher.update(b"abc");
        hasher.update(&[]);
        assert_eq!(hasher.len(), 3);
        assert_eq!(hasher.finalize().tree_hash, tree_hash(b"abc"));
    }
}
