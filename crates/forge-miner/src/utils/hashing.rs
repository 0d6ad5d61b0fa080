//! Hashing utilities shared by the template builder and the miners
//!
//! Transaction ids, merkle roots, PoW hashes and stake kernels all use
//! double SHA-256 (Bitcoin-style).

use primitive_types::{H256, U256};
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of data
#[inline]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute double SHA-256 hash
#[inline]
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Double SHA-256 as an `H256`
#[inline]
pub fn hash256(data: &[u8]) -> H256 {
    H256::from(sha256d(data))
}

/// Interpret hash bytes as a big-endian `U256`
#[inline]
pub fn hash_to_u256(hash: &H256) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}

/// Check if hash meets target (hash <= target)
#[inline]
pub fn meets_target(hash: &H256, target: U256) -> bool {
    hash_to_u256(hash) <= target
}

/// Merkle root over an ordered list of leaf hashes
///
/// A level with an odd count pairs its last node with itself. An empty list
/// yields the zero hash.
pub fn merkle_root(leaves: &[H256]) -> H256 {
    if leaves.is_empty() {
        return H256::zero();
    }

    let mut level: Vec<H256> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(&last) = level.last() {
                level.push(last);
            }
        }
        level = level
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    level[0]
}

fn hash_pair(left: &H256, right: &H256) -> H256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    hash256(&buf)
}

/// Short hex prefix for log lines
pub fn short_hex(hash: &H256) -> String {
    hex::encode(&hash.as_bytes()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256d_double_hash() {
        let data = b"test";
        assert_eq!(sha256d(data), sha256(&sha256(data)));
    }

    #[test]
    fn test_meets_target() {
        let zero = H256::zero();
        assert!(meets_target(&zero, U256::zero()));

        let max = H256::repeat_byte(0xFF);
        assert!(meets_target(&max, U256::MAX));
        assert!(!meets_target(&max, U256::from(1)));
    }

    #[test]
    fn test_merkle_root_single_leaf_is_leaf() {
        let leaf = hash256(b"coinbase");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_merkle_root_order_sensitive() {
        let a = hash256(b"a");
        let b = hash256(b"b");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn test_merkle_root_odd_level_duplicates_last() {
        let a = hash256(b"a");
        let b = hash256(b"b");
        let c = hash256(b"c");
        let ab = merkle_root(&[a, b]);
        let cc = merkle_root(&[c, c]);

        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[ab, cc]));
        // A promoted odd node would make these collide
        assert_ne!(merkle_root(&[a, b, c]), merkle_root(&[ab, c]));
    }

    #[test]
    fn test_empty_merkle_root() {
        assert_eq!(merkle_root(&[]), H256::zero());
    }
}
