//! Proof-of-Authority period arithmetic and header signatures
//!
//! Periods are fixed wall-clock windows: period `P` covers
//! `[P * period_secs, (P + 1) * period_secs)`. Headers are signed with
//! secp256k1 ECDSA (RFC 6979 deterministic nonces) over the header hash.

use super::entities::BlockHeader;
use crate::error::{MiningError, Result};
use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};

/// Period number containing `now`
pub fn period_number(now: u64, period_secs: u64) -> u64 {
    now / period_secs.max(1)
}

/// First second of `period`
pub fn period_start(period: u64, period_secs: u64) -> u64 {
    period.saturating_mul(period_secs.max(1))
}

/// First second of the period after the one containing `now`
pub fn next_boundary(now: u64, period_secs: u64) -> u64 {
    period_start(period_number(now, period_secs) + 1, period_secs)
}

/// Check if `period` may still be produced given the last produced period
pub fn period_is_open(last_produced: Option<u64>, period: u64) -> bool {
    last_produced.map_or(true, |last| period > last)
}

/// Load an authority key from raw 32-byte secret material
pub fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(bytes).map_err(|e| MiningError::Signing(e.to_string()))
}

/// Sign the header hash (64-byte r||s)
pub fn sign_header(key: &SigningKey, header: &BlockHeader) -> Vec<u8> {
    let signature: Signature = key.sign(header.hash().as_bytes());
    signature.to_bytes().to_vec()
}

/// Verify a header signature
pub fn verify_header(key: &VerifyingKey, header: &BlockHeader, signature: &[u8]) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(header.hash().as_bytes(), &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::{H256, U256};

    fn header() -> BlockHeader {
        BlockHeader {
            version: 1,
            height: 12,
            parent_hash: H256::repeat_byte(3),
            merkle_root: H256::repeat_byte(4),
            timestamp: 1_700_000_000,
            target: U256::MAX,
            nonce: 0,
        }
    }

    #[test]
    fn test_period_arithmetic() {
        assert_eq!(period_number(0, 60), 0);
        assert_eq!(period_number(59, 60), 0);
        assert_eq!(period_number(60, 60), 1);
        assert_eq!(period_start(3, 60), 180);
        assert_eq!(next_boundary(61, 60), 120);
        assert_eq!(next_boundary(120, 60), 180);
    }

    #[test]
    fn test_period_guard() {
        assert!(period_is_open(None, 0));
        assert!(period_is_open(Some(4), 5));
        assert!(!period_is_open(Some(5), 5));
        assert!(!period_is_open(Some(6), 5));
    }

    #[test]
    fn test_sign_verify_header() {
        let key = signing_key_from_bytes(&[0x11; 32]).unwrap();
        let header = header();
        let signature = sign_header(&key, &header);

        assert_eq!(signature.len(), 64);
        assert!(verify_header(key.verifying_key(), &header, &signature));
    }

    #[test]
    fn test_signature_bound_to_header() {
        let key = signing_key_from_bytes(&[0x11; 32]).unwrap();
        let signature = sign_header(&key, &header());

        let mut other = header();
        other.timestamp += 1;
        assert!(!verify_header(key.verifying_key(), &other, &signature));
        assert!(!verify_header(key.verifying_key(), &header(), &[0u8; 10]));
    }

    #[test]
    fn test_invalid_key_material() {
        assert!(matches!(
            signing_key_from_bytes(&[0u8; 32]),
            Err(MiningError::Signing(_))
        ));
    }
}
