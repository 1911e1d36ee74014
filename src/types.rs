//! Core identifier types shared by the ledger, the change log and the trie.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Block height.
pub type Height = u32;

/// 32-byte digest (SHA-256). Used for transaction ids, block links and the
/// claim trie commitment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// All-zero hash.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Double SHA-256.
    pub fn double(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        Hash(Sha256::digest(first).into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(arr))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Reference to one output of one transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }

    /// The null outpoint referenced by coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash::ZERO,
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutPoint({}:{})", &self.txid.to_hex()[..8], self.index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// Width of a claim identifier in bytes.
pub const CLAIM_ID_LEN: usize = 20;

/// Fixed-width claim identifier.
///
/// First-time claims derive their id from the creating outpoint; updates and
/// supports carry the id of the claim they refer to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct ClaimId(pub [u8; CLAIM_ID_LEN]);

impl ClaimId {
    /// Derive the id of a claim created at `outpoint`.
    pub fn from_outpoint(outpoint: &OutPoint) -> Self {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(&outpoint.txid.0);
        buf.extend_from_slice(&outpoint.index.to_be_bytes());
        let digest = Hash::double(&buf);

        let mut id = [0u8; CLAIM_ID_LEN];
        id.copy_from_slice(&digest.0[..CLAIM_ID_LEN]);
        ClaimId(id)
    }

    /// Copy an id embedded in a script. Returns `None` unless the slice has
    /// exactly the claim id width.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; CLAIM_ID_LEN] = bytes.try_into().ok()?;
        Some(ClaimId(arr))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; CLAIM_ID_LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClaimId({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = Hash::from_bytes(b"hello world");
        let parsed = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_claim_id_from_outpoint_is_stable() {
        let op = OutPoint::new(Hash::from_bytes(b"tx"), 1);
        let a = ClaimId::from_outpoint(&op);
        let b = ClaimId::from_outpoint(&op);
        assert_eq!(a, b);
        assert!(!a.is_zero());

        let other = ClaimId::from_outpoint(&OutPoint::new(op.txid, 2));
        assert_ne!(a, other);
    }

    #[test]
    fn test_claim_id_from_slice_checks_width() {
        assert!(ClaimId::from_slice(&[7u8; CLAIM_ID_LEN]).is_some());
        assert!(ClaimId::from_slice(&[7u8; 19]).is_none());
        assert!(ClaimId::from_slice(&[7u8; 32]).is_none());
    }

    #[test]
    fn test_null_outpoint() {
        assert!(OutPoint::null().is_null());
        assert!(!OutPoint::new(Hash::ZERO, 0).is_null());
    }
}
