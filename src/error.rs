//! Error types for change extraction, the change log and replay.

use crate::types::{Hash, Height, OutPoint};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No change batch was ever saved for this height.
    #[error("Change batch not found for height {0}")]
    BatchNotFound(Height),

    /// A height above the converted range was requested.
    #[error("Height {height} is beyond the converted range (converted up to {converted})")]
    BeyondConverted { height: Height, converted: Height },

    #[error("Change for height {change} saved in batch for height {batch}")]
    BatchHeightMismatch { batch: Height, change: Height },

    #[error("Block not found at height {0}")]
    BlockNotFound(Height),

    /// Claim-shaped script that could not be parsed.
    #[error("Malformed claim script: {0}")]
    ScriptDecode(String),

    /// An input refers to an output that is not in the unspent view.
    #[error("Missing input in view for {0}")]
    MissingInput(OutPoint),

    #[error("Block out of order: expected height {expected}, got {got}")]
    OutOfOrder { expected: Height, got: Height },

    /// The claim trie rejected an operation.
    #[error("Claim trie: {0}")]
    Claim(String),

    #[error("Commitment hash mismatch at height {height}: expected {expected}, got {got}")]
    HashMismatch {
        height: Height,
        expected: Hash,
        got: Hash,
    },

    #[error("Invalid height range: {0}")]
    InvalidRange(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    /// Opening without create found no change log.
    #[error("No change log at {0}")]
    StoreMissing(PathBuf),

    /// A pipeline stage died without reporting a result.
    #[error("Pipeline stage '{0}' panicked")]
    StagePanicked(&'static str),
}

impl From<rmp_serde::encode::Error> for ChainError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ChainError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ChainError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ChainError::Deserialization(e.to_string())
    }
}

impl ChainError {
    /// True for the distinguished not-found condition of the change log.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChainError::BatchNotFound(_))
    }
}

/// Result type for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;
