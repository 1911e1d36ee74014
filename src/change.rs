//! Claim change records.
//!
//! A [`Change`] is one state transition of the claim trie. Changes are
//! produced by the extractor, grouped per height into a batch, persisted in
//! the change log and replayed in stored order.

use crate::types::{ClaimId, Height, OutPoint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of claim trie transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    AddClaim,
    UpdateClaim,
    SpendClaim,
    AddSupport,
    SpendSupport,
}

impl ChangeType {
    /// Spend-side changes come from consumed inputs.
    pub fn is_spend(self) -> bool {
        matches!(self, ChangeType::SpendClaim | ChangeType::SpendSupport)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::AddClaim => "AddClaim",
            ChangeType::UpdateClaim => "UpdateClaim",
            ChangeType::SpendClaim => "SpendClaim",
            ChangeType::AddSupport => "AddSupport",
            ChangeType::SpendSupport => "SpendSupport",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single claim trie transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Height of the block the transition belongs to.
    pub height: Height,

    pub change_type: ChangeType,

    /// Claimed name, the trie's lookup key.
    pub name: Vec<u8>,

    /// Output that carries (or carried) the claim or support.
    pub outpoint: OutPoint,

    pub claim_id: ClaimId,

    /// Zero for spends.
    pub amount: u64,
}

impl Change {
    pub fn new(
        height: Height,
        change_type: ChangeType,
        name: impl Into<Vec<u8>>,
        outpoint: OutPoint,
        claim_id: ClaimId,
        amount: u64,
    ) -> Self {
        Self {
            height,
            change_type,
            name: name.into(),
            outpoint,
            claim_id,
            amount,
        }
    }

    /// Name rendered for display (lossy for non-UTF-8 names).
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>7} {:<12} name: {:?}, outpoint: {}, id: {}",
            self.height,
            self.change_type,
            self.name_lossy(),
            self.outpoint,
            self.claim_id
        )?;
        if !self.change_type.is_spend() {
            write!(f, ", amount: {}", self.amount)?;
        }
        Ok(())
    }
}

/// Display-friendly form of a change (hex ids, text name).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub height: Height,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub name: String,
    pub outpoint: String,
    pub claim_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
}

impl ChangeSummary {
    pub fn from_change(change: &Change) -> Self {
        Self {
            height: change.height,
            change_type: change.change_type,
            name: change.name_lossy(),
            outpoint: change.outpoint.to_string(),
            claim_id: change.claim_id.to_hex(),
            amount: (!change.change_type.is_spend()).then_some(change.amount),
        }
    }
}
