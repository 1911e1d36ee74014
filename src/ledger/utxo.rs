//! Unspent-output view used while scanning blocks.

use super::block::{Transaction, TxOut};
use crate::types::{Height, OutPoint};
use std::collections::HashMap;

/// An unspent output and the height it was created at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoEntry {
    pub output: TxOut,
    pub height: Height,
}

/// Transient outpoint -> output map.
#[derive(Clone, Debug, Default)]
pub struct UtxoView {
    entries: HashMap<OutPoint, UtxoEntry>,
}

impl UtxoView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every output of `tx`, claim-related or not.
    pub fn add_tx_outs(&mut self, tx: &Transaction, height: Height) {
        for (index, output) in tx.outputs().iter().enumerate() {
            self.entries.insert(
                tx.outpoint(index as u32),
                UtxoEntry {
                    output: output.clone(),
                    height,
                },
            );
        }
    }

    pub fn lookup(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    /// Remove and return the entry for `outpoint`.
    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        self.entries.remove(outpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
