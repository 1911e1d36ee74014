//! Block scanning into ordered claim changes.

use crate::change::{Change, ChangeType};
use crate::error::{ChainError, Result};
use crate::ledger::script::{self, ClaimOpcode, ClaimScript};
use crate::ledger::{Block, Transaction, UtxoView};
use crate::types::{ClaimId, Height, OutPoint};
use tracing::trace;

/// Turns blocks into change batches.
///
/// Keeps one unspent-output view across the whole scan, so blocks must be
/// fed in strictly increasing, gapless height order.
#[derive(Debug, Default)]
pub struct Extractor {
    view: UtxoView,
    next_height: Height,
}

impl Extractor {
    /// Extractor expecting the genesis block first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a scan at `next_height` with a prepared view.
    pub fn resume(view: UtxoView, next_height: Height) -> Self {
        Self { view, next_height }
    }

    pub fn view(&self) -> &UtxoView {
        &self.view
    }

    pub fn next_height(&self) -> Height {
        self.next_height
    }

    /// Extract the changes of one block.
    ///
    /// For every transaction in block order, spend-side changes (from
    /// consumed inputs) come before creation-side changes (from produced
    /// outputs).
    pub fn extract(&mut self, block: &Block) -> Result<Vec<Change>> {
        let height = block.height();
        if height != self.next_height {
            return Err(ChainError::OutOfOrder {
                expected: self.next_height,
                got: height,
            });
        }

        let mut changes = Vec::new();
        for tx in &block.transactions {
            if tx.is_coinbase() {
                self.view.add_tx_outs(tx, height);
                continue;
            }
            self.spends(tx, height, &mut changes)?;
            self.view.add_tx_outs(tx, height);
            Self::creates(tx, height, &mut changes)?;
        }

        if !changes.is_empty() {
            trace!(height, changes = changes.len(), "extracted claim changes");
        }
        self.next_height = height + 1;
        Ok(changes)
    }

    fn spends(&mut self, tx: &Transaction, height: Height, changes: &mut Vec<Change>) -> Result<()> {
        for input in tx.inputs() {
            let outpoint = input.previous_output;
            let entry = self
                .view
                .spend(&outpoint)
                .ok_or(ChainError::MissingInput(outpoint))?;

            let claim = match script::decode(&entry.output.script)? {
                Some(claim) => claim,
                None => continue,
            };

            let (change_type, claim_id) = match claim.opcode {
                // The original claim never carried an explicit id
                ClaimOpcode::ClaimName => (ChangeType::SpendClaim, ClaimId::from_outpoint(&outpoint)),
                ClaimOpcode::UpdateClaim => (ChangeType::SpendClaim, embedded_id(&claim)?),
                ClaimOpcode::SupportClaim => (ChangeType::SpendSupport, embedded_id(&claim)?),
            };

            changes.push(Change::new(height, change_type, claim.name, outpoint, claim_id, 0));
        }
        Ok(())
    }

    fn creates(tx: &Transaction, height: Height, changes: &mut Vec<Change>) -> Result<()> {
        for (index, output) in tx.outputs().iter().enumerate() {
            let claim = match script::decode(&output.script)? {
                Some(claim) => claim,
                None => continue,
            };

            let outpoint = OutPoint::new(tx.txid(), index as u32);
            let (change_type, claim_id) = match claim.opcode {
                ClaimOpcode::ClaimName => (ChangeType::AddClaim, ClaimId::from_outpoint(&outpoint)),
                ClaimOpcode::UpdateClaim => (ChangeType::UpdateClaim, embedded_id(&claim)?),
                ClaimOpcode::SupportClaim => (ChangeType::AddSupport, embedded_id(&claim)?),
            };

            changes.push(Change::new(
                height,
                change_type,
                claim.name,
                outpoint,
                claim_id,
                output.value,
            ));
        }
        Ok(())
    }
}

fn embedded_id(claim: &ClaimScript) -> Result<ClaimId> {
    claim
        .claim_id
        .ok_or_else(|| ChainError::ScriptDecode("claim id missing".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BlockHeader, TxOut};
    use crate::types::Hash;

    fn block(height: Height, transactions: Vec<Transaction>) -> Block {
        Block::new(
            BlockHeader {
                height,
                prev_block: Hash::ZERO,
                claim_trie: Hash::ZERO,
            },
            transactions,
        )
    }

    fn claim_out(name: &str, value: u64) -> TxOut {
        TxOut::new(value, ClaimScript::claim_name(name, b"v".to_vec()).to_script(&[0x51]))
    }

    /// Genesis with a spendable coinbase, followed by a block creating a claim.
    fn funded() -> (Extractor, Transaction) {
        let coinbase = Transaction::coinbase(0, vec![TxOut::new(100, vec![0x51])]);
        let mut extractor = Extractor::new();
        let changes = extractor.extract(&block(0, vec![coinbase.clone()])).unwrap();
        assert!(changes.is_empty());
        (extractor, coinbase)
    }

    #[test]
    fn test_add_claim_derives_id_from_outpoint() {
        let (mut extractor, coinbase) = funded();
        let tx = Transaction::new(vec![coinbase.outpoint(0)], vec![claim_out("alice", 10)]);

        let changes = extractor.extract(&block(1, vec![tx.clone()])).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::AddClaim);
        assert_eq!(changes[0].name, b"alice");
        assert_eq!(changes[0].amount, 10);
        assert_eq!(changes[0].claim_id, ClaimId::from_outpoint(&tx.outpoint(0)));
    }

    #[test]
    fn test_spend_precedes_create_within_tx() {
        let (mut extractor, coinbase) = funded();
        let create = Transaction::new(vec![coinbase.outpoint(0)], vec![claim_out("alice", 10)]);
        extractor.extract(&block(1, vec![create.clone()])).unwrap();

        let id = ClaimId::from_outpoint(&create.outpoint(0));
        let update = TxOut::new(
            9,
            ClaimScript::update_claim("alice", id, b"v2".to_vec()).to_script(&[]),
        );
        let tx = Transaction::new(vec![create.outpoint(0)], vec![update]);

        let changes = extractor.extract(&block(2, vec![tx.clone()])).unwrap();
        let types: Vec<_> = changes.iter().map(|c| c.change_type).collect();
        assert_eq!(types, vec![ChangeType::SpendClaim, ChangeType::UpdateClaim]);

        // Spending an original claim re-derives its id
        assert_eq!(changes[0].claim_id, id);
        assert_eq!(changes[0].outpoint, create.outpoint(0));
        assert_eq!(changes[0].amount, 0);
        assert_eq!(changes[1].claim_id, id);
        assert_eq!(changes[1].outpoint, tx.outpoint(0));
    }

    #[test]
    fn test_support_spend_uses_embedded_id() {
        let (mut extractor, coinbase) = funded();
        let id = ClaimId([4u8; 20]);
        let support = TxOut::new(3, ClaimScript::support_claim("alice", id).to_script(&[]));
        let tx = Transaction::new(vec![coinbase.outpoint(0)], vec![support]);
        let changes = extractor.extract(&block(1, vec![tx.clone()])).unwrap();
        assert_eq!(changes[0].change_type, ChangeType::AddSupport);
        assert_eq!(changes[0].claim_id, id);

        let spend = Transaction::new(vec![tx.outpoint(0)], vec![TxOut::new(3, vec![])]);
        let changes = extractor.extract(&block(2, vec![spend])).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::SpendSupport);
        assert_eq!(changes[0].claim_id, id);
    }

    #[test]
    fn test_same_block_outputs_are_spendable() {
        let (mut extractor, coinbase) = funded();
        let create = Transaction::new(vec![coinbase.outpoint(0)], vec![claim_out("a", 5)]);
        let spend = Transaction::new(vec![create.outpoint(0)], vec![TxOut::new(5, vec![])]);

        let changes = extractor.extract(&block(1, vec![create, spend])).unwrap();
        let types: Vec<_> = changes.iter().map(|c| c.change_type).collect();
        assert_eq!(types, vec![ChangeType::AddClaim, ChangeType::SpendClaim]);
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let (mut extractor, _) = funded();
        let bogus = OutPoint::new(Hash::from_bytes(b"nowhere"), 0);
        let tx = Transaction::new(vec![bogus], vec![TxOut::new(1, vec![])]);

        let result = extractor.extract(&block(1, vec![tx]));
        assert!(matches!(result, Err(ChainError::MissingInput(op)) if op == bogus));
    }

    #[test]
    fn test_malformed_claim_output_is_fatal() {
        let (mut extractor, coinbase) = funded();
        let tx = Transaction::new(
            vec![coinbase.outpoint(0)],
            vec![TxOut::new(1, vec![script::OP_CLAIM_NAME, 0x05, b'a'])],
        );

        let result = extractor.extract(&block(1, vec![tx]));
        assert!(matches!(result, Err(ChainError::ScriptDecode(_))));
    }

    #[test]
    fn test_out_of_order_block_rejected() {
        let (mut extractor, _) = funded();
        let result = extractor.extract(&block(2, vec![]));
        assert!(matches!(
            result,
            Err(ChainError::OutOfOrder { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let (extractor, coinbase) = funded();
        let tx = Transaction::new(
            vec![coinbase.outpoint(0)],
            vec![claim_out("x", 1), TxOut::new(2, vec![]), claim_out("y", 3)],
        );
        let b = block(1, vec![tx]);

        let mut first = Extractor::resume(extractor.view().clone(), 1);
        let mut second = Extractor::resume(extractor.view().clone(), 1);
        assert_eq!(first.extract(&b).unwrap(), second.extract(&b).unwrap());
    }
}
