//! Synthetic ledger construction.
//!
//! [`ChainBuilder`] assembles blocks out of claim operations and stamps each
//! header with the commitment of a reference trie that received the same
//! operations directly, so a correct extract + replay must reproduce every
//! header hash.

use super::block::{Block, BlockHeader, Transaction, TxOut};
use super::script::ClaimScript;
use crate::error::{ChainError, Result};
use crate::trie::{ClaimTrie, MemoryClaimTrie};
use crate::types::{ClaimId, Hash, Height, OutPoint};

/// Value of each coinbase output.
const COINBASE_VALUE: u64 = 5_000_000_000;

/// Plain pay-to script used for non-claim outputs.
const PAYEE: &[u8] = &[0x76, 0xa9, 0x88, 0xac];

/// Builds a block sequence starting with a funded genesis block.
pub struct ChainBuilder {
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
    /// Spendable plain outputs and their values.
    funds: Vec<(OutPoint, u64)>,
    trie: MemoryClaimTrie,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainBuilder {
    /// Builder holding a sealed genesis block.
    pub fn new() -> Self {
        let mut builder = Self {
            blocks: Vec::new(),
            pending: Vec::new(),
            funds: Vec::new(),
            trie: MemoryClaimTrie::new(),
        };
        builder.seal_genesis();
        builder
    }

    /// Height the next sealed block will have.
    pub fn next_height(&self) -> Height {
        self.blocks.len() as Height
    }

    /// Create a claim for `name`. Returns the claim's outpoint.
    pub fn claim(&mut self, name: &str, amount: u64) -> Result<OutPoint> {
        let script = ClaimScript::claim_name(name, format!("{}-meta", name)).to_script(PAYEE);
        let outpoint = self.fund(amount, script)?;
        self.trie
            .add_claim(name.as_bytes(), outpoint, amount, ClaimId::from_outpoint(&outpoint))?;
        Ok(outpoint)
    }

    /// Support `claim_id` under `name`. Returns the support's outpoint.
    pub fn support(&mut self, name: &str, claim_id: ClaimId, amount: u64) -> Result<OutPoint> {
        let script = ClaimScript::support_claim(name, claim_id).to_script(PAYEE);
        let outpoint = self.fund(amount, script)?;
        self.trie
            .add_support(name.as_bytes(), outpoint, amount, claim_id)?;
        Ok(outpoint)
    }

    /// Spend the claim at `claim` and re-create it with a new amount.
    pub fn update(
        &mut self,
        claim: OutPoint,
        name: &str,
        claim_id: ClaimId,
        amount: u64,
    ) -> Result<OutPoint> {
        let script =
            ClaimScript::update_claim(name, claim_id, format!("{}-v2", name)).to_script(PAYEE);
        let tx = Transaction::new(vec![claim], vec![TxOut::new(amount, script)]);
        let outpoint = tx.outpoint(0);

        self.trie.spend_claim(name.as_bytes(), claim, claim_id)?;
        self.trie
            .update_claim(name.as_bytes(), outpoint, amount, claim_id)?;
        self.pending.push(tx);
        Ok(outpoint)
    }

    /// Spend a claim output into a plain output.
    pub fn abandon_claim(&mut self, claim: OutPoint, name: &str, claim_id: ClaimId) -> Result<()> {
        self.trie.spend_claim(name.as_bytes(), claim, claim_id)?;
        self.spend_to_plain(claim);
        Ok(())
    }

    /// Spend a support output into a plain output.
    pub fn abandon_support(
        &mut self,
        support: OutPoint,
        name: &str,
        claim_id: ClaimId,
    ) -> Result<()> {
        self.trie
            .spend_support(name.as_bytes(), support, claim_id)?;
        self.spend_to_plain(support);
        Ok(())
    }

    /// A transaction without claim activity.
    pub fn transfer(&mut self, amount: u64) -> Result<OutPoint> {
        self.fund(amount, PAYEE.to_vec())
    }

    /// Close the pending block and return its height.
    pub fn seal(&mut self) -> Result<Height> {
        self.trie.append_block()?;
        let height = self.next_height();

        let coinbase = Transaction::coinbase(height, vec![TxOut::new(COINBASE_VALUE, PAYEE.to_vec())]);
        self.funds.push((coinbase.outpoint(0), COINBASE_VALUE));

        let mut transactions = vec![coinbase];
        transactions.append(&mut self.pending);
        self.push_block(transactions);
        Ok(height)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    /// Commitment declared by the header at `height`.
    pub fn commitment(&self, height: Height) -> Option<Hash> {
        self.blocks
            .get(height as usize)
            .map(|b| b.header.claim_trie)
    }

    fn seal_genesis(&mut self) {
        let coinbase = Transaction::coinbase(0, vec![TxOut::new(COINBASE_VALUE, PAYEE.to_vec())]);
        self.funds.push((coinbase.outpoint(0), COINBASE_VALUE));
        self.push_block(vec![coinbase]);
    }

    fn push_block(&mut self, transactions: Vec<Transaction>) {
        let prev_block = self.blocks.last().map(Block::hash).unwrap_or(Hash::ZERO);
        let header = BlockHeader {
            height: self.blocks.len() as Height,
            prev_block,
            claim_trie: self.trie.merkle_hash(),
        };
        self.blocks.push(Block::new(header, transactions));
    }

    /// Spend one funding output into `script` carrying `amount`, returning
    /// the change to the funding pool.
    fn fund(&mut self, amount: u64, script: Vec<u8>) -> Result<OutPoint> {
        let pos = self
            .funds
            .iter()
            .position(|(_, value)| *value >= amount)
            .ok_or_else(|| ChainError::InvalidRange(format!("no funding output covers {}", amount)))?;
        let (input, value) = self.funds.remove(pos);

        let tx = Transaction::new(
            vec![input],
            vec![
                TxOut::new(amount, script),
                TxOut::new(value - amount, PAYEE.to_vec()),
            ],
        );
        self.funds.push((tx.outpoint(1), value - amount));
        let outpoint = tx.outpoint(0);
        self.pending.push(tx);
        Ok(outpoint)
    }

    fn spend_to_plain(&mut self, outpoint: OutPoint) {
        let tx = Transaction::new(vec![outpoint], vec![TxOut::new(0, PAYEE.to_vec())]);
        self.pending.push(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::EMPTY_TRIE_HASH;

    #[test]
    fn test_genesis_is_empty_trie() {
        let builder = ChainBuilder::new();
        assert_eq!(builder.blocks().len(), 1);
        assert_eq!(builder.commitment(0), Some(EMPTY_TRIE_HASH));
        assert_eq!(builder.next_height(), 1);
    }

    #[test]
    fn test_blocks_link_and_commit() {
        let mut builder = ChainBuilder::new();
        builder.claim("alice", 10).unwrap();
        assert_eq!(builder.seal().unwrap(), 1);
        builder.transfer(5).unwrap();
        builder.seal().unwrap();

        let blocks = builder.blocks();
        assert_eq!(blocks[1].header.prev_block, blocks[0].hash());
        assert_ne!(blocks[1].header.claim_trie, EMPTY_TRIE_HASH);
        // No claim activity keeps the commitment
        assert_eq!(blocks[2].header.claim_trie, blocks[1].header.claim_trie);
        assert!(blocks[1].transactions[0].is_coinbase());
    }

    #[test]
    fn test_invalid_operation_is_rejected() {
        let mut builder = ChainBuilder::new();
        let op = OutPoint::new(Hash::from_bytes(b"nope"), 0);
        assert!(builder
            .abandon_claim(op, "alice", ClaimId::from_outpoint(&op))
            .is_err());
    }
}
