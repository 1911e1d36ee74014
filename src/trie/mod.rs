//! Claim trie contract.
//!
//! The replay engine drives the trie only through [`ClaimTrie`]; any
//! implementation with a deterministic commitment can be plugged in.

mod memory;

pub use memory::{ClaimInfo, MemoryClaimTrie, EMPTY_TRIE_HASH};

use crate::error::Result;
use crate::types::{ClaimId, Hash, Height, OutPoint};

/// Mutation and commitment interface of the claim trie.
///
/// Mutations accumulate until [`ClaimTrie::append_block`] finalizes them as
/// the next block and recomputes the commitment hash. Not safe for concurrent
/// mutation; exactly one owner drives it.
pub trait ClaimTrie {
    fn add_claim(&mut self, name: &[u8], outpoint: OutPoint, amount: u64, claim_id: ClaimId)
        -> Result<()>;

    fn update_claim(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: u64,
        claim_id: ClaimId,
    ) -> Result<()>;

    fn spend_claim(&mut self, name: &[u8], outpoint: OutPoint, claim_id: ClaimId) -> Result<()>;

    fn add_support(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: u64,
        claim_id: ClaimId,
    ) -> Result<()>;

    fn spend_support(&mut self, name: &[u8], outpoint: OutPoint, claim_id: ClaimId)
        -> Result<()>;

    /// Finalize pending changes as the next block.
    fn append_block(&mut self) -> Result<()>;

    fn height(&self) -> Height;

    /// 32-byte commitment over the trie contents at [`ClaimTrie::height`].
    fn merkle_hash(&self) -> Hash;

    /// Release resources and persist whatever the implementation keeps.
    fn close(&mut self) -> Result<()>;
}
