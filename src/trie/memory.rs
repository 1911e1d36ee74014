//! Deterministic in-memory claim trie.

use super::ClaimTrie;
use crate::error::{ChainError, Result};
use crate::frame;
use crate::types::{ClaimId, Hash, Height, OutPoint};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Commitment of a trie without claims.
pub const EMPTY_TRIE_HASH: Hash = Hash([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
]);

/// Magic bytes for trie checkpoints.
const CHECKPOINT_MAGIC: &[u8; 4] = b"TRI\0";

/// Current checkpoint format version.
const CHECKPOINT_VERSION: u8 = 1;

const CHECKPOINT_FILE: &str = "trie.ckpt";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ClaimEntry {
    outpoint: OutPoint,
    claim_id: ClaimId,
    amount: u64,
    accepted: Height,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SupportEntry {
    outpoint: OutPoint,
    claim_id: ClaimId,
    amount: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Node {
    claims: Vec<ClaimEntry>,
    supports: Vec<SupportEntry>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.claims.is_empty() && self.supports.is_empty()
    }

    fn support_for(&self, claim_id: &ClaimId) -> u64 {
        self.supports
            .iter()
            .filter(|s| &s.claim_id == claim_id)
            .fold(0u64, |total, s| total.saturating_add(s.amount))
    }

    /// Claims ranked by effective amount (own + supports), highest first.
    /// Ties go to the earlier acceptance height, then the lower outpoint.
    fn ranked(&self) -> Vec<ClaimInfo> {
        let mut claims: Vec<ClaimInfo> = self
            .claims
            .iter()
            .map(|c| ClaimInfo {
                claim_id: c.claim_id,
                outpoint: c.outpoint,
                amount: c.amount,
                effective_amount: c.amount.saturating_add(self.support_for(&c.claim_id)),
                accepted: c.accepted,
            })
            .collect();
        claims.sort_by(|a, b| {
            b.effective_amount
                .cmp(&a.effective_amount)
                .then(a.accepted.cmp(&b.accepted))
                .then(a.outpoint.cmp(&b.outpoint))
        });
        claims
    }

    fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        for claim in self.ranked() {
            hasher.update(claim.claim_id.0);
            hasher.update(claim.outpoint.txid.0);
            hasher.update(claim.outpoint.index.to_be_bytes());
            hasher.update(claim.effective_amount.to_be_bytes());
            hasher.update(claim.accepted.to_be_bytes());
        }
        Hash(hasher.finalize().into())
    }
}

/// Public view of a claim under a name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimInfo {
    pub claim_id: ClaimId,
    pub outpoint: OutPoint,
    pub amount: u64,
    /// Own amount plus all supports.
    pub effective_amount: u64,
    /// Height of the block that added the claim.
    pub accepted: Height,
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    height: Height,
    merkle: Hash,
    nodes: Vec<(Vec<u8>, Node)>,
}

/// Claim trie held in memory, optionally checkpointed to a directory on
/// [`ClaimTrie::close`].
pub struct MemoryClaimTrie {
    nodes: BTreeMap<Vec<u8>, Node>,
    height: Height,
    merkle: Hash,
    /// Claims spent since the last block; only these may be updated.
    spent_in_block: HashSet<ClaimId>,
    /// Mutations applied since the last block.
    dirty: bool,
    dir: Option<PathBuf>,
}

impl Default for MemoryClaimTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClaimTrie {
    /// Empty trie at height 0 with no backing directory.
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            height: 0,
            merkle: EMPTY_TRIE_HASH,
            spent_in_block: HashSet::new(),
            dirty: false,
            dir: None,
        }
    }

    /// Open a trie backed by `dir`, restoring its checkpoint if one exists.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut trie = Self::new();

        let path = dir.join(CHECKPOINT_FILE);
        if path.exists() {
            let mut reader = BufReader::new(File::open(&path)?);
            frame::read_header(&mut reader, CHECKPOINT_MAGIC, CHECKPOINT_VERSION)?;
            let (checkpoint, _) = frame::read_frame::<Checkpoint>(&mut reader)?
                .ok_or_else(|| ChainError::Corruption("empty trie checkpoint".into()))?;

            trie.nodes = checkpoint.nodes.into_iter().collect();
            trie.height = checkpoint.height;
            trie.merkle = trie.compute_hash();
            if trie.merkle != checkpoint.merkle {
                return Err(ChainError::HashMismatch {
                    height: checkpoint.height,
                    expected: checkpoint.merkle,
                    got: trie.merkle,
                });
            }
            debug!(height = trie.height, "restored trie checkpoint");
        }

        trie.dir = Some(dir);
        Ok(trie)
    }

    /// Claims under `name`, best first.
    pub fn claims(&self, name: &[u8]) -> Vec<ClaimInfo> {
        self.nodes.get(name).map(Node::ranked).unwrap_or_default()
    }

    /// The winning claim for `name`.
    pub fn best_claim(&self, name: &[u8]) -> Option<ClaimInfo> {
        self.claims(name).into_iter().next()
    }

    /// Number of names holding claims or supports.
    pub fn name_count(&self) -> usize {
        self.nodes.len()
    }

    fn compute_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        let mut any = false;
        for (name, node) in &self.nodes {
            if node.claims.is_empty() {
                continue;
            }
            any = true;
            hasher.update((name.len() as u32).to_be_bytes());
            hasher.update(name);
            hasher.update(node.hash().0);
        }
        if any {
            Hash(hasher.finalize().into())
        } else {
            EMPTY_TRIE_HASH
        }
    }

    fn write_checkpoint(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let checkpoint = Checkpoint {
            height: self.height,
            merkle: self.merkle,
            nodes: self
                .nodes
                .iter()
                .map(|(name, node)| (name.clone(), node.clone()))
                .collect(),
        };

        let mut writer = BufWriter::new(File::create(dir.join(CHECKPOINT_FILE))?);
        frame::write_header(&mut writer, CHECKPOINT_MAGIC, CHECKPOINT_VERSION)?;
        frame::write_frame(&mut writer, &checkpoint)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn remove_node_if_empty(&mut self, name: &[u8]) {
        if self.nodes.get(name).is_some_and(Node::is_empty) {
            self.nodes.remove(name);
        }
    }
}

fn claim_error(what: &str, name: &[u8], outpoint: &OutPoint) -> ChainError {
    ChainError::Claim(format!(
        "{} {:?} at {}",
        what,
        String::from_utf8_lossy(name),
        outpoint
    ))
}

impl ClaimTrie for MemoryClaimTrie {
    fn add_claim(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: u64,
        claim_id: ClaimId,
    ) -> Result<()> {
        if claim_id.is_zero() {
            return Err(claim_error("zero claim id for", name, &outpoint));
        }
        let accepted = self.height + 1;
        let node = self.nodes.entry(name.to_vec()).or_default();
        if node.claims.iter().any(|c| c.outpoint == outpoint) {
            return Err(claim_error("duplicate claim", name, &outpoint));
        }
        node.claims.push(ClaimEntry {
            outpoint,
            claim_id,
            amount,
            accepted,
        });
        self.dirty = true;
        Ok(())
    }

    fn update_claim(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: u64,
        claim_id: ClaimId,
    ) -> Result<()> {
        if !self.spent_in_block.contains(&claim_id) {
            return Err(ChainError::Claim(format!(
                "update of claim {} which was not spent in this block",
                claim_id
            )));
        }
        self.add_claim(name, outpoint, amount, claim_id)?;
        self.spent_in_block.remove(&claim_id);
        Ok(())
    }

    fn spend_claim(&mut self, name: &[u8], outpoint: OutPoint, claim_id: ClaimId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| claim_error("spend of unknown claim", name, &outpoint))?;
        let pos = node
            .claims
            .iter()
            .position(|c| c.outpoint == outpoint && c.claim_id == claim_id)
            .ok_or_else(|| claim_error("spend of unknown claim", name, &outpoint))?;

        node.claims.remove(pos);
        self.spent_in_block.insert(claim_id);
        self.dirty = true;
        self.remove_node_if_empty(name);
        Ok(())
    }

    fn add_support(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: u64,
        claim_id: ClaimId,
    ) -> Result<()> {
        if claim_id.is_zero() {
            return Err(claim_error("zero claim id for support", name, &outpoint));
        }
        let node = self.nodes.entry(name.to_vec()).or_default();
        if node.supports.iter().any(|s| s.outpoint == outpoint) {
            return Err(claim_error("duplicate support", name, &outpoint));
        }
        node.supports.push(SupportEntry {
            outpoint,
            claim_id,
            amount,
        });
        self.dirty = true;
        Ok(())
    }

    fn spend_support(&mut self, name: &[u8], outpoint: OutPoint, claim_id: ClaimId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| claim_error("spend of unknown support", name, &outpoint))?;
        let pos = node
            .supports
            .iter()
            .position(|s| s.outpoint == outpoint && s.claim_id == claim_id)
            .ok_or_else(|| claim_error("spend of unknown support", name, &outpoint))?;

        node.supports.remove(pos);
        self.dirty = true;
        self.remove_node_if_empty(name);
        Ok(())
    }

    fn append_block(&mut self) -> Result<()> {
        self.height += 1;
        self.spent_in_block.clear();
        self.dirty = false;
        self.merkle = self.compute_hash();
        Ok(())
    }

    fn height(&self) -> Height {
        self.height
    }

    fn merkle_hash(&self) -> Hash {
        self.merkle
    }

    fn close(&mut self) -> Result<()> {
        if self.dirty {
            return Err(ChainError::Claim(format!(
                "closing with changes pending above height {}",
                self.height
            )));
        }
        if let Some(dir) = &self.dir {
            self.write_checkpoint(dir)?;
            debug!(height = self.height, dir = %dir.display(), "wrote trie checkpoint");
        }
        Ok(())
    }
}
