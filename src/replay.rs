//! Deterministic replay of the change log into a claim trie.
//!
//! Each step loads the batch for the next height, applies it in stored
//! order, appends a block to the trie and compares the resulting commitment
//! with the one the canonical block header declares. The first mismatch
//! stops the replay.

use crate::change::{Change, ChangeType};
use crate::changelog::{BatchLookup, ChangeLogStore};
use crate::config::ReplayConfig;
use crate::error::{ChainError, Result};
use crate::ledger::BlockSource;
use crate::trie::ClaimTrie;
use crate::types::{Hash, Height};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Apply one change to the trie through the operation matching its type.
pub fn apply_change(trie: &mut dyn ClaimTrie, change: &Change) -> Result<()> {
    let name = change.name.as_slice();
    match change.change_type {
        ChangeType::AddClaim => {
            trie.add_claim(name, change.outpoint, change.amount, change.claim_id)
        }
        ChangeType::UpdateClaim => {
            trie.update_claim(name, change.outpoint, change.amount, change.claim_id)
        }
        ChangeType::SpendClaim => trie.spend_claim(name, change.outpoint, change.claim_id),
        ChangeType::AddSupport => {
            trie.add_support(name, change.outpoint, change.amount, change.claim_id)
        }
        ChangeType::SpendSupport => trie.spend_support(name, change.outpoint, change.claim_id),
    }
}

/// Outcome of a verified replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplaySummary {
    pub from: Height,
    pub to: Height,
    pub changes_applied: u64,
    /// Commitment at `to`, equal to the header's.
    pub final_hash: Hash,
}

/// Rebuilds trie state from a change log and checks it against block headers.
pub struct Replayer<'a> {
    store: &'a dyn ChangeLogStore,
    source: &'a dyn BlockSource,
    trie: &'a mut dyn ClaimTrie,
    config: ReplayConfig,
}

impl<'a> Replayer<'a> {
    pub fn new(
        store: &'a dyn ChangeLogStore,
        source: &'a dyn BlockSource,
        trie: &'a mut dyn ClaimTrie,
        config: ReplayConfig,
    ) -> Self {
        Self {
            store,
            source,
            trie,
            config,
        }
    }

    /// Advance the trie from height `from` to height `to`, verifying the
    /// commitment after every block.
    ///
    /// The trie must currently sit at `from`, and its commitment there must
    /// already match the header at `from`.
    pub fn replay(&mut self, from: Height, to: Height) -> Result<ReplaySummary> {
        if from >= to {
            return Err(ChainError::InvalidRange(format!(
                "replay needs from < to, got {}..{}",
                from, to
            )));
        }
        if self.trie.height() != from {
            return Err(ChainError::InvalidRange(format!(
                "trie is at height {} but replay starts at {}",
                self.trie.height(),
                from
            )));
        }
        self.verify(from)?;

        info!(from, to, "starting replay");
        let started = Instant::now();
        let mut changes_applied = 0u64;
        let mut warned_unmarked = false;

        for height in from + 1..=to {
            let changes = match self.store.lookup(height)? {
                BatchLookup::Present(changes) => changes,
                BatchLookup::Empty => Vec::new(),
                BatchLookup::Beyond { converted } => {
                    return Err(ChainError::BeyondConverted { height, converted });
                }
                BatchLookup::Unmarked => {
                    if !warned_unmarked {
                        warn!(
                            height,
                            "change log has no conversion marker, treating missing batches as empty"
                        );
                        warned_unmarked = true;
                    }
                    Vec::new()
                }
            };

            for change in &changes {
                apply_change(&mut *self.trie, change)?;
            }
            changes_applied += changes.len() as u64;

            self.trie.append_block()?;
            debug!(height, changes = changes.len(), "applied batch");
            self.verify(height)?;

            if self.config.progress_every > 0 && height % self.config.progress_every == 0 {
                info!(height, to, changes_applied, "replay progress");
            }
        }

        let summary = ReplaySummary {
            from,
            to,
            changes_applied,
            final_hash: self.trie.merkle_hash(),
        };
        info!(
            from,
            to,
            changes_applied,
            hash = %summary.final_hash,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "replay verified"
        );
        Ok(summary)
    }

    fn verify(&self, height: Height) -> Result<()> {
        let expected = self.source.block_by_height(height)?.header.claim_trie;
        let got = self.trie.merkle_hash();
        if got != expected {
            error!(height, %expected, %got, "commitment mismatch");
            return Err(ChainError::HashMismatch {
                height,
                expected,
                got,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::MemoryChangeStore;
    use crate::config::ConverterConfig;
    use crate::convert::Converter;
    use crate::ledger::{ChainBuilder, MemoryBlockSource};
    use crate::trie::{MemoryClaimTrie, EMPTY_TRIE_HASH};
    use crate::types::{ClaimId, OutPoint};

    fn converted(builder: ChainBuilder) -> (MemoryBlockSource, MemoryChangeStore) {
        let source = MemoryBlockSource::new(builder.into_blocks()).unwrap();
        let store = MemoryChangeStore::new();
        Converter::new(&source, &store, ConverterConfig::default())
            .run()
            .unwrap();
        (source, store)
    }

    fn update_chain() -> ChainBuilder {
        let mut builder = ChainBuilder::new();
        let op = builder.claim("carol", 7).unwrap();
        let id = ClaimId::from_outpoint(&op);
        builder.seal().unwrap();
        let support = builder.support("carol", id, 2).unwrap();
        builder.seal().unwrap();
        builder.update(op, "carol", id, 9).unwrap();
        builder.abandon_support(support, "carol", id).unwrap();
        builder.seal().unwrap();
        builder
    }

    #[test]
    fn test_apply_change_dispatches() {
        let mut trie = MemoryClaimTrie::new();
        let op = OutPoint::new(Hash::from_bytes(b"tx"), 0);
        let id = ClaimId::from_outpoint(&op);

        apply_change(&mut trie, &Change::new(1, ChangeType::AddClaim, "n", op, id, 4)).unwrap();
        trie.append_block().unwrap();
        assert_eq!(trie.best_claim(b"n").unwrap().amount, 4);

        apply_change(&mut trie, &Change::new(2, ChangeType::SpendClaim, "n", op, id, 0)).unwrap();
        trie.append_block().unwrap();
        assert_eq!(trie.merkle_hash(), EMPTY_TRIE_HASH);
    }

    #[test]
    fn test_replay_matches_every_header() {
        let (source, store) = converted(update_chain());
        let mut trie = MemoryClaimTrie::new();

        let summary = Replayer::new(&store, &source, &mut trie, ReplayConfig::default())
            .replay(0, 3)
            .unwrap();

        assert_eq!(summary.changes_applied, 5);
        assert_eq!(summary.final_hash, source.blocks()[3].header.claim_trie);
        assert_eq!(trie.height(), 3);
        assert_eq!(trie.best_claim(b"carol").unwrap().amount, 9);
    }

    #[test]
    fn test_replay_resumes_from_trie_height() {
        let (source, store) = converted(update_chain());
        let mut trie = MemoryClaimTrie::new();

        Replayer::new(&store, &source, &mut trie, ReplayConfig::default())
            .replay(0, 1)
            .unwrap();
        let summary = Replayer::new(&store, &source, &mut trie, ReplayConfig::default())
            .replay(1, 3)
            .unwrap();
        assert_eq!(summary.from, 1);
        assert_eq!(summary.final_hash, source.blocks()[3].header.claim_trie);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let (source, store) = converted(update_chain());
        let mut trie = MemoryClaimTrie::new();
        let mut replayer = Replayer::new(&store, &source, &mut trie, ReplayConfig::default());

        assert!(matches!(replayer.replay(2, 2), Err(ChainError::InvalidRange(_))));
        assert!(matches!(replayer.replay(3, 1), Err(ChainError::InvalidRange(_))));
        // Trie sits at 0
        assert!(matches!(replayer.replay(1, 3), Err(ChainError::InvalidRange(_))));
    }

    #[test]
    fn test_height_beyond_converted_is_fatal() {
        let mut builder = update_chain();
        builder.claim("dave", 1).unwrap();
        builder.seal().unwrap();
        let source = MemoryBlockSource::new(builder.into_blocks()).unwrap();
        let store = MemoryChangeStore::new();
        let config = ConverterConfig {
            to_height: Some(2),
            ..Default::default()
        };
        Converter::new(&source, &store, config).run().unwrap();

        let mut trie = MemoryClaimTrie::new();
        let err = Replayer::new(&store, &source, &mut trie, ReplayConfig::default())
            .replay(0, 4)
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::BeyondConverted {
                height: 3,
                converted: 2
            }
        ));
        assert_eq!(trie.height(), 2);
    }

    #[test]
    fn test_unmarked_store_treats_missing_as_empty() {
        let mut builder = ChainBuilder::new();
        builder.claim("erin", 3).unwrap();
        builder.seal().unwrap();
        builder.transfer(1).unwrap();
        builder.seal().unwrap();
        builder.claim("erin", 4).unwrap();
        builder.seal().unwrap();
        let (source, converted_store) = converted(builder);
        assert_eq!(converted_store.heights(), vec![1, 3]);

        let store = MemoryChangeStore::new();
        for height in converted_store.heights() {
            store.save(height, &converted_store.load(height).unwrap()).unwrap();
        }

        let mut trie = MemoryClaimTrie::new();
        let summary = Replayer::new(&store, &source, &mut trie, ReplayConfig::default())
            .replay(0, 3)
            .unwrap();
        assert_eq!(summary.final_hash, source.blocks()[3].header.claim_trie);
    }

    #[test]
    fn test_mismatch_stops_at_first_bad_height() {
        let (source, store) = converted(update_chain());
        let mut batch = store.load(2).unwrap();
        batch[0].amount += 1;
        store.save(2, &batch).unwrap();

        let mut trie = MemoryClaimTrie::new();
        let err = Replayer::new(&store, &source, &mut trie, ReplayConfig::default())
            .replay(0, 3)
            .unwrap_err();
        assert!(matches!(err, ChainError::HashMismatch { height: 2, .. }));
        assert_eq!(trie.height(), 2);
    }
}
