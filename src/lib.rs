//! # Claim Chain
//!
//! Extracts name-claim transitions from ledger blocks into a replayable
//! change log, and rebuilds the claim trie from that log while checking
//! every block's commitment hash.
//!
//! ## Core Concepts
//!
//! - **Changes**: Ordered claim trie transitions, one batch per height
//! - **Change log**: Durable height-keyed batches plus a converted-height marker
//! - **Converter**: Concurrent fetch/extract/persist pipeline over a block range
//! - **Replay**: Sequential application of batches, verified against headers
//!
//! ## Example
//!
//! ```ignore
//! use claimchain::{BlockFile, Converter, ConverterConfig, FileChangeStore};
//! use claimchain::{MemoryClaimTrie, ReplayConfig, Replayer};
//!
//! let blocks = BlockFile::open("./claim_dbs/blocks.dat")?;
//! let store = FileChangeStore::open("./claim_dbs/chain")?;
//!
//! // Convert the whole chain
//! Converter::new(&blocks, &store, ConverterConfig::default()).run()?;
//!
//! // Rebuild and verify the trie
//! let mut trie = MemoryClaimTrie::new();
//! let summary = Replayer::new(&store, &blocks, &mut trie, ReplayConfig::default())
//!     .replay(0, 1000)?;
//! ```

pub mod change;
pub mod changelog;
pub mod config;
pub mod convert;
pub mod error;
pub mod extract;
pub mod frame;
pub mod ledger;
pub mod replay;
pub mod trie;
pub mod types;

// Re-exports
pub use change::{Change, ChangeSummary, ChangeType};
pub use changelog::{
    dump, BatchLookup, ChangeIndex, ChangeLogStore, Dump, FileChangeStore, MemoryChangeStore,
};
pub use config::{ChainConfig, ConverterConfig, ReplayConfig};
pub use convert::{ConvertSummary, Converter, PipelineStats, StatsSnapshot};
pub use error::{ChainError, Result};
pub use extract::Extractor;
pub use ledger::{
    Block, BlockFile, BlockHeader, BlockSource, ChainBuilder, ClaimOpcode, ClaimScript,
    MemoryBlockSource, Transaction, TxIn, TxOut, UtxoEntry, UtxoView,
};
pub use replay::{apply_change, ReplaySummary, Replayer};
pub use trie::{ClaimInfo, ClaimTrie, MemoryClaimTrie, EMPTY_TRIE_HASH};
pub use types::*;
