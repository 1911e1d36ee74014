//! Configuration passed explicitly to each component.

use crate::types::Height;
use std::path::PathBuf;
use std::time::Duration;

/// On-disk layout of a node's claim databases.
///
/// Every database lives under `<data_dir>/<network>/claim_dbs/<name>`.
#[derive(Clone, Debug)]
pub struct ChainConfig {
    /// Base data directory.
    pub data_dir: PathBuf,

    /// Network name (e.g. "mainnet", "regtest").
    pub network: String,

    /// Directory of the change log.
    pub change_log: String,

    /// Block file name.
    pub blocks: String,

    /// Directory of derived trie state, wiped before each replay.
    pub trie: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            network: "mainnet".to_string(),
            change_log: "chain".to_string(),
            blocks: "blocks.dat".to_string(),
            trie: "trie".to_string(),
        }
    }
}

impl ChainConfig {
    pub fn claim_dbs(&self) -> PathBuf {
        self.data_dir.join(&self.network).join("claim_dbs")
    }

    pub fn change_log_path(&self) -> PathBuf {
        self.claim_dbs().join(&self.change_log)
    }

    pub fn blocks_path(&self) -> PathBuf {
        self.claim_dbs().join(&self.blocks)
    }

    pub fn trie_path(&self) -> PathBuf {
        self.claim_dbs().join(&self.trie)
    }
}

/// Converter pipeline settings.
#[derive(Clone, Debug)]
pub struct ConverterConfig {
    /// Last height to convert (inclusive). Clamped to the chain tip; `None`
    /// converts up to the tip.
    pub to_height: Option<Height>,

    /// Capacity of each stage queue.
    /// Default: 1000
    pub queue_capacity: usize,

    /// Interval between progress reports.
    /// Default: 5s
    pub report_interval: Duration,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            to_height: None,
            queue_capacity: 1000,
            report_interval: Duration::from_secs(5),
        }
    }
}

/// Replay settings.
#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// Log progress every N heights.
    pub progress_every: Height,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            progress_every: 1000,
        }
    }
}
