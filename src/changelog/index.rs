//! Height index for the change log.

use crate::error::Result;
use crate::frame;
use crate::types::Height;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for index files.
const INDEX_MAGIC: &[u8; 4] = b"CIX\0";

/// Current index format version.
const INDEX_VERSION: u8 = 1;

/// Persisted form of the index.
#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    log_size: u64,
    converted: Option<Height>,
    entries: Vec<(Height, u64)>,
}

/// Index mapping heights to the offset of their latest batch frame.
pub struct ChangeIndex {
    /// Path to the index file.
    path: PathBuf,

    /// Height -> log offset.
    entries: RwLock<BTreeMap<Height, u64>>,

    /// Highest converted height.
    converted: RwLock<Option<Height>>,

    /// Log size this index describes. A mismatch with the log on open means
    /// the index is stale.
    log_size: RwLock<u64>,
}

impl ChangeIndex {
    /// Create an empty index.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: RwLock::new(BTreeMap::new()),
            converted: RwLock::new(None),
            log_size: RwLock::new(0),
        }
    }

    /// Load index from file. A missing file yields an empty index.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let index = Self::new(path);
        if index.path.exists() {
            index.load_from_file()?;
        }
        Ok(index)
    }

    /// Point `height` at a new frame.
    pub fn insert(&self, height: Height, offset: u64) {
        self.entries.write().insert(height, offset);
    }

    pub fn get(&self, height: Height) -> Option<u64> {
        self.entries.read().get(&height).copied()
    }

    pub fn set_converted(&self, height: Height) {
        *self.converted.write() = Some(height);
    }

    pub fn converted(&self) -> Option<Height> {
        *self.converted.read()
    }

    pub fn set_log_size(&self, size: u64) {
        *self.log_size.write() = size;
    }

    pub fn log_size(&self) -> u64 {
        *self.log_size.read()
    }

    /// Heights that hold a batch, ascending.
    pub fn heights(&self) -> Vec<Height> {
        self.entries.read().keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    /// Drop everything (before a rebuild).
    pub fn clear(&self) {
        self.entries.write().clear();
        *self.converted.write() = None;
        *self.log_size.write() = 0;
    }

    /// Save index to file (write to a temp file, then rename).
    pub fn save(&self) -> Result<()> {
        let snapshot = IndexSnapshot {
            log_size: self.log_size(),
            converted: self.converted(),
            entries: self.entries.read().iter().map(|(h, o)| (*h, *o)).collect(),
        };

        let tmp_path = self.path.with_extension("idx.tmp");
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            frame::write_header(&mut writer, INDEX_MAGIC, INDEX_VERSION)?;
            frame::write_frame(&mut writer, &snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn load_from_file(&self) -> Result<()> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        frame::read_header(&mut reader, INDEX_MAGIC, INDEX_VERSION)?;

        if let Some((snapshot, _)) = frame::read_frame::<IndexSnapshot>(&mut reader)? {
            *self.entries.write() = snapshot.entries.into_iter().collect();
            *self.converted.write() = snapshot.converted;
            *self.log_size.write() = snapshot.log_size;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_insert_overwrites() {
        let dir = TempDir::new().unwrap();
        let index = ChangeIndex::new(dir.path().join("changes.idx"));

        index.insert(7, 100);
        index.insert(7, 250);
        assert_eq!(index.get(7), Some(250));
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("changes.idx");

        {
            let index = ChangeIndex::new(&path);
            index.insert(1, 5);
            index.insert(3, 40);
            index.set_converted(9);
            index.set_log_size(77);
            index.save().unwrap();
        }

        let index = ChangeIndex::load(&path).unwrap();
        assert_eq!(index.get(1), Some(5));
        assert_eq!(index.get(3), Some(40));
        assert_eq!(index.get(2), None);
        assert_eq!(index.converted(), Some(9));
        assert_eq!(index.log_size(), 77);
        assert_eq!(index.heights(), vec![1, 3]);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = ChangeIndex::load(dir.path().join("absent.idx")).unwrap();
        assert_eq!(index.count(), 0);
        assert_eq!(index.log_size(), 0);
    }
}
