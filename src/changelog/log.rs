//! File-backed change log.

use super::index::ChangeIndex;
use super::{check_batch, ChangeLogStore};
use crate::change::Change;
use crate::error::{ChainError, Result};
use crate::frame;
use crate::types::Height;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Magic bytes for the change log.
const LOG_MAGIC: &[u8; 4] = b"CHG\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

const LOG_FILE: &str = "changes.log";
const INDEX_FILE: &str = "changes.idx";
const LOCK_FILE: &str = "LOCK";

/// Entry as read back from the log.
#[derive(Deserialize)]
enum LogEntry {
    Batch { height: Height, changes: Vec<Change> },
    Converted { height: Height },
}

/// Entry as written. Encodes identically to [`LogEntry`].
#[derive(Serialize)]
enum LogEntryRef<'a> {
    Batch { height: Height, changes: &'a [Change] },
    Converted { height: Height },
}

/// Append-only, height-indexed change log in a directory.
///
/// Saving a height twice appends a newer frame; the index always points at
/// the latest one. The index is persisted on flush and rebuilt from the log
/// when it is missing or stale.
pub struct FileChangeStore {
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    file: Mutex<File>,

    index: ChangeIndex,

    /// Current log size (for appending).
    file_size: RwLock<u64>,

    /// Number of writes since last sync.
    writes_since_sync: Mutex<u64>,

    /// Sync every N writes.
    sync_interval: u64,
}

impl FileChangeStore {
    /// Default sync interval - sync every 100 batches.
    const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Open or create a change log with the default sync interval.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open a change log that must already exist. Never creates files.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.join(LOG_FILE).is_file() {
            return Err(ChainError::StoreMissing(path.to_path_buf()));
        }
        Self::open(path)
    }

    /// Open or create a change log, syncing after every `sync_interval`
    /// writes (0 behaves like 1).
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_file = Self::acquire_lock(&path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.join(LOG_FILE))?;

        if file.metadata()?.len() == 0 {
            frame::write_header(&mut file, LOG_MAGIC, LOG_VERSION)?;
            file.sync_all()?;
        }

        let index = match ChangeIndex::load(path.join(INDEX_FILE)) {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "unreadable change index, rebuilding");
                ChangeIndex::new(path.join(INDEX_FILE))
            }
        };

        let actual_size = file.metadata()?.len();
        let file_size = if index.log_size() == actual_size {
            actual_size
        } else {
            info!(path = %path.display(), "rebuilding change index");
            let valid = Self::rebuild_index(&file, &index)?;
            if valid < actual_size {
                warn!(valid, actual_size, "truncating torn change log tail");
                file.set_len(valid)?;
            }
            valid
        };

        debug!(
            path = %path.display(),
            batches = index.count(),
            converted = ?index.converted(),
            "opened change log"
        );

        Ok(Self {
            path,
            _lock_file: lock_file,
            file: Mutex::new(file),
            index,
            file_size: RwLock::new(file_size),
            writes_since_sync: Mutex::new(0),
            sync_interval: sync_interval.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Heights that hold a batch, ascending.
    pub fn heights(&self) -> Vec<Height> {
        self.index.heights()
    }

    /// Number of stored batches.
    pub fn len(&self) -> usize {
        self.index.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, entry: &LogEntryRef<'_>, force_sync: bool) -> Result<u64> {
        let mut buf = Vec::new();
        let written = frame::write_frame(&mut buf, entry)?;

        let mut file = self.file.lock();
        let offset = *self.file_size.read();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&buf)?;
        *self.file_size.write() = offset + written;

        let mut writes = self.writes_since_sync.lock();
        *writes += 1;
        if force_sync || *writes >= self.sync_interval {
            file.sync_all()?;
            *writes = 0;
        }

        Ok(offset)
    }

    /// Scan the whole log into `index`. Returns the end of the last valid
    /// frame.
    fn rebuild_index(file: &File, index: &ChangeIndex) -> Result<u64> {
        index.clear();

        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        frame::read_header(&mut reader, LOG_MAGIC, LOG_VERSION)?;

        let mut offset = frame::HEADER_SIZE;
        loop {
            match frame::read_frame::<LogEntry>(&mut reader) {
                Ok(Some((entry, size))) => {
                    match entry {
                        LogEntry::Batch { height, .. } => index.insert(height, offset),
                        LogEntry::Converted { height } => index.set_converted(height),
                    }
                    offset += size;
                }
                Ok(None) => break,
                Err(ChainError::Corruption(_)) | Err(ChainError::ChecksumMismatch { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        index.set_log_size(offset);
        Ok(offset)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| ChainError::Locked)?;

        Ok(lock_file)
    }
}

impl ChangeLogStore for FileChangeStore {
    fn save(&self, height: Height, changes: &[Change]) -> Result<()> {
        check_batch(height, changes)?;
        let offset = self.append(&LogEntryRef::Batch { height, changes }, false)?;
        self.index.insert(height, offset);
        Ok(())
    }

    fn load(&self, height: Height) -> Result<Vec<Change>> {
        let offset = self
            .index
            .get(height)
            .ok_or(ChainError::BatchNotFound(height))?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut *file);

        match frame::read_frame::<LogEntry>(&mut reader)? {
            Some((LogEntry::Batch { height: found, changes }, _)) if found == height => Ok(changes),
            _ => Err(ChainError::Corruption(format!(
                "index points height {} at offset {} which holds another entry",
                height, offset
            ))),
        }
    }

    fn mark_converted(&self, height: Height) -> Result<()> {
        self.append(&LogEntryRef::Converted { height }, true)?;
        self.index.set_converted(height);
        Ok(())
    }

    fn converted_height(&self) -> Result<Option<Height>> {
        Ok(self.index.converted())
    }

    fn flush(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        *self.writes_since_sync.lock() = 0;

        self.index.set_log_size(*self.file_size.read());
        self.index.save()
    }
}

impl Drop for FileChangeStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, path = %self.path.display(), "failed to flush change log on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeType;
    use crate::types::{ClaimId, Hash, OutPoint};
    use tempfile::TempDir;

    fn batch(height: Height, n: u32) -> Vec<Change> {
        (0..n)
            .map(|i| {
                let op = OutPoint::new(Hash::from_bytes(&height.to_le_bytes()), i);
                Change::new(
                    height,
                    ChangeType::AddClaim,
                    format!("name-{}", i),
                    op,
                    ClaimId::from_outpoint(&op),
                    i as u64 + 1,
                )
            })
            .collect()
    }

    #[test]
    fn test_open_existing_never_creates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain");

        assert!(matches!(
            FileChangeStore::open_existing(&path),
            Err(ChainError::StoreMissing(p)) if p == path
        ));
        assert!(!path.exists());

        {
            let store = FileChangeStore::open(&path).unwrap();
            store.save(1, &batch(1, 1)).unwrap();
        }
        let store = FileChangeStore::open_existing(&path).unwrap();
        assert_eq!(store.load(1).unwrap(), batch(1, 1));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FileChangeStore::open(dir.path().join("chain")).unwrap();

        store.save(3, &batch(3, 4)).unwrap();
        store.save(5, &batch(5, 1)).unwrap();

        assert_eq!(store.load(3).unwrap(), batch(3, 4));
        assert_eq!(store.load(5).unwrap(), batch(5, 1));
        assert!(matches!(store.load(4), Err(ChainError::BatchNotFound(4))));
        assert_eq!(store.heights(), vec![3, 5]);
    }

    #[test]
    fn test_resave_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FileChangeStore::open(dir.path().join("chain")).unwrap();

        store.save(3, &batch(3, 4)).unwrap();
        store.save(3, &batch(3, 2)).unwrap();

        assert_eq!(store.load(3).unwrap(), batch(3, 2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_persistence_with_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain");

        {
            let store = FileChangeStore::open(&path).unwrap();
            store.save(1, &batch(1, 2)).unwrap();
            store.save(2, &batch(2, 3)).unwrap();
            store.mark_converted(10).unwrap();
        }

        let store = FileChangeStore::open(&path).unwrap();
        assert_eq!(store.load(2).unwrap(), batch(2, 3));
        assert_eq!(store.converted_height().unwrap(), Some(10));
    }

    #[test]
    fn test_rebuild_when_index_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain");

        {
            let store = FileChangeStore::open(&path).unwrap();
            store.save(1, &batch(1, 2)).unwrap();
            store.save(1, &batch(1, 5)).unwrap();
            store.mark_converted(4).unwrap();
        }
        fs::remove_file(path.join(INDEX_FILE)).unwrap();

        let store = FileChangeStore::open(&path).unwrap();
        assert_eq!(store.load(1).unwrap(), batch(1, 5));
        assert_eq!(store.converted_height().unwrap(), Some(4));
    }

    #[test]
    fn test_rebuild_drops_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain");

        {
            let store = FileChangeStore::open(&path).unwrap();
            store.save(1, &batch(1, 2)).unwrap();
            store.save(2, &batch(2, 2)).unwrap();
        }

        let log = path.join(LOG_FILE);
        let len = fs::metadata(&log).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&log)
            .unwrap()
            .set_len(len - 5)
            .unwrap();

        let store = FileChangeStore::open(&path).unwrap();
        assert_eq!(store.load(1).unwrap(), batch(1, 2));
        assert!(store.load(2).unwrap_err().is_not_found());

        // The log is writable again after the torn frame was cut
        store.save(2, &batch(2, 1)).unwrap();
        assert_eq!(store.load(2).unwrap(), batch(2, 1));
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain");

        let _store = FileChangeStore::open(&path).unwrap();
        let result = FileChangeStore::open(&path);
        assert!(matches!(result, Err(ChainError::Locked)));
    }

    #[test]
    fn test_rejects_mismatched_batch() {
        let dir = TempDir::new().unwrap();
        let store = FileChangeStore::open(dir.path().join("chain")).unwrap();

        let result = store.save(4, &batch(3, 1));
        assert!(matches!(result, Err(ChainError::BatchHeightMismatch { .. })));
        assert!(store.is_empty());
    }
}
