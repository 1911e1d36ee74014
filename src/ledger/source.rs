//! Read access to canonical blocks.

use super::block::Block;
use crate::error::{ChainError, Result};
use crate::frame;
use crate::types::Height;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sequential block access by height.
pub trait BlockSource: Send + Sync {
    fn block_by_height(&self, height: Height) -> Result<Block>;

    /// Height of the best block.
    fn tip_height(&self) -> Result<Height>;
}

/// Blocks held in memory, indexed by height.
#[derive(Debug, Default)]
pub struct MemoryBlockSource {
    blocks: Vec<Block>,
}

impl MemoryBlockSource {
    /// Blocks must be in height order starting at 0.
    pub fn new(blocks: Vec<Block>) -> Result<Self> {
        for (expected, block) in blocks.iter().enumerate() {
            if block.height() as usize != expected {
                return Err(ChainError::OutOfOrder {
                    expected: expected as Height,
                    got: block.height(),
                });
            }
        }
        Ok(Self { blocks })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

impl BlockSource for MemoryBlockSource {
    fn block_by_height(&self, height: Height) -> Result<Block> {
        self.blocks
            .get(height as usize)
            .cloned()
            .ok_or(ChainError::BlockNotFound(height))
    }

    fn tip_height(&self) -> Result<Height> {
        match self.blocks.len() {
            0 => Err(ChainError::BlockNotFound(0)),
            n => Ok((n - 1) as Height),
        }
    }
}

/// Magic bytes for block files.
const BLOCK_MAGIC: &[u8; 4] = b"BLK\0";

/// Current block file format version.
const BLOCK_VERSION: u8 = 1;

/// Append-only block file. Frame `i` holds the block at height `i`.
pub struct BlockFile {
    path: PathBuf,

    file: Mutex<File>,

    /// Height -> frame offset.
    offsets: RwLock<Vec<u64>>,

    /// Current file size (for appending).
    file_size: RwLock<u64>,
}

impl BlockFile {
    /// Open or create a block file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let (offsets, file_size) = if file.metadata()?.len() == 0 {
            frame::write_header(&mut file, BLOCK_MAGIC, BLOCK_VERSION)?;
            file.sync_all()?;
            (Vec::new(), frame::HEADER_SIZE)
        } else {
            Self::scan(&file)?
        };

        if file.metadata()?.len() > file_size {
            warn!(path = %path.display(), valid = file_size, "truncating torn block file tail");
            file.set_len(file_size)?;
        }

        debug!(path = %path.display(), blocks = offsets.len(), "opened block file");

        Ok(Self {
            path,
            file: Mutex::new(file),
            offsets: RwLock::new(offsets),
            file_size: RwLock::new(file_size),
        })
    }

    /// Append the next block. Its height must equal the current block count.
    pub fn append(&self, block: &Block) -> Result<()> {
        let mut file = self.file.lock();
        let mut offsets = self.offsets.write();

        let expected = offsets.len() as Height;
        if block.height() != expected {
            return Err(ChainError::OutOfOrder {
                expected,
                got: block.height(),
            });
        }

        let mut buf = Vec::new();
        let written = frame::write_frame(&mut buf, block)?;

        let offset = *self.file_size.read();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&buf)?;

        offsets.push(offset);
        *self.file_size.write() = offset + written;
        Ok(())
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.offsets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walk all frames, returning their offsets and the end of the last
    /// valid frame.
    fn scan(file: &File) -> Result<(Vec<u64>, u64)> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        frame::read_header(&mut reader, BLOCK_MAGIC, BLOCK_VERSION)?;

        let mut offsets = Vec::new();
        let mut offset = frame::HEADER_SIZE;
        loop {
            match frame::read_frame::<Block>(&mut reader) {
                Ok(Some((block, size))) => {
                    let expected = offsets.len() as Height;
                    if block.height() != expected {
                        return Err(ChainError::Corruption(format!(
                            "block file holds height {} at position {}",
                            block.height(),
                            expected
                        )));
                    }
                    offsets.push(offset);
                    offset += size;
                }
                Ok(None) => break,
                Err(ChainError::Corruption(_)) | Err(ChainError::ChecksumMismatch { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        Ok((offsets, offset))
    }
}

impl BlockSource for BlockFile {
    fn block_by_height(&self, height: Height) -> Result<Block> {
        let offset = self
            .offsets
            .read()
            .get(height as usize)
            .copied()
            .ok_or(ChainError::BlockNotFound(height))?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut *file);
        match frame::read_frame::<Block>(&mut reader)? {
            Some((block, _)) => Ok(block),
            None => Err(ChainError::Corruption(format!(
                "block {} indexed past end of file",
                height
            ))),
        }
    }

    fn tip_height(&self) -> Result<Height> {
        match self.len() {
            0 => Err(ChainError::BlockNotFound(0)),
            n => Ok((n - 1) as Height),
        }
    }
}
