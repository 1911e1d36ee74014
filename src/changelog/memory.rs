//! In-memory change log.

use super::{check_batch, ChangeLogStore};
use crate::change::Change;
use crate::error::{ChainError, Result};
use crate::types::Height;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Change log kept in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryChangeStore {
    batches: RwLock<BTreeMap<Height, Vec<Change>>>,
    converted: RwLock<Option<Height>>,
}

impl MemoryChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Heights that hold a batch, ascending.
    pub fn heights(&self) -> Vec<Height> {
        self.batches.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.batches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.read().is_empty()
    }
}

impl ChangeLogStore for MemoryChangeStore {
    fn save(&self, height: Height, changes: &[Change]) -> Result<()> {
        check_batch(height, changes)?;
        self.batches.write().insert(height, changes.to_vec());
        Ok(())
    }

    fn load(&self, height: Height) -> Result<Vec<Change>> {
        self.batches
            .read()
            .get(&height)
            .cloned()
            .ok_or(ChainError::BatchNotFound(height))
    }

    fn mark_converted(&self, height: Height) -> Result<()> {
        *self.converted.write() = Some(height);
        Ok(())
    }

    fn converted_height(&self) -> Result<Option<Height>> {
        Ok(*self.converted.read())
    }
}
