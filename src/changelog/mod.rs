//! Change log store.
//!
//! A height-keyed map of change batches that acts as a replayable log of
//! claim trie transitions. A batch is the unit of storage: it is saved and
//! loaded whole, in extraction order.
//!
//! # Example
//!
//! ```ignore
//! let store = FileChangeStore::open("./claim_dbs/chain")?;
//! store.save(12, &changes)?;
//!
//! match store.lookup(12)? {
//!     BatchLookup::Present(batch) => apply(batch),
//!     BatchLookup::Empty => {}
//!     BatchLookup::Beyond { converted } => bail!("only converted to {converted}"),
//!     BatchLookup::Unmarked => warn!("store predates conversion markers"),
//! }
//! ```

mod dump;
mod index;
mod log;
mod memory;

pub use dump::{dump, Dump};
pub use index::ChangeIndex;
pub use log::FileChangeStore;
pub use memory::MemoryChangeStore;

use crate::change::Change;
use crate::error::{ChainError, Result};
use crate::types::Height;

/// Durable height -> change batch map.
pub trait ChangeLogStore: Send + Sync {
    /// Create or overwrite the batch for `height`.
    fn save(&self, height: Height, changes: &[Change]) -> Result<()>;

    /// Load the batch for `height`, or [`ChainError::BatchNotFound`].
    fn load(&self, height: Height) -> Result<Vec<Change>>;

    /// Record that every height up to `height` has been scanned.
    fn mark_converted(&self, height: Height) -> Result<()>;

    /// Highest height recorded by [`ChangeLogStore::mark_converted`].
    fn converted_height(&self) -> Result<Option<Height>>;

    /// Make previous writes durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Load a batch, telling apart heights known to carry no changes from
    /// heights that were never converted.
    fn lookup(&self, height: Height) -> Result<BatchLookup> {
        match self.load(height) {
            Ok(changes) => Ok(BatchLookup::Present(changes)),
            Err(e) if e.is_not_found() => Ok(match self.converted_height()? {
                Some(converted) if height <= converted => BatchLookup::Empty,
                Some(converted) => BatchLookup::Beyond { converted },
                None => BatchLookup::Unmarked,
            }),
            Err(e) => Err(e),
        }
    }
}

/// Outcome of [`ChangeLogStore::lookup`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchLookup {
    Present(Vec<Change>),
    /// Converted height without claim activity.
    Empty,
    /// Height above the converted range.
    Beyond { converted: Height },
    /// Not found, and the store carries no conversion marker.
    Unmarked,
}

/// Every change must belong to the batch's height.
pub(crate) fn check_batch(height: Height, changes: &[Change]) -> Result<()> {
    match changes.iter().find(|c| c.height != height) {
        Some(c) => Err(ChainError::BatchHeightMismatch {
            batch: height,
            change: c.height,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeType;
    use crate::types::{ClaimId, Hash, OutPoint};

    fn change(height: Height) -> Change {
        let op = OutPoint::new(Hash::from_bytes(&height.to_le_bytes()), 0);
        Change::new(height, ChangeType::AddClaim, "n", op, ClaimId::from_outpoint(&op), 1)
    }

    #[test]
    fn test_lookup_distinguishes_empty_from_beyond() {
        let store = MemoryChangeStore::new();
        store.save(2, &[change(2)]).unwrap();

        assert_eq!(store.lookup(1).unwrap(), BatchLookup::Unmarked);

        store.mark_converted(3).unwrap();
        assert_eq!(store.lookup(2).unwrap(), BatchLookup::Present(vec![change(2)]));
        assert_eq!(store.lookup(3).unwrap(), BatchLookup::Empty);
        assert_eq!(store.lookup(4).unwrap(), BatchLookup::Beyond { converted: 3 });
    }

    #[test]
    fn test_check_batch_rejects_foreign_height() {
        assert!(check_batch(5, &[change(5), change(5)]).is_ok());
        assert!(matches!(
            check_batch(5, &[change(5), change(6)]),
            Err(ChainError::BatchHeightMismatch { batch: 5, change: 6 })
        ));
    }
}
