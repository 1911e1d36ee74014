//! Read-only walk over stored batches.

use super::{BatchLookup, ChangeLogStore};
use crate::change::Change;
use crate::error::Result;
use crate::types::Height;
use std::ops::RangeInclusive;

/// Iterator over the batches stored for `from..=to`, in height order.
///
/// Heights without a batch are skipped. Store failures are yielded and end
/// the walk.
pub struct Dump<'a> {
    store: &'a dyn ChangeLogStore,
    heights: RangeInclusive<Height>,
    failed: bool,
}

pub fn dump(store: &dyn ChangeLogStore, from: Height, to: Height) -> Dump<'_> {
    Dump {
        store,
        heights: from..=to,
        failed: false,
    }
}

impl Iterator for Dump<'_> {
    type Item = Result<(Height, Vec<Change>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        for height in self.heights.by_ref() {
            match self.store.lookup(height) {
                Ok(BatchLookup::Present(changes)) => return Some(Ok((height, changes))),
                Ok(_) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
