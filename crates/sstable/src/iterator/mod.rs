//! Iteration over sorted key/value sequences.
//!
//! [`InternalIterator`] is the cursor interface shared by block iterators,
//! the [`TwoLevelIterator`] that chains an index with its data blocks, and
//! the [`FilterAwareIterator`] decorator.

mod filter_aware;
mod two_level;

pub use filter_aware::{FilterAwareIterator, PartitionFilter};
pub use two_level::{BlockSource, TwoLevelIterator};

use crate::error::Result;

/// A bidirectional cursor over internal keys.
///
/// `key` and `value` may only be called while `valid` returns `true`.
/// An iterator that stops because of an error becomes invalid and reports
/// the error through `status`.
pub trait InternalIterator {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    /// Positions at the first entry whose key is at or past `target`.
    fn seek(&mut self, target: &[u8]);
    fn next(&mut self);
    fn prev(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Result<()>;
}

impl<I: InternalIterator + ?Sized> InternalIterator for Box<I> {
    fn valid(&self) -> bool {
        (**self).valid()
    }
    fn seek_to_first(&mut self) {
        (**self).seek_to_first()
    }
    fn seek_to_last(&mut self) {
        (**self).seek_to_last()
    }
    fn seek(&mut self, target: &[u8]) {
        (**self).seek(target)
    }
    fn next(&mut self) {
        (**self).next()
    }
    fn prev(&mut self) {
        (**self).prev()
    }
    fn key(&self) -> &[u8] {
        (**self).key()
    }
    fn value(&self) -> &[u8] {
        (**self).value()
    }
    fn status(&self) -> Result<()> {
        (**self).status()
    }
}
