use crate::error::Result;
use crate::iterator::InternalIterator;

/// Decides whether a table may hold any key of the partition `internal_key`
/// belongs to.
pub trait PartitionFilter {
    fn may_contain_partition(&mut self, internal_key: &[u8]) -> bool;
}

/// Iterator for scans confined to one hashed-key partition.
///
/// A seek whose partition the filter rules out leaves the iterator invalid
/// without touching the inner iterator: the table holds nothing of that
/// partition, and the scan never needs to leave it. Every other move is
/// passed through unchanged.
pub struct FilterAwareIterator<I, F> {
    inner: I,
    filter: F,
    valid: bool,
}

impl<I: InternalIterator, F: PartitionFilter> FilterAwareIterator<I, F> {
    pub fn new(inner: I, filter: F) -> Self {
        Self {
            inner,
            filter,
            valid: false,
        }
    }

    pub fn into_inner(self) -> I {
        self.inner
    }
}

impl<I: InternalIterator, F: PartitionFilter> InternalIterator for FilterAwareIterator<I, F> {
    fn valid(&self) -> bool {
        self.valid
    }

    fn seek_to_first(&mut self) {
        self.inner.seek_to_first();
        self.valid = self.inner.valid();
    }

    fn seek_to_last(&mut self) {
        self.inner.seek_to_last();
        self.valid = self.inner.valid();
    }

    fn seek(&mut self, target: &[u8]) {
        if !self.filter.may_contain_partition(target) {
            self.valid = false;
            return;
        }
        self.inner.seek(target);
        self.valid = self.inner.valid();
    }

    fn next(&mut self) {
        self.inner.next();
        self.valid = self.inner.valid();
    }

    fn prev(&mut self) {
        self.inner.prev();
        self.valid = self.inner.valid();
    }

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn status(&self) -> Result<()> {
        self.inner.status()
    }
}
