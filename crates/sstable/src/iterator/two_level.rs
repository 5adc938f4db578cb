use crate::error::{Error, Result};
use crate::iterator::InternalIterator;

/// Produces the second-level iterator for an index entry.
pub trait BlockSource {
    type Iter: InternalIterator;

    /// Opens the block named by `index_value`. Failures are reported through
    /// the returned iterator's status.
    fn new_block_iter(&mut self, index_value: &[u8]) -> Self::Iter;

    /// `false` if no key sharing `target`'s prefix can be in the table.
    fn prefix_may_match(&mut self, _target: &[u8]) -> bool {
        true
    }

    /// Whether seeks should consult [`BlockSource::prefix_may_match`].
    fn check_prefix_may_match(&self) -> bool {
        false
    }
}

/// Chains an index iterator with lazily opened block iterators.
///
/// The block iterator is rebuilt whenever the index moves to a different
/// handle; empty or failed blocks are skipped, except that a block that
/// could not be read under a cache-only read stops the walk so the caller
/// sees `Incomplete`.
pub struct TwoLevelIterator<I, S: BlockSource> {
    index: I,
    source: S,
    block: Option<S::Iter>,
    block_handle: Vec<u8>,
    /// First error of a block iterator that has been dropped.
    status: Option<Error>,
}

impl<I: InternalIterator, S: BlockSource> TwoLevelIterator<I, S> {
    pub fn new(index: I, source: S) -> Self {
        Self {
            index,
            source,
            block: None,
            block_handle: Vec::new(),
            status: None,
        }
    }

    fn save_error(&mut self, status: Result<()>) {
        if self.status.is_none() {
            if let Err(e) = status {
                self.status = Some(e);
            }
        }
    }

    fn set_block(&mut self, block: Option<S::Iter>) {
        if let Some(old) = &self.block {
            let status = old.status();
            self.save_error(status);
        }
        self.block = block;
    }

    fn block_incomplete(&self) -> bool {
        self.block
            .as_ref()
            .map_or(false, |b| matches!(b.status(), Err(ref e) if e.is_incomplete()))
    }

    fn init_block(&mut self) {
        if !self.index.valid() {
            self.set_block(None);
            return;
        }
        let reuse = self.block.is_some()
            && !self.block_incomplete()
            && self.index.value() == self.block_handle.as_slice();
        if reuse {
            return;
        }
        let handle = self.index.value().to_vec();
        let iter = self.source.new_block_iter(&handle);
        self.block_handle = handle;
        self.set_block(Some(iter));
    }

    /// True when the current block cannot yield an entry and the walk
    /// should move on.
    fn needs_skip(&self) -> bool {
        match &self.block {
            None => true,
            Some(b) => !b.valid() && !self.block_incomplete(),
        }
    }

    fn skip_empty_blocks_forward(&mut self) {
        while self.needs_skip() {
            if !self.index.valid() {
                self.set_block(None);
                return;
            }
            self.index.next();
            self.init_block();
            if let Some(b) = self.block.as_mut() {
                b.seek_to_first();
            }
        }
    }

    fn skip_empty_blocks_backward(&mut self) {
        while self.needs_skip() {
            if !self.index.valid() {
                self.set_block(None);
                return;
            }
            self.index.prev();
            self.init_block();
            if let Some(b) = self.block.as_mut() {
                b.seek_to_last();
            }
        }
    }

    /// The index iterator, for callers that need the current handle.
    pub fn index(&self) -> &I {
        &self.index
    }
}

impl<I: InternalIterator, S: BlockSource> InternalIterator for TwoLevelIterator<I, S> {
    fn valid(&self) -> bool {
        self.block.as_ref().map_or(false, |b| b.valid())
    }

    fn seek_to_first(&mut self) {
        self.index.seek_to_first();
        self.init_block();
        if let Some(b) = self.block.as_mut() {
            b.seek_to_first();
        }
        self.skip_empty_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index.seek_to_last();
        self.init_block();
        if let Some(b) = self.block.as_mut() {
            b.seek_to_last();
        }
        self.skip_empty_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        if self.source.check_prefix_may_match() && !self.source.prefix_may_match(target) {
            self.set_block(None);
            return;
        }
        self.index.seek(target);
        self.init_block();
        if let Some(b) = self.block.as_mut() {
            b.seek(target);
        }
        self.skip_empty_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(b) = self.block.as_mut() {
            b.next();
        }
        self.skip_empty_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(b) = self.block.as_mut() {
            b.prev();
        }
        self.skip_empty_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        match &self.block {
            Some(b) => b.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.block {
            Some(b) => b.value(),
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        self.index.status()?;
        if let Some(b) = &self.block {
            b.status()?;
        }
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
