//! Point lookup visitors.

use crate::key::{ParsedInternalKey, ValueType};

/// Receives the entries a point lookup walks over.
pub trait GetContext {
    /// Called for each entry at or after the lookup key, in order. Returns
    /// `true` to be fed the next entry, `false` to stop.
    fn save_value(&mut self, key: &ParsedInternalKey<'_>, value: &[u8]) -> bool;

    /// The key's block could not be read without blocking I/O, so its
    /// absence cannot be proven.
    fn mark_key_may_exist(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupState {
    NotFound,
    Found(Vec<u8>),
    Deleted,
    /// The lookup was cut short by a cache-only read.
    MayExist,
    /// An entry type this visitor cannot resolve on its own.
    Corrupt,
}

/// Looks up the newest entry of one user key.
#[derive(Debug, Clone)]
pub struct LookupContext {
    user_key: Vec<u8>,
    state: LookupState,
}

impl LookupContext {
    pub fn new(user_key: impl Into<Vec<u8>>) -> Self {
        Self {
            user_key: user_key.into(),
            state: LookupState::NotFound,
        }
    }

    #[must_use]
    pub fn state(&self) -> &LookupState {
        &self.state
    }

    pub fn into_state(self) -> LookupState {
        self.state
    }

    /// The value, if the lookup found a live entry.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        match &self.state {
            LookupState::Found(v) => Some(v),
            _ => None,
        }
    }
}

impl GetContext for LookupContext {
    fn save_value(&mut self, key: &ParsedInternalKey<'_>, value: &[u8]) -> bool {
        if key.user_key != self.user_key.as_slice() {
            return false;
        }
        self.state = match key.value_type {
            ValueType::Value => LookupState::Found(value.to_vec()),
            ValueType::Deletion | ValueType::SingleDeletion => LookupState::Deleted,
            ValueType::Merge => LookupState::Corrupt,
        };
        false
    }

    fn mark_key_may_exist(&mut self) {
        if self.state == LookupState::NotFound {
            self.state = LookupState::MayExist;
        }
    }
}
