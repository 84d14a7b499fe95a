//! Content-addressed interning for operand and condition nodes.
//!
//! Creating a node structurally equal to one already interned returns the
//! existing `Arc`, so pointer equality (`Arc::ptr_eq`) is a valid equality
//! test post-intern and common-subexpression elimination falls out for free.

use crate::hash::ContentHash;
use dashmap::DashMap;
use std::sync::Arc;

/// A content-addressed cache from [`ContentHash`] to an interned `Arc<T>`.
///
/// Backed by `DashMap` rather than a plain `Mutex<HashMap>` so that builders
/// compiling rules from multiple threads never contend on a single lock —
/// the spec only requires single-threaded registration, but nothing about
/// the interner itself demands that restriction.
pub struct Interner<T> {
    table: DashMap<ContentHash, Arc<T>>,
}

impl<T> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Interner<T> {
    pub fn new() -> Self {
        Self {
            table: DashMap::new(),
        }
    }

    /// Returns the existing node for `hash` if present, otherwise builds one
    /// with `make`, inserts it, and returns it. `make` may run more than
    /// once under contention; only one result is kept.
    pub fn intern_with(&self, hash: ContentHash, make: impl FnOnce() -> T) -> Arc<T> {
        if let Some(existing) = self.table.get(&hash) {
            return existing.clone();
        }
        let node = Arc::new(make());
        self.table.entry(hash).or_insert_with(|| node.clone()).clone()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
