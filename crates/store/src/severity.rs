//! Severity index: contiguous position spans per severity block.
//!
//! An alert collection is ordered by severity descending, newest first inside
//! a block. The index tracks each block's `[first, last]` bounds so the insert
//! position for a new alert is found without scanning the collection. It is
//! only meaningful next to the collection it describes and must be updated in
//! the same step.

use rustc_hash::FxHashMap;
use serde::Serialize;
use vigil_core::{Entity, IndexDesyncError, Severity};

/// Inclusive bounds of one severity block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub first: usize,
    pub last: usize,
}

impl Span {
    pub fn len(&self) -> usize { self.last - self.first + 1 }

    fn shift(&mut self, delta: Delta) {
        match delta {
            Delta::Insert => {
                self.first += 1;
                self.last += 1;
            }
            Delta::Remove => {
                self.first -= 1;
                self.last -= 1;
            }
        }
    }
}

/// Block size change: `+1` or `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Insert,
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeverityIndex {
    // Indexed by priority.
    spans: [Option<Span>; Severity::COUNT],
}

impl SeverityIndex {
    pub fn new() -> Self { Self::default() }

    pub fn span(&self, severity: Severity) -> Option<Span> { self.spans[slot(severity)] }

    pub fn is_empty(&self) -> bool { self.spans.iter().all(Option::is_none) }

    /// Number of positions covered by all blocks.
    pub fn total(&self) -> usize { self.spans.iter().flatten().map(Span::len).sum() }

    /// Present blocks from highest to lowest priority.
    pub fn blocks(&self) -> impl Iterator<Item = (Severity, Span)> + '_ {
        Severity::ALL.iter().rev().filter_map(move |s| self.span(*s).map(|sp| (*s, sp)))
    }

    /// Position at which a new entity of `severity` goes.
    pub fn get_index(&self, severity: Severity) -> usize {
        let i = slot(severity);
        if let Some(sp) = self.spans[i] {
            return sp.first;
        }
        // Directly in front of the nearest lower block.
        if let Some(sp) = self.spans[..i].iter().rev().flatten().next() {
            return sp.first;
        }
        // Directly behind the nearest higher block.
        if let Some(sp) = self.spans[i + 1..].iter().flatten().next() {
            return sp.last + 1;
        }
        0
    }

    /// Grow or shrink the block of `severity` by one and shift every lower
    /// priority block accordingly.
    pub fn update(&mut self, severity: Severity, delta: Delta) -> Result<(), IndexDesyncError> {
        let i = slot(severity);
        match delta {
            Delta::Insert => {
                let at = self.get_index(severity);
                self.spans[i] = Some(match self.spans[i] {
                    Some(sp) => Span { first: sp.first, last: sp.last + 1 },
                    None => Span { first: at, last: at },
                });
            }
            Delta::Remove => {
                let Some(mut sp) = self.spans[i] else {
                    return Err(IndexDesyncError { severity });
                };
                if sp.first == sp.last {
                    self.spans[i] = None;
                } else {
                    sp.last -= 1;
                    self.spans[i] = Some(sp);
                }
            }
        }
        for sp in self.spans[..i].iter_mut().flatten() {
            sp.shift(delta);
        }
        Ok(())
    }

    /// Blocks are contiguous from position 0 and cover exactly `len` items.
    pub fn check(&self, len: usize) -> bool {
        let mut next = 0usize;
        for (_, sp) in self.blocks() {
            if sp.first != next || sp.last < sp.first {
                return false;
            }
            next = sp.last + 1;
        }
        next == len
    }

    /// Recompute from an authoritative collection already in severity order.
    pub fn rebuild(items: &[Entity]) -> Self {
        let mut counts = [0usize; Severity::COUNT];
        for e in items {
            counts[slot(e.severity())] += 1;
        }
        let mut idx = Self::default();
        let mut next = 0usize;
        for s in Severity::ALL.iter().rev() {
            let n = counts[slot(*s)];
            if n > 0 {
                idx.spans[slot(*s)] = Some(Span { first: next, last: next + n - 1 });
                next += n;
            }
        }
        idx
    }
}

fn slot(severity: Severity) -> usize { severity.priority() as usize }

/// Cache key: a collection name plus an optional sub-key (e.g. a parent id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IndexKey {
    pub collection: String,
    pub sub: Option<String>,
}

impl IndexKey {
    pub fn new(collection: impl Into<String>) -> Self { Self { collection: collection.into(), sub: None } }

    pub fn with_sub(collection: impl Into<String>, sub: impl Into<String>) -> Self {
        Self { collection: collection.into(), sub: Some(sub.into()) }
    }
}

/// Severity indices owned by one pipeline, keyed per collection/sub-key.
#[derive(Debug, Default)]
pub struct SeverityIndexCache {
    map: FxHashMap<IndexKey, SeverityIndex>,
}

impl SeverityIndexCache {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, key: &IndexKey) -> Option<&SeverityIndex> { self.map.get(key) }

    pub fn get_mut_or_default(&mut self, key: &IndexKey) -> &mut SeverityIndex {
        self.map.entry(key.clone()).or_default()
    }

    /// Snapshot of the index for `key`; empty if none exists yet.
    pub fn cloned(&self, key: &IndexKey) -> SeverityIndex { self.map.get(key).cloned().unwrap_or_default() }

    pub fn replace(&mut self, key: IndexKey, index: SeverityIndex) { self.map.insert(key, index); }

    pub fn remove(&mut self, key: &IndexKey) -> Option<SeverityIndex> { self.map.remove(key) }

    /// Drop the indices of every sub-key of `collection`.
    pub fn remove_collection(&mut self, collection: &str) -> usize {
        let before = self.map.len();
        self.map.retain(|k, _| k.collection != collection);
        before - self.map.len()
    }
}
