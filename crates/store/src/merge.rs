//! Merge engine: fold a batch of decoded records into an ordered collection.
//!
//! The merge never mutates its input. It builds a new collection (and, for
//! alerts, a new severity index) that the caller commits together.

use rustc_hash::FxHashMap;
use tracing::trace;
use vigil_core::{Entity, EntityId, IndexDesyncError, Limit, Update};

use crate::evict;
use crate::severity::{Delta, SeverityIndex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOpts {
    pub limit: Limit,
    /// Alert variant: severity-ordered, `dismiss` removes.
    pub alert: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub evicted: usize,
    /// The batch carried a full snapshot.
    pub snapshot: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Merged {
    pub items: Vec<Entity>,
    pub index: SeverityIndex,
    pub stats: MergeStats,
}

enum Pending {
    Upsert(Entity),
    Tombstone,
}

/// Latest pending record per id, iterated in first-arrival order.
struct Coalescer {
    map: FxHashMap<EntityId, Pending>,
    order: Vec<EntityId>,
}

impl Coalescer {
    fn new() -> Self { Self { map: FxHashMap::default(), order: Vec::new() } }

    fn len(&self) -> usize { self.map.len() }

    fn push(&mut self, id: EntityId, p: Pending) {
        if !self.map.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.map.insert(id, p);
    }

    fn take(&mut self, id: &EntityId) -> Option<Pending> { self.map.remove(id) }

    /// Remaining records, first-arrival order.
    fn drain_ready(mut self) -> Vec<Pending> {
        let mut out = Vec::with_capacity(self.map.len());
        for id in self.order.iter() {
            if let Some(p) = self.map.remove(id) {
                out.push(p);
            }
        }
        out
    }
}

/// Merge `batch` into `existing`. `index` describes `existing` and is only
/// consulted for the alert variant; the returned index describes the result.
pub fn merge(
    existing: &[Entity],
    batch: Vec<Update>,
    opts: MergeOpts,
    index: &SeverityIndex,
) -> Result<Merged, IndexDesyncError> {
    let mut stats = MergeStats::default();
    let mut base: Option<Vec<Entity>> = None;
    let mut pending = Coalescer::new();
    for u in batch {
        match u {
            Update::Snapshot(items) => {
                // Records before the last snapshot are superseded by it.
                base = Some(dedup(items));
                pending = Coalescer::new();
                stats.snapshot = true;
            }
            Update::Upsert(e) => pending.push(e.id().clone(), Pending::Upsert(e)),
            Update::Tombstone(id) => pending.push(id, Pending::Tombstone),
        }
    }
    trace!(pending = pending.len(), snapshot = stats.snapshot, alert = opts.alert, "merge");
    if opts.alert {
        merge_alerts(existing, base, pending, opts.limit, index, stats)
    } else {
        Ok(merge_ordered(existing, base, pending, opts.limit, stats))
    }
}

fn merge_ordered(
    existing: &[Entity],
    base: Option<Vec<Entity>>,
    mut pending: Coalescer,
    limit: Limit,
    mut stats: MergeStats,
) -> Merged {
    let source = base.unwrap_or_else(|| existing.to_vec());
    let mut kept = Vec::with_capacity(source.len() + pending.len());
    for e in source {
        match pending.take(e.id()) {
            None => kept.push(e),
            Some(Pending::Tombstone) => stats.removed += 1,
            Some(Pending::Upsert(u)) => {
                stats.updated += 1;
                kept.push(u);
            }
        }
    }
    let fresh: Vec<Entity> = pending
        .drain_ready()
        .into_iter()
        .filter_map(|p| match p {
            Pending::Upsert(e) => Some(e),
            Pending::Tombstone => None,
        })
        .collect();
    stats.inserted = fresh.len();
    let mut items = evict::place(kept, fresh, limit);
    if let Some(ev) = evict::enforce(&mut items, limit) {
        stats.evicted = ev.count;
    }
    Merged { items, index: SeverityIndex::default(), stats }
}

fn merge_alerts(
    existing: &[Entity],
    base: Option<Vec<Entity>>,
    mut pending: Coalescer,
    limit: Limit,
    index: &SeverityIndex,
    mut stats: MergeStats,
) -> Result<Merged, IndexDesyncError> {
    let (source, mut idx) = match base {
        Some(items) => {
            let mut items: Vec<Entity> = items.into_iter().filter(|e| !e.dismissed()).collect();
            // Stable: arrival order is kept inside each block.
            items.sort_by(|a, b| b.severity().cmp(&a.severity()));
            let idx = SeverityIndex::rebuild(&items);
            (items, idx)
        }
        None => (existing.to_vec(), index.clone()),
    };

    let mut items = Vec::with_capacity(source.len() + pending.len());
    // Updated alerts whose severity changed are re-inserted at their new block.
    let mut moved = Vec::new();
    for e in source {
        match pending.take(e.id()) {
            None => items.push(e),
            Some(Pending::Upsert(u)) if !u.dismissed() && u.severity() == e.severity() => {
                stats.updated += 1;
                items.push(u);
            }
            Some(Pending::Upsert(u)) if !u.dismissed() => {
                idx.update(e.severity(), Delta::Remove)?;
                stats.updated += 1;
                moved.push(u);
            }
            Some(_) => {
                idx.update(e.severity(), Delta::Remove)?;
                stats.removed += 1;
            }
        }
    }

    let cap = limit.cap();
    stats.evicted += trim_alerts(&mut items, &mut idx, cap)?;
    for e in moved {
        insert_alert(&mut items, &mut idx, e)?;
        stats.evicted += trim_alerts(&mut items, &mut idx, cap)?;
    }
    for p in pending.drain_ready() {
        let Pending::Upsert(e) = p else { continue };
        if e.dismissed() {
            continue;
        }
        insert_alert(&mut items, &mut idx, e)?;
        stats.inserted += 1;
        stats.evicted += trim_alerts(&mut items, &mut idx, cap)?;
    }
    debug_assert!(idx.check(items.len()), "severity index out of step with collection");
    Ok(Merged { items, index: idx, stats })
}

fn insert_alert(items: &mut Vec<Entity>, idx: &mut SeverityIndex, e: Entity) -> Result<(), IndexDesyncError> {
    let severity = e.severity();
    let at = idx.get_index(severity);
    if at > items.len() {
        return Err(IndexDesyncError { severity });
    }
    idx.update(severity, Delta::Insert)?;
    items.insert(at, e);
    Ok(())
}

// The tail is the oldest alert of the lowest severity present.
fn trim_alerts(items: &mut Vec<Entity>, idx: &mut SeverityIndex, cap: Option<usize>) -> Result<usize, IndexDesyncError> {
    let Some(cap) = cap else { return Ok(0) };
    let mut evicted = 0;
    while items.len() > cap {
        let Some(victim) = items.pop() else { break };
        idx.update(victim.severity(), Delta::Remove)?;
        evicted += 1;
    }
    Ok(evicted)
}

/// Last occurrence of an id wins, at the position of its first occurrence.
fn dedup(items: Vec<Entity>) -> Vec<Entity> {
    let mut pos: FxHashMap<EntityId, usize> = FxHashMap::default();
    let mut out: Vec<Entity> = Vec::with_capacity(items.len());
    for e in items {
        match pos.get(e.id()) {
            Some(&i) => out[i] = e,
            None => {
                pos.insert(e.id().clone(), out.len());
                out.push(e);
            }
        }
    }
    out
}
