//! Collection pipeline: one actor per collection key.
//!
//! Frames accumulate in a pending buffer until a one-shot coalescing timer
//! fires. The merge then runs off the async workers; frames arriving while it
//! is in flight wait for the next round. Results are published as whole
//! snapshots through an `ArcSwap` plus an epoch `watch`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vigil_core::{EngineConfig, Entity, IndexDesyncError, Limit, RawFrame};

use crate::decode::decode_batch;
use crate::merge::{merge, MergeOpts, Merged};
use crate::severity::{IndexKey, SeverityIndex, SeverityIndexCache};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub key: String,
    pub limit: Limit,
    pub alert: bool,
    pub batch_interval: Duration,
    pub queue_cap: usize,
}

impl PipelineConfig {
    pub fn new(key: impl Into<String>) -> Self { Self::from_engine(key, &EngineConfig::default()) }

    pub fn from_engine(key: impl Into<String>, cfg: &EngineConfig) -> Self {
        Self {
            key: key.into(),
            limit: cfg.limit,
            alert: false,
            batch_interval: cfg.batch_interval,
            queue_cap: cfg.queue_cap,
        }
    }

    pub fn limit(mut self, limit: impl Into<Limit>) -> Self {
        self.limit = limit.into();
        self
    }

    pub fn alert(mut self, alert: bool) -> Self {
        self.alert = alert;
        self
    }

    pub fn batch_interval(mut self, d: Duration) -> Self {
        self.batch_interval = d;
        self
    }

    fn opts(&self) -> MergeOpts { MergeOpts { limit: self.limit, alert: self.alert } }
}

/// The only output contract: a full replacement collection per epoch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionSnapshot {
    pub key: String,
    pub epoch: u64,
    pub items: Vec<Entity>,
    /// The pipeline has stopped; no further epochs follow.
    pub closed: bool,
}

#[derive(Debug)]
pub enum Command {
    Frames(Vec<RawFrame>),
    /// Stop now, discarding pending and in-flight work.
    Unregister,
}

/// Handle for readers to access the current snapshot and subscribe to swaps.
#[derive(Clone)]
pub struct CollectionHandle {
    snap: Arc<ArcSwap<CollectionSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl CollectionHandle {
    pub fn current(&self) -> Arc<CollectionSnapshot> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
}

type BatchResult = Result<Option<Merged>, IndexDesyncError>;

struct Pipeline {
    cfg: PipelineConfig,
    index_key: IndexKey,
    committed: Arc<CollectionSnapshot>,
    cache: SeverityIndexCache,
    snap: Arc<ArcSwap<CollectionSnapshot>>,
    epoch_tx: watch::Sender<u64>,
}

impl Pipeline {
    fn start_batch(&self, frames: Vec<RawFrame>) -> JoinHandle<BatchResult> {
        let key = self.cfg.key.clone();
        let opts = self.cfg.opts();
        let current = Arc::clone(&self.committed);
        let index = self.cache.cloned(&self.index_key);
        tokio::task::spawn_blocking(move || run_batch(&key, &current.items, &frames, opts, &index))
    }

    fn finish_batch(&mut self, res: Result<BatchResult, tokio::task::JoinError>) {
        match res {
            Ok(Ok(Some(merged))) => self.commit(merged),
            Ok(Ok(None)) => {}
            Ok(Err(desync)) => {
                metrics::counter!("severity_index_desync_total", 1u64, "collection" => self.cfg.key.clone());
                error!(collection = %self.cfg.key, error = %desync, "batch discarded; rebuilding severity index");
                let rebuilt = SeverityIndex::rebuild(&self.committed.items);
                self.cache.replace(self.index_key.clone(), rebuilt);
            }
            Err(e) => error!(collection = %self.cfg.key, error = %e, "merge task failed"),
        }
    }

    fn commit(&mut self, merged: Merged) {
        let Merged { items, index, stats } = merged;
        let epoch = self.committed.epoch.saturating_add(1);
        if self.cfg.alert {
            self.cache.replace(self.index_key.clone(), index);
        }
        let next = Arc::new(CollectionSnapshot { key: self.cfg.key.clone(), epoch, items, closed: false });
        metrics::gauge!("collection_items", next.items.len() as f64, "collection" => self.cfg.key.clone());
        if stats.evicted > 0 {
            metrics::counter!("collection_evicted_total", stats.evicted as u64, "collection" => self.cfg.key.clone());
        }
        debug!(
            collection = %self.cfg.key,
            epoch,
            items = next.items.len(),
            inserted = stats.inserted,
            updated = stats.updated,
            removed = stats.removed,
            evicted = stats.evicted,
            snapshot = stats.snapshot,
            "collection swapped"
        );
        self.committed = Arc::clone(&next);
        self.snap.store(next);
        let _ = self.epoch_tx.send(epoch);
    }

    fn publish_closed(&mut self, keep_items: bool) {
        let items = if keep_items { self.committed.items.clone() } else { Vec::new() };
        let epoch = self.committed.epoch.saturating_add(1);
        let last = Arc::new(CollectionSnapshot { key: self.cfg.key.clone(), epoch, items, closed: true });
        self.committed = Arc::clone(&last);
        self.snap.store(last);
        let _ = self.epoch_tx.send(epoch);
    }
}

/// Decode and merge one batch. `None` when nothing decodable arrived.
pub fn run_batch(key: &str, existing: &[Entity], frames: &[RawFrame], opts: MergeOpts, index: &SeverityIndex) -> BatchResult {
    let started = Instant::now();
    let updates = decode_batch(key, frames);
    if updates.is_empty() {
        return Ok(None);
    }
    let merged = merge(existing, updates, opts, index)?;
    metrics::histogram!("merge_batch_ms", started.elapsed().as_secs_f64() * 1000.0);
    Ok(Some(merged))
}

/// Spawn a collection pipeline. Returns a sender for commands and a handle
/// for reads. Dropping every sender flushes pending frames, then stops.
pub fn spawn_pipeline(cfg: PipelineConfig) -> (mpsc::Sender<Command>, CollectionHandle) {
    let (tx, mut rx) = mpsc::channel::<Command>(cfg.queue_cap.max(1));
    let initial = Arc::new(CollectionSnapshot { key: cfg.key.clone(), ..Default::default() });
    let snap = Arc::new(ArcSwap::new(Arc::clone(&initial)));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let handle = CollectionHandle { snap: Arc::clone(&snap), epoch_rx };

    let mut p = Pipeline {
        index_key: IndexKey::new(cfg.key.clone()),
        cfg,
        committed: initial,
        cache: SeverityIndexCache::new(),
        snap,
        epoch_tx,
    };

    tokio::spawn(async move {
        info!(collection = %p.cfg.key, limit = p.cfg.limit.0, alert = p.cfg.alert, "pipeline started");
        let interval = p.cfg.batch_interval;
        let mut pending: Vec<RawFrame> = Vec::new();
        let timer = tokio::time::sleep(interval);
        tokio::pin!(timer);
        let mut armed = false;
        let mut inflight: Option<JoinHandle<BatchResult>> = None;
        let mut unregistered = false;

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Frames(frames)) => {
                        pending.extend(frames);
                        if !armed && !pending.is_empty() {
                            timer.as_mut().reset(tokio::time::Instant::now() + interval);
                            armed = true;
                        }
                    }
                    Some(Command::Unregister) => {
                        unregistered = true;
                        break;
                    }
                    None => {
                        debug!(collection = %p.cfg.key, "command channel closed; draining and exiting pipeline");
                        break;
                    }
                },
                _ = &mut timer, if armed && inflight.is_none() => {
                    armed = false;
                    let batch = std::mem::take(&mut pending);
                    inflight = Some(p.start_batch(batch));
                }
                res = async { match inflight.as_mut() { Some(h) => h.await, None => std::future::pending().await } }, if inflight.is_some() => {
                    inflight = None;
                    p.finish_batch(res);
                }
            }
        }

        if unregistered {
            if let Some(h) = inflight.take() {
                h.abort();
                debug!(collection = %p.cfg.key, "in-flight batch discarded after unregister");
            }
            if !pending.is_empty() {
                warn!(collection = %p.cfg.key, frames = pending.len(), "pending frames dropped on unregister");
            }
            pending.clear();
            p.cache.remove_collection(&p.cfg.key);
            p.publish_closed(false);
        } else {
            if let Some(h) = inflight.take() {
                let res = h.await;
                p.finish_batch(res);
            }
            if !pending.is_empty() {
                let res = p.start_batch(std::mem::take(&mut pending)).await;
                p.finish_batch(res);
            }
            p.publish_closed(true);
        }
        info!(collection = %p.cfg.key, unregistered, "pipeline stopped");
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline_over(items: Vec<Entity>) -> Pipeline {
        let committed = Arc::new(CollectionSnapshot { key: "alerts".into(), epoch: 3, items, closed: false });
        let (epoch_tx, _) = watch::channel(3u64);
        Pipeline {
            cfg: PipelineConfig::new("alerts").alert(true),
            index_key: IndexKey::new("alerts"),
            snap: Arc::new(ArcSwap::new(Arc::clone(&committed))),
            committed,
            cache: SeverityIndexCache::new(),
            epoch_tx,
        }
    }

    fn run(p: &Pipeline, frame: &str) -> BatchResult {
        let frames = vec![RawFrame::Incremental(frame.to_string())];
        run_batch(&p.cfg.key, &p.committed.items, &frames, p.cfg.opts(), &p.cache.cloned(&p.index_key))
    }

    #[test]
    fn desync_discards_the_batch_and_rebuilds_the_index() {
        let items = vec![
            Entity::from_value(json!({"id": 1, "severity": "CRITICAL"})).unwrap(),
            Entity::from_value(json!({"id": 2, "severity": "WARNING"})).unwrap(),
        ];
        // The cache starts empty, so it is stale against the held collection.
        let mut p = pipeline_over(items);
        let res = run(&p, r#"{"id": 1}"#);
        assert!(res.is_err());
        p.finish_batch(Ok(res));
        assert_eq!(p.snap.load().epoch, 3);
        assert_eq!(p.committed.items.len(), 2);
        assert!(p.cache.cloned(&p.index_key).check(2));

        let res = run(&p, r#"{"id": 1}"#);
        p.finish_batch(Ok(res));
        let snap = p.snap.load_full();
        assert_eq!(snap.epoch, 4);
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].id(), &vigil_core::EntityId::Num(2));
    }
}
