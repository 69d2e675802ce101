//! Series actor: owns a [`WindowStore`] and coalesces point bursts.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use vigil_core::EngineConfig;

use crate::point::StreamConfig;
use crate::store::{WindowStore, WindowTarget};
use crate::SeriesError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesConfig {
    pub batch_interval: Duration,
    pub queue_cap: usize,
    pub window: Option<usize>,
}

impl Default for SeriesConfig {
    fn default() -> Self { Self::from_engine(&EngineConfig::default()) }
}

impl SeriesConfig {
    pub fn from_engine(cfg: &EngineConfig) -> Self {
        Self { batch_interval: cfg.series_batch_interval, queue_cap: cfg.queue_cap, window: cfg.window }
    }
}

#[derive(Debug)]
pub enum SeriesCommand {
    Register { key: String, config: StreamConfig, reply: Option<oneshot::Sender<Result<(), SeriesError>>> },
    Unregister { key: String },
    Points { key: String, points: Vec<Value> },
    SetWindow { target: WindowTarget, size: Option<usize>, reply: Option<oneshot::Sender<Result<(), SeriesError>>> },
    /// Merge everything pending now and acknowledge once published.
    Flush { reply: oneshot::Sender<()> },
}

/// Published state of one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamView {
    pub key: String,
    pub points: Vec<Value>,
    pub archived: usize,
    pub window: Option<usize>,
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SeriesWorld {
    pub epoch: u64,
    pub streams: FxHashMap<String, Arc<StreamView>>,
}

#[derive(Clone)]
pub struct SeriesHandle {
    snap: Arc<ArcSwap<SeriesWorld>>,
    epoch_rx: watch::Receiver<u64>,
}

impl SeriesHandle {
    pub fn current(&self) -> Arc<SeriesWorld> { self.snap.load_full() }
    pub fn stream(&self, key: &str) -> Option<Arc<StreamView>> { self.snap.load().streams.get(key).cloned() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
}

struct SeriesActor {
    store: WindowStore,
    // Pending points per stream, flushed in first-arrival order.
    pending: FxHashMap<String, Vec<Value>>,
    order: Vec<String>,
    world: Arc<SeriesWorld>,
    snap: Arc<ArcSwap<SeriesWorld>>,
    epoch_tx: watch::Sender<u64>,
}

impl SeriesActor {
    fn push(&mut self, key: String, points: Vec<Value>) {
        if points.is_empty() {
            return;
        }
        match self.pending.get_mut(&key) {
            Some(buf) => buf.extend(points),
            None => {
                self.order.push(key.clone());
                self.pending.insert(key, points);
            }
        }
    }

    fn flush(&mut self) {
        if self.order.is_empty() {
            return;
        }
        let mut touched = Vec::with_capacity(self.order.len());
        for key in std::mem::take(&mut self.order) {
            let Some(points) = self.pending.remove(&key) else { continue };
            match self.store.update(&key, points) {
                Ok(report) => {
                    debug!(stream = %key, created = report.created, merged = report.merged, archived = report.archived, "series merged");
                    touched.push(key);
                }
                Err(e) => warn!(stream = %key, error = %e, "points dropped"),
            }
        }
        self.publish(&touched, &[]);
    }

    fn view(&self, key: &str) -> Option<Arc<StreamView>> {
        let points = self.store.points(key)?;
        Some(Arc::new(StreamView {
            key: key.to_string(),
            points: points.iter().cloned().map(|p| p.into_value()).collect(),
            archived: self.store.archived_len(key),
            window: self.store.window(key),
            meta: self.store.config(key).and_then(|c| c.meta.clone()),
        }))
    }

    fn publish(&mut self, touched: &[String], removed: &[String]) {
        if touched.is_empty() && removed.is_empty() {
            return;
        }
        let mut streams = self.world.streams.clone();
        for key in removed {
            streams.remove(key);
        }
        for key in touched {
            if let Some(v) = self.view(key) {
                streams.insert(key.clone(), v);
            }
        }
        let epoch = self.world.epoch.saturating_add(1);
        let next = Arc::new(SeriesWorld { epoch, streams });
        self.world = Arc::clone(&next);
        self.snap.store(next);
        let _ = self.epoch_tx.send(epoch);
    }

    /// Control commands apply after everything received before them.
    fn control(&mut self, cmd: SeriesCommand) {
        self.flush();
        match cmd {
            SeriesCommand::Register { key, config, reply } => {
                let res = self.store.register_stream(key.clone(), config);
                if res.is_ok() {
                    self.publish(&[key], &[]);
                }
                if let Some(tx) = reply {
                    let _ = tx.send(res);
                }
            }
            SeriesCommand::Unregister { key } => {
                self.pending.remove(&key);
                if self.store.unregister_stream(&key) {
                    info!(stream = %key, "stream unregistered");
                    self.publish(&[], &[key]);
                }
            }
            SeriesCommand::SetWindow { target, size, reply } => {
                let res = self.store.set_window(target.clone(), size);
                if res.is_ok() {
                    let touched: Vec<String> = match target {
                        WindowTarget::Stream(key) => vec![key],
                        WindowTarget::Global => self.store.keys().map(str::to_string).collect(),
                    };
                    self.publish(&touched, &[]);
                }
                if let Some(tx) = reply {
                    let _ = tx.send(res);
                }
            }
            SeriesCommand::Flush { reply } => {
                let _ = reply.send(());
            }
            SeriesCommand::Points { key, points } => self.push(key, points),
        }
    }
}

/// Spawn the series actor. Dropping every sender flushes, then stops.
pub fn spawn_series(cfg: SeriesConfig) -> (mpsc::Sender<SeriesCommand>, SeriesHandle) {
    let (tx, mut rx) = mpsc::channel::<SeriesCommand>(cfg.queue_cap.max(1));
    let world = Arc::new(SeriesWorld::default());
    let snap = Arc::new(ArcSwap::new(Arc::clone(&world)));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let handle = SeriesHandle { snap: Arc::clone(&snap), epoch_rx };
    let mut actor = SeriesActor {
        store: WindowStore::with_window(cfg.window),
        pending: FxHashMap::default(),
        order: Vec::new(),
        world,
        snap,
        epoch_tx,
    };

    tokio::spawn(async move {
        let interval = cfg.batch_interval;
        let timer = tokio::time::sleep(interval);
        tokio::pin!(timer);
        let mut armed = false;
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(SeriesCommand::Points { key, points }) => {
                        actor.push(key, points);
                        if !armed && !actor.order.is_empty() {
                            timer.as_mut().reset(tokio::time::Instant::now() + interval);
                            armed = true;
                        }
                    }
                    Some(other) => actor.control(other),
                    None => {
                        debug!("series channel closed; draining and exiting");
                        actor.flush();
                        break;
                    }
                },
                _ = &mut timer, if armed => {
                    armed = false;
                    actor.flush();
                }
            }
        }
        info!("series actor stopped");
    });

    (tx, handle)
}
