//! Vigil public API façade (in-process).
//!
//! Frontends register collections and series streams here and read back
//! whole snapshots. Each collection key gets its own pipeline actor; all
//! series streams share one series actor.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use vigil_core::{EngineConfig, Limit, RawFrame};
use vigil_series::{spawn_series, SeriesCommand, SeriesConfig, SeriesError, SeriesHandle, StreamConfig, StreamView, WindowTarget};
use vigil_store::{spawn_pipeline, CollectionHandle, CollectionSnapshot, Command, PipelineConfig};

/// Per-collection registration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOpts {
    /// Overrides the engine-wide default limit.
    pub limit: Option<Limit>,
    pub alert: bool,
}

/// API errors suitable for transport over RPC later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum VigilError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("closed: {0}")]
    Closed(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type VigilResult<T> = Result<T, VigilError>;

impl From<SeriesError> for VigilError {
    fn from(e: SeriesError) -> Self {
        match e {
            SeriesError::UnknownStream(k) => VigilError::NotFound(k),
            SeriesError::AlreadyRegistered(k) => VigilError::Conflict(k),
        }
    }
}

/// Declarative Vigil API surface.
#[async_trait::async_trait]
pub trait StreamApi: Send + Sync {
    async fn register_collection(&self, key: &str, opts: CollectionOpts) -> VigilResult<()>;

    /// Queue raw frames for a collection, in arrival order.
    async fn push_frames(&self, key: &str, frames: Vec<RawFrame>) -> VigilResult<()>;

    /// Latest full collection for `key`.
    fn snapshot(&self, key: &str) -> VigilResult<Arc<CollectionSnapshot>>;

    /// Epoch notifications for `key`.
    fn subscribe(&self, key: &str) -> VigilResult<watch::Receiver<u64>>;

    /// Stop the pipeline and drop everything it holds.
    async fn unregister_collection(&self, key: &str) -> VigilResult<()>;

    async fn register_stream(&self, key: &str, config: StreamConfig) -> VigilResult<()>;

    async fn push_points(&self, key: &str, points: Vec<Value>) -> VigilResult<()>;

    async fn set_window(&self, target: WindowTarget, size: Option<usize>) -> VigilResult<()>;

    fn series(&self, key: &str) -> VigilResult<Arc<StreamView>>;

    fn subscribe_series(&self) -> watch::Receiver<u64>;

    /// Resolves once every point pushed before it is visible in `series`.
    async fn flush_series(&self) -> VigilResult<()>;

    async fn unregister_stream(&self, key: &str) -> VigilResult<()>;
}

struct Registered {
    tx: mpsc::Sender<Command>,
    handle: CollectionHandle,
}

/// In-process implementation that owns the actors directly.
pub struct InProcHub {
    cfg: EngineConfig,
    collections: Mutex<FxHashMap<String, Registered>>,
    series_tx: mpsc::Sender<SeriesCommand>,
    series: SeriesHandle,
}

impl InProcHub {
    /// Must be called inside a tokio runtime.
    pub fn new(cfg: EngineConfig) -> Self {
        let (series_tx, series) = spawn_series(SeriesConfig::from_engine(&cfg));
        Self { cfg, collections: Mutex::new(FxHashMap::default()), series_tx, series }
    }

    pub fn from_env() -> Self { Self::new(EngineConfig::from_env()) }

    pub fn config(&self) -> &EngineConfig { &self.cfg }

    fn lock(&self) -> VigilResult<MutexGuard<'_, FxHashMap<String, Registered>>> {
        self.collections.lock().map_err(|_| VigilError::Internal("collection registry poisoned".into()))
    }

    fn handle(&self, key: &str) -> VigilResult<CollectionHandle> {
        self.lock()?.get(key).map(|r| r.handle.clone()).ok_or_else(|| VigilError::NotFound(key.to_string()))
    }

    async fn send_series(&self, cmd: SeriesCommand) -> VigilResult<()> {
        self.series_tx.send(cmd).await.map_err(|_| VigilError::Closed("series actor".into()))
    }

    async fn ask_series(&self, cmd: SeriesCommand, rx: oneshot::Receiver<Result<(), SeriesError>>) -> VigilResult<()> {
        self.send_series(cmd).await?;
        rx.await.map_err(|_| VigilError::Closed("series actor".into()))?.map_err(VigilError::from)
    }
}

#[async_trait::async_trait]
impl StreamApi for InProcHub {
    async fn register_collection(&self, key: &str, opts: CollectionOpts) -> VigilResult<()> {
        let mut map = self.lock()?;
        if map.contains_key(key) {
            return Err(VigilError::Conflict(key.to_string()));
        }
        let cfg = PipelineConfig::from_engine(key, &self.cfg).limit(opts.limit.unwrap_or(self.cfg.limit)).alert(opts.alert);
        let (tx, handle) = spawn_pipeline(cfg);
        map.insert(key.to_string(), Registered { tx, handle });
        info!(collection = %key, alert = opts.alert, "api: collection registered");
        Ok(())
    }

    async fn push_frames(&self, key: &str, frames: Vec<RawFrame>) -> VigilResult<()> {
        let tx = self.lock()?.get(key).map(|r| r.tx.clone()).ok_or_else(|| VigilError::NotFound(key.to_string()))?;
        tx.send(Command::Frames(frames)).await.map_err(|_| VigilError::Closed(key.to_string()))
    }

    fn snapshot(&self, key: &str) -> VigilResult<Arc<CollectionSnapshot>> { Ok(self.handle(key)?.current()) }

    fn subscribe(&self, key: &str) -> VigilResult<watch::Receiver<u64>> { Ok(self.handle(key)?.subscribe_epoch()) }

    async fn unregister_collection(&self, key: &str) -> VigilResult<()> {
        let removed = self.lock()?.remove(key).ok_or_else(|| VigilError::NotFound(key.to_string()))?;
        // The actor may already have stopped; nothing is left to clear then.
        let _ = removed.tx.send(Command::Unregister).await;
        info!(collection = %key, "api: collection unregistered");
        Ok(())
    }

    async fn register_stream(&self, key: &str, config: StreamConfig) -> VigilResult<()> {
        let (reply, rx) = oneshot::channel();
        self.ask_series(SeriesCommand::Register { key: key.to_string(), config, reply: Some(reply) }, rx).await?;
        info!(stream = %key, "api: stream registered");
        Ok(())
    }

    async fn push_points(&self, key: &str, points: Vec<Value>) -> VigilResult<()> {
        if self.series.stream(key).is_none() {
            return Err(VigilError::NotFound(key.to_string()));
        }
        self.send_series(SeriesCommand::Points { key: key.to_string(), points }).await
    }

    async fn set_window(&self, target: WindowTarget, size: Option<usize>) -> VigilResult<()> {
        let (reply, rx) = oneshot::channel();
        self.ask_series(SeriesCommand::SetWindow { target, size, reply: Some(reply) }, rx).await
    }

    fn series(&self, key: &str) -> VigilResult<Arc<StreamView>> {
        self.series.stream(key).ok_or_else(|| VigilError::NotFound(key.to_string()))
    }

    fn subscribe_series(&self) -> watch::Receiver<u64> { self.series.subscribe_epoch() }

    async fn flush_series(&self) -> VigilResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send_series(SeriesCommand::Flush { reply }).await?;
        rx.await.map_err(|_| VigilError::Closed("series actor".into()))
    }

    async fn unregister_stream(&self, key: &str) -> VigilResult<()> {
        if self.series.stream(key).is_none() {
            return Err(VigilError::NotFound(key.to_string()));
        }
        self.send_series(SeriesCommand::Unregister { key: key.to_string() }).await
    }
}
