//! Window store: per-stream point accumulation with a sliding series window.
//!
//! Items evicted from the front of a series are archived, not discarded.
//! Disabling the window prepends everything archived back onto its point.

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::point::{meta_key, MetaFields, StreamConfig, StreamPoint};
use crate::SeriesError;

/// Series items evicted from one point in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveEntry {
    pub evicted_at_ms: i64,
    pub point_index: usize,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowTarget {
    Stream(String),
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowSetting {
    Inherit,
    Own(Option<usize>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub created: usize,
    pub merged: usize,
    pub skipped: usize,
    pub archived: usize,
}

#[derive(Debug)]
struct StreamState {
    config: StreamConfig,
    setting: WindowSetting,
    meta_fields: Option<MetaFields>,
    points: Vec<StreamPoint>,
    by_key: FxHashMap<String, usize>,
    archive: Vec<ArchiveEntry>,
}

impl StreamState {
    fn new(config: StreamConfig) -> Self {
        // A zero window means no window, as in `set_window`.
        let setting = match config.window.filter(|w| *w > 0) {
            Some(w) => WindowSetting::Own(Some(w)),
            None => WindowSetting::Inherit,
        };
        Self { config, setting, meta_fields: None, points: Vec::new(), by_key: FxHashMap::default(), archive: Vec::new() }
    }

    fn window(&self, global: Option<usize>) -> Option<usize> {
        match self.setting {
            WindowSetting::Inherit => global,
            WindowSetting::Own(w) => w,
        }
    }

    /// Trim each series to `window`, archiving what falls off the front.
    fn evict(&mut self, window: usize, now_ms: i64) -> usize {
        let mut archived = 0;
        for (point_index, p) in self.points.iter_mut().enumerate() {
            let series = p.series_mut();
            if series.len() > window {
                let excess = series.len() - window;
                let items: Vec<Value> = series.drain(..excess).collect();
                archived += items.len();
                self.archive.push(ArchiveEntry { evicted_at_ms: now_ms, point_index, items });
            }
        }
        archived
    }

    /// Prepend archived items back onto their points, oldest first.
    fn restore(&mut self) -> usize {
        if self.archive.is_empty() {
            return 0;
        }
        let mut per_point: Vec<Vec<Value>> = vec![Vec::new(); self.points.len()];
        for entry in self.archive.drain(..) {
            if let Some(slot) = per_point.get_mut(entry.point_index) {
                slot.extend(entry.items);
            }
        }
        let mut restored = 0;
        for (p, mut older) in self.points.iter_mut().zip(per_point) {
            if older.is_empty() {
                continue;
            }
            restored += older.len();
            let series = p.series_mut();
            older.append(series);
            *series = older;
        }
        restored
    }

    fn apply_window(&mut self, window: Option<usize>, key: &str) {
        match window {
            None => {
                let restored = self.restore();
                if restored > 0 {
                    debug!(stream = %key, restored, "window disabled; archive restored");
                }
            }
            Some(w) => {
                let archived = self.evict(w, now_ms());
                if archived > 0 {
                    metrics::counter!("series_archived_items_total", archived as u64);
                }
            }
        }
    }
}

/// All registered streams of one dashboard session.
#[derive(Debug, Default)]
pub struct WindowStore {
    streams: FxHashMap<String, StreamState>,
    global_window: Option<usize>,
}

impl WindowStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_window(window: Option<usize>) -> Self { Self { streams: FxHashMap::default(), global_window: window } }

    pub fn global_window(&self) -> Option<usize> { self.global_window }

    pub fn contains(&self, key: &str) -> bool { self.streams.contains_key(key) }

    pub fn keys(&self) -> impl Iterator<Item = &str> { self.streams.keys().map(String::as_str) }

    pub fn register_stream(&mut self, key: impl Into<String>, config: StreamConfig) -> Result<(), SeriesError> {
        let key = key.into();
        if self.streams.contains_key(&key) {
            return Err(SeriesError::AlreadyRegistered(key));
        }
        debug!(stream = %key, series_field = %config.series_field, window = ?config.window, "stream registered");
        self.streams.insert(key, StreamState::new(config));
        Ok(())
    }

    /// Drop a stream with its points and archive.
    pub fn unregister_stream(&mut self, key: &str) -> bool { self.streams.remove(key).is_some() }

    /// Merge `points` into the stream by meta-key, then apply its window.
    pub fn update(&mut self, key: &str, points: Vec<Value>) -> Result<UpdateReport, SeriesError> {
        let global = self.global_window;
        let state = self.streams.get_mut(key).ok_or_else(|| SeriesError::UnknownStream(key.to_string()))?;
        let mut report = UpdateReport::default();
        for point in points {
            let fields = match point {
                Value::Object(m) => m,
                other => {
                    warn!(stream = %key, found = vigil_core::json_type(&other), "skipping non-object point");
                    report.skipped += 1;
                    continue;
                }
            };
            let meta = state.meta_fields.get_or_insert_with(|| state.config.infer_meta_fields(&fields));
            let mk = meta_key(&fields, meta.as_slice());
            match state.by_key.get(&mk).copied() {
                Some(i) => {
                    state.points[i].absorb(fields);
                    report.merged += 1;
                }
                None => {
                    state.by_key.insert(mk.clone(), state.points.len());
                    state.points.push(StreamPoint::new(mk, &state.config.series_field, fields));
                    report.created += 1;
                }
            }
        }
        if let Some(w) = state.window(global) {
            report.archived = state.evict(w, now_ms());
            if report.archived > 0 {
                metrics::counter!("series_archived_items_total", report.archived as u64);
            }
        }
        metrics::gauge!("series_points", state.points.len() as f64, "stream" => key.to_string());
        Ok(report)
    }

    /// Change the window of one stream or of every stream. `None` restores
    /// the archive; `Some(n)` trims immediately.
    pub fn set_window(&mut self, target: WindowTarget, size: Option<usize>) -> Result<(), SeriesError> {
        let size = size.filter(|n| *n > 0);
        match target {
            WindowTarget::Stream(key) => {
                let state = self.streams.get_mut(&key).ok_or_else(|| SeriesError::UnknownStream(key.clone()))?;
                state.setting = WindowSetting::Own(size);
                state.apply_window(size, &key);
            }
            WindowTarget::Global => {
                self.global_window = size;
                for (key, state) in self.streams.iter_mut() {
                    state.setting = WindowSetting::Inherit;
                    state.apply_window(size, key);
                }
            }
        }
        Ok(())
    }

    pub fn points(&self, key: &str) -> Option<&[StreamPoint]> { self.streams.get(key).map(|s| s.points.as_slice()) }

    pub fn archive(&self, key: &str) -> Option<&[ArchiveEntry]> { self.streams.get(key).map(|s| s.archive.as_slice()) }

    /// Total archived series items of a stream.
    pub fn archived_len(&self, key: &str) -> usize {
        self.streams.get(key).map(|s| s.archive.iter().map(|e| e.items.len()).sum()).unwrap_or(0)
    }

    pub fn window(&self, key: &str) -> Option<usize> {
        self.streams.get(key).and_then(|s| s.window(self.global_window))
    }

    pub fn config(&self, key: &str) -> Option<&StreamConfig> { self.streams.get(key).map(|s| &s.config) }
}

fn now_ms() -> i64 { chrono::Utc::now().timestamp_millis() }
