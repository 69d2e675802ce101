//! Environment driven engine configuration (`VIGIL_*`).

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ConfigError, Limit};

pub const DEFAULT_QUEUE_CAP: usize = 2048;
pub const DEFAULT_BATCH_MS: u64 = 8;
pub const DEFAULT_SERIES_BATCH_MS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound of each pipeline's inbound command channel.
    pub queue_cap: usize,
    /// Coalescing delay before a collection merge runs.
    pub batch_interval: Duration,
    /// Coalescing delay before a series merge runs.
    pub series_batch_interval: Duration,
    /// Default collection limit for newly registered collections.
    pub limit: Limit,
    /// Default sliding window for series streams; `None` keeps everything.
    pub window: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_cap: DEFAULT_QUEUE_CAP,
            batch_interval: Duration::from_millis(DEFAULT_BATCH_MS),
            series_batch_interval: Duration::from_millis(DEFAULT_SERIES_BATCH_MS),
            limit: Limit::UNBOUNDED,
            window: None,
        }
    }
}

impl EngineConfig {
    /// Read `VIGIL_QUEUE_CAP`, `VIGIL_BATCH_MS`, `VIGIL_SERIES_BATCH_MS`,
    /// `VIGIL_LIMIT` and `VIGIL_WINDOW`. Invalid values keep the default and
    /// log a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let queue_cap = pick(&lookup, "VIGIL_QUEUE_CAP", d.queue_cap).max(1);
        let batch_ms = pick(&lookup, "VIGIL_BATCH_MS", DEFAULT_BATCH_MS);
        let series_ms = pick(&lookup, "VIGIL_SERIES_BATCH_MS", DEFAULT_SERIES_BATCH_MS);
        let limit = Limit(pick(&lookup, "VIGIL_LIMIT", 0i64));
        let window = match parse_var::<usize>(&lookup, "VIGIL_WINDOW") {
            Ok(w) => w.filter(|w| *w > 0),
            Err(e) => {
                warn!(error = %e, "ignoring VIGIL_WINDOW");
                None
            }
        };
        Self {
            queue_cap,
            batch_interval: Duration::from_millis(batch_ms),
            series_batch_interval: Duration::from_millis(series_ms),
            limit,
            window,
        }
    }
}

fn pick<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> T {
    match parse_var(lookup, name) {
        Ok(v) => v.unwrap_or(default),
        Err(e) => {
            warn!(error = %e, "using default");
            default
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
