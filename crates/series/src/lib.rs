//! Vigil series: windowed time-series accumulation with archive and restore.

#![forbid(unsafe_code)]

pub mod actor;
pub mod point;
pub mod store;

pub use actor::{spawn_series, SeriesCommand, SeriesConfig, SeriesHandle, SeriesWorld, StreamView};
pub use point::{meta_key, stable_stringify, StreamConfig, StreamPoint, DEFAULT_SERIES_FIELD};
pub use store::{ArchiveEntry, UpdateReport, WindowStore, WindowTarget};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeriesError {
    #[error("unknown stream: {0}")]
    UnknownStream(String),
    #[error("stream already registered: {0}")]
    AlreadyRegistered(String),
}
