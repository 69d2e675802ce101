//! Vigil store: frame decoding, collection merge, bounded eviction, severity
//! index and the per-collection pipeline that drives them.

#![forbid(unsafe_code)]

pub mod decode;
pub mod evict;
pub mod merge;
pub mod pipeline;
pub mod severity;

pub use decode::{decode_batch, decode_frame, decode_record};
pub use evict::Evicted;
pub use merge::{merge, MergeOpts, MergeStats, Merged};
pub use pipeline::{run_batch, spawn_pipeline, CollectionHandle, CollectionSnapshot, Command, PipelineConfig};
pub use severity::{Delta, IndexKey, SeverityIndex, SeverityIndexCache, Span};
