//! Error taxonomy shared by the merge pipeline and the series store.
//!
//! Decode failures are per-frame and recoverable. An index desync is a logic
//! error in cache maintenance and is reported separately. Eviction is a policy
//! outcome and has no error type.

use thiserror::Error;

use crate::Severity;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record is not an object (found {0})")]
    NotAnObject(&'static str),
    #[error("record has no `id` field")]
    MissingId,
    #[error("record id must be an integer or string (found {0})")]
    InvalidId(&'static str),
}

/// The severity index was asked to shrink a block it has no record of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("severity index desync: no span for {severity} on remove")]
pub struct IndexDesyncError {
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
