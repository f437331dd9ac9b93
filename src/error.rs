//! Failure kinds shared by the scheduled jobs.

use thiserror::Error;

use crate::cache::CacheError;
use crate::reference::ReferenceError;

/// Failure of a single pipeline stage.
///
/// Every stage maps its failures into one of these kinds so the cycle driver
/// can match on the result instead of unwinding through it: retryable kinds
/// re-run the whole cycle after a delay, the rest abandon it.
#[derive(Debug, Error)]
pub enum JobError {
    /// The feed endpoint could not be reached or answered non-2xx.
    #[error("feed download failed: {0}")]
    FeedUnavailable(String),

    /// The downloaded bytes are not a valid feed envelope.
    #[error("malformed feed envelope: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Decode succeeded but produced zero usable vehicle updates.
    #[error("feed decoded to zero usable samples")]
    EmptyResult,

    /// A document-store write (or the baseline pool read) failed.
    #[error("store operation failed: {0}")]
    Persistence(#[from] sqlx::Error),

    /// The cross-run state cache could not be read or written.
    #[error("cache operation failed: {0}")]
    Cache(#[from] CacheError),

    /// A reference table could not be loaded. Retryable: the static set may
    /// be mid-replacement when a run starts.
    #[error("reference data unreadable: {0}")]
    Reference(#[from] ReferenceError),

    /// No usable sample pool was left after outlier filtering. Never aborts
    /// a run; congestion output is skipped for the affected metric instead.
    #[error("no usable {metric} pool for baseline estimation")]
    BaselineUnavailable { metric: &'static str },
}

impl JobError {
    /// Whether the cycle driver should re-run the cycle after this failure.
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::BaselineUnavailable { .. })
    }

    /// Pipeline stage the failure belongs to, for log context.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::FeedUnavailable(_) => "download",
            Self::Decode(_) | Self::EmptyResult => "decode",
            Self::Reference(_) => "enrich",
            Self::BaselineUnavailable { .. } => "aggregate",
            Self::Persistence(_) => "persist",
            Self::Cache(_) => "state",
        }
    }
}
