//! Ground-truth source contract and per-attempt results.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::MetricKind;

/// Raw reading returned by a source before sanity validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReading {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    pub change_abs: f64,
    pub change_pct: f64,
}

impl SourceReading {
    pub fn new(value: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            observed_at,
            change_abs: 0.0,
            change_pct: 0.0,
        }
    }

    /// Fill change fields from the previous value.
    pub fn with_previous(mut self, previous: f64) -> Self {
        self.change_abs = self.value - previous;
        self.change_pct = if previous.abs() > f64::EPSILON {
            self.change_abs / previous * 100.0
        } else {
            0.0
        };
        self
    }
}

/// A provider of the latest observed value of a metric.
///
/// Implementations may scrape, call an API or compute; the fallback chain bounds every call
/// with its own timeout, so a slow source is simply abandoned.
#[async_trait::async_trait]
pub trait GroundTruthSource: Send + Sync {
    fn name(&self) -> &str;

    /// Lower = tried first
    fn priority(&self) -> u8 {
        100
    }

    fn supports(&self, _metric: MetricKind) -> bool {
        true
    }

    async fn fetch(&self, metric: MetricKind) -> Result<SourceReading>;
}

/// Why a reading was rejected by sanity validation
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidReason {
    NotFinite,
    OutOfRange { value: f64, min: f64, max: f64 },
    Stale { age: Duration, bound: Duration },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFinite => write!(f, "value is not finite"),
            Self::OutOfRange { value, min, max } => {
                write!(f, "value {} outside plausible range [{}, {}]", value, min, max)
            }
            Self::Stale { age, bound } => write!(
                f,
                "observation is {}s old (bound {}s)",
                age.as_secs(),
                bound.as_secs()
            ),
        }
    }
}

/// Result of a single failed source attempt. Recovered inside the chain, never surfaced.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Source raised an error
    Unavailable { source: String, reason: String },
    /// Source exceeded the per-call timeout
    Timeout { source: String, after: Duration },
    /// Source answered with an implausible or stale value
    Invalid { source: String, reason: InvalidReason },
    /// Source does not track the requested metric
    Unsupported { source: String, metric: MetricKind },
}

impl FetchError {
    pub fn source_name(&self) -> &str {
        match self {
            Self::Unavailable { source, .. }
            | Self::Timeout { source, .. }
            | Self::Invalid { source, .. }
            | Self::Unsupported { source, .. } => source,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { source, reason } => write!(f, "{} unavailable: {}", source, reason),
            Self::Timeout { source, after } => {
                write!(f, "{} timed out after {}ms", source, after.as_millis())
            }
            Self::Invalid { source, reason } => write!(f, "{} returned invalid data: {}", source, reason),
            Self::Unsupported { source, metric } => {
                write!(f, "{} does not provide {}", source, metric)
            }
        }
    }
}

impl std::error::Error for FetchError {}
