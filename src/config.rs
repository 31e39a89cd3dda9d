//! Forecast Engine Configuration
//!
//! Loaded from an optional TOML file, then overridden from `BDI_*` environment variables.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::MetricKind;

/// Smallest validation history the controller is allowed to keep.
pub const MIN_HISTORY_SIZE: usize = 10;

/// Main configuration for the forecast engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Cycle scheduling and tracked metrics
    pub schedule: ScheduleConfig,

    /// Ground-truth fallback chain policy
    pub fallback: FallbackPolicy,

    /// Plausible ranges and seed values per metric
    pub bounds: Vec<MetricBounds>,

    /// Prediction engine policy
    pub prediction: PredictionPolicy,

    /// Validation engine policy
    pub validation: ValidationPolicy,

    /// Calibration controller policy
    pub calibration: CalibrationPolicy,

    /// Factor analyzer policy
    pub factors: FactorPolicy,

    /// Historical series retention
    pub history: HistoryPolicy,

    /// Ground-truth sources, in priority order
    pub sources: Vec<SourceConfig>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            fallback: FallbackPolicy::default(),
            bounds: MetricKind::ALL.iter().map(|m| MetricBounds::default_for(*m)).collect(),
            prediction: PredictionPolicy::default(),
            validation: ValidationPolicy::default(),
            calibration: CalibrationPolicy::default(),
            factors: FactorPolicy::default(),
            history: HistoryPolicy::default(),
            sources: Vec::new(),
        }
    }
}

impl ForecastConfig {
    /// Load from an optional TOML file, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!("Loading config from {}", path.display());
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml(&content)?
            }
            None => {
                info!("Using default configuration");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse forecast config")
    }

    /// Override individual knobs from `BDI_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<f64>("BDI_RECALIBRATION_THRESHOLD") {
            self.calibration.recalibration_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("BDI_SMOOTHING_WEIGHT") {
            self.calibration.smoothing_weight = v;
        }
        if let Some(v) = env_parse::<f64>("BDI_MATERIALITY_THRESHOLD") {
            self.prediction.materiality_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("BDI_HISTORY_SIZE") {
            self.calibration.history_size = v;
        }
        if let Some(v) = env_parse::<u64>("BDI_CACHE_TTL_SECS") {
            self.fallback.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("BDI_STALENESS_HOURS") {
            self.fallback.staleness_bound = Duration::from_secs(v.saturating_mul(3600));
        }
        if let Some(v) = env_parse::<u64>("BDI_SOURCE_TIMEOUT_SECS") {
            self.fallback.per_source_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("BDI_CYCLE_INTERVAL_SECS") {
            self.schedule.cycle_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("BDI_FACTOR_SEED") {
            self.factors.seed = Some(v);
        }
    }

    /// Reject nonsensical settings and normalize the rest.
    pub fn validate(&mut self) -> Result<()> {
        let threshold = self.calibration.recalibration_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            bail!("recalibration_threshold must be in (0, 1], got {}", threshold);
        }
        let smoothing = self.calibration.smoothing_weight;
        if !(0.0..=1.0).contains(&smoothing) {
            bail!("smoothing_weight must be in [0, 1], got {}", smoothing);
        }
        if self.calibration.history_size < MIN_HISTORY_SIZE {
            warn!(
                requested = self.calibration.history_size,
                "validation history raised to minimum of {}", MIN_HISTORY_SIZE
            );
            self.calibration.history_size = MIN_HISTORY_SIZE;
        }
        if self.calibration.quality_window == 0 {
            bail!("quality_window must be at least 1");
        }
        if self.prediction.change_floor >= self.prediction.change_ceiling {
            bail!(
                "change_floor ({}) must be below change_ceiling ({})",
                self.prediction.change_floor,
                self.prediction.change_ceiling
            );
        }
        if self.prediction.confidence_floor > self.prediction.confidence_ceiling {
            bail!("confidence_floor must not exceed confidence_ceiling");
        }
        if self.fallback.per_source_timeout.is_zero() {
            bail!("per_source_timeout must be positive");
        }
        for bounds in &self.bounds {
            if !(bounds.min < bounds.max) {
                bail!("bounds for {} have min >= max", bounds.metric);
            }
        }
        for range in &self.factors.ranges {
            if range.min > range.max {
                bail!("factor range for {} has min > max", range.name);
            }
        }
        if self.schedule.tracked_metrics.is_empty() {
            bail!("at least one tracked metric is required");
        }
        if !self
            .schedule
            .tracked_metrics
            .contains(&self.schedule.validated_metric)
        {
            self.schedule
                .tracked_metrics
                .push(self.schedule.validated_metric);
        }
        Ok(())
    }

    /// Bounds for a metric, falling back to built-in defaults.
    pub fn bounds_for(&self, metric: MetricKind) -> MetricBounds {
        self.bounds
            .iter()
            .find(|b| b.metric == metric)
            .cloned()
            .unwrap_or_else(|| MetricBounds::default_for(metric))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Cycle scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Interval between full cycles
    #[serde(with = "duration_serde")]
    pub cycle_interval: Duration,
    /// Forecast horizon in days
    pub horizon_days: u32,
    /// Metric scored against ground truth each cycle
    pub validated_metric: MetricKind,
    /// Metrics forecast each cycle
    pub tracked_metrics: Vec<MetricKind>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(4 * 3600),
            horizon_days: 7,
            validated_metric: MetricKind::Bdi,
            tracked_metrics: MetricKind::ALL.to_vec(),
        }
    }
}

/// How sources are attempted within one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// One source at a time, in priority order
    Sequential,
    /// All sources at once; highest-priority valid result wins
    Race,
}

/// Fallback chain policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackPolicy {
    /// Upper bound on a single source call
    #[serde(with = "duration_serde")]
    pub per_source_timeout: Duration,
    /// How long an accepted observation is served from cache
    #[serde(with = "duration_serde")]
    pub cache_ttl: Duration,
    /// Observations older than this are rejected
    #[serde(with = "duration_serde")]
    pub staleness_bound: Duration,
    /// Max relative noise applied to synthesized estimates
    pub estimate_noise_pct: f64,
    pub strategy: FetchStrategy,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            per_source_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(300),
            staleness_bound: Duration::from_secs(96 * 3600),
            estimate_noise_pct: 0.02,
            strategy: FetchStrategy::Sequential,
        }
    }
}

/// Plausible value range for a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBounds {
    pub metric: MetricKind,
    pub min: f64,
    pub max: f64,
    /// Seed for synthesized estimates before any good value was seen
    pub baseline: f64,
}

impl MetricBounds {
    pub fn default_for(metric: MetricKind) -> Self {
        let (min, max, baseline) = match metric {
            MetricKind::Bdi => (250.0, 12_000.0, 1_500.0),
            MetricKind::CapesizeRate => (2_000.0, 250_000.0, 15_000.0),
            MetricKind::BunkerFuel => (150.0, 1_500.0, 600.0),
            MetricKind::PortCongestion => (0.0, 100.0, 45.0),
        };
        Self {
            metric,
            min,
            max,
            baseline,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Prediction engine policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionPolicy {
    /// Minimum |factor| reported as a contributing factor
    pub materiality_threshold: f64,
    /// Metric base confidence before history and offsets
    pub confidence_base: f64,
    pub confidence_floor: f64,
    pub confidence_ceiling: f64,
    /// Hard lower bound on the combined fractional change
    pub change_floor: f64,
    /// Hard upper bound on the combined fractional change
    pub change_ceiling: f64,
    /// Factor values are clipped to +/- this before combination
    pub factor_limit: f64,
    /// Weight used when `<factor>_weight` is not a known parameter
    pub default_factor_weight: f64,
}

impl Default for PredictionPolicy {
    fn default() -> Self {
        Self {
            materiality_threshold: 0.05,
            confidence_base: 0.70,
            confidence_floor: 0.30,
            confidence_ceiling: 0.95,
            change_floor: -0.15,
            change_ceiling: 0.20,
            factor_limit: 0.20,
            default_factor_weight: 0.1,
        }
    }
}

/// Validation engine policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// |error| below this fraction of actual counts as well calibrated
    pub bias_band_pct: f64,
    /// Historical observations considered for trend and volatility
    pub trend_window: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            bias_band_pct: 0.02,
            trend_window: 10,
        }
    }
}

/// Calibration controller policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationPolicy {
    /// Parameter updates are applied only below this accuracy
    pub recalibration_threshold: f64,
    /// Weight kept from the old value in each update
    pub smoothing_weight: f64,
    /// Retained validation history entries
    pub history_size: usize,
    /// Recent entries averaged for calibration quality
    pub quality_window: usize,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            recalibration_threshold: 0.8,
            smoothing_weight: 0.7,
            history_size: MIN_HISTORY_SIZE,
            quality_window: 5,
        }
    }
}

/// Factor analyzer policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorPolicy {
    /// Fixed RNG seed for reproducible draws
    pub seed: Option<u64>,
    /// Per-factor sampling range overrides
    pub ranges: Vec<FactorRangeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorRangeConfig {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

/// Historical series retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryPolicy {
    /// Points kept per metric
    pub capacity: usize,
    /// Optional JSON file used to seed the validated metric's history
    pub seed_path: Option<String>,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            capacity: 90,
            seed_path: None,
        }
    }
}

/// Ground-truth source definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// HTTP endpoint returning JSON
    JsonApi {
        name: String,
        metric: MetricKind,
        url: String,
        /// JSON pointer to the value, e.g. `/data/0/value`
        value_pointer: String,
        /// JSON pointer to the observation time
        timestamp_pointer: Option<String>,
        change_pointer: Option<String>,
        change_pct_pointer: Option<String>,
        /// Environment variable holding a bearer token
        api_key_env: Option<String>,
    },
    /// Local JSON file of dated points
    File {
        name: String,
        metric: MetricKind,
        path: String,
    },
    /// Seeded random walk around a baseline
    Simulated {
        name: String,
        metric: MetricKind,
        baseline: f64,
        daily_volatility: f64,
        seed: Option<u64>,
    },
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::JsonApi { name, .. }
            | SourceConfig::File { name, .. }
            | SourceConfig::Simulated { name, .. } => name,
        }
    }

    pub fn metric(&self) -> MetricKind {
        match self {
            SourceConfig::JsonApi { metric, .. }
            | SourceConfig::File { metric, .. }
            | SourceConfig::Simulated { metric, .. } => *metric,
        }
    }
}

// Durations are stored as milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
