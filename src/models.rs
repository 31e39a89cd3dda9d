//! Shared data model for the forecast / validate / calibrate loop.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source tag carried by synthesized observations.
pub const FALLBACK_ESTIMATE_SOURCE: &str = "fallback_estimate";

/// Metrics the engine forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Baltic Dry Index
    Bdi,
    /// Capesize 5TC average time-charter rate (USD/day)
    CapesizeRate,
    /// VLSFO bunker price (USD/mt)
    BunkerFuel,
    /// Port congestion index (0-100)
    PortCongestion,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Bdi,
        MetricKind::CapesizeRate,
        MetricKind::BunkerFuel,
        MetricKind::PortCongestion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Bdi => "bdi",
            MetricKind::CapesizeRate => "capesize_rate",
            MetricKind::BunkerFuel => "bunker_fuel",
            MetricKind::PortCongestion => "port_congestion",
        }
    }

    /// How a fractional change is turned into a predicted value.
    pub fn transform(&self) -> ValueTransform {
        match self {
            MetricKind::PortCongestion => ValueTransform::Additive {
                scale: 100.0,
                floor: 0.0,
                ceiling: 100.0,
            },
            _ => ValueTransform::Multiplicative,
        }
    }

    /// Fixed per-metric confidence offset.
    pub fn confidence_offset(&self) -> f64 {
        match self {
            MetricKind::Bdi => 0.05,
            MetricKind::CapesizeRate => 0.0,
            MetricKind::BunkerFuel => -0.05,
            MetricKind::PortCongestion => -0.10,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bdi" => Ok(MetricKind::Bdi),
            "capesize_rate" | "capesize" => Ok(MetricKind::CapesizeRate),
            "bunker_fuel" | "fuel" => Ok(MetricKind::BunkerFuel),
            "port_congestion" | "congestion" => Ok(MetricKind::PortCongestion),
            other => Err(anyhow::anyhow!("unknown metric: {}", other)),
        }
    }
}

/// Value transform applied to the bounded fractional change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueTransform {
    /// `current * (1 + change)`
    Multiplicative,
    /// `current + change * scale`, clipped to `[floor, ceiling]`
    Additive { scale: f64, floor: f64, ceiling: f64 },
}

impl ValueTransform {
    pub fn apply(&self, current: f64, change: f64) -> f64 {
        match *self {
            ValueTransform::Multiplicative => current * (1.0 + change),
            ValueTransform::Additive {
                scale,
                floor,
                ceiling,
            } => (current + change * scale).clamp(floor, ceiling),
        }
    }

    /// Re-apply index bounds after a value has been rescaled.
    pub fn bound(&self, value: f64) -> f64 {
        match *self {
            ValueTransform::Multiplicative => value,
            ValueTransform::Additive { floor, ceiling, .. } => value.clamp(floor, ceiling),
        }
    }
}

/// A single observed value of a tracked metric. Never mutated; superseded by newer observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub metric: MetricKind,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Day-over-day absolute change
    pub change: f64,
    /// Day-over-day change in percent
    pub change_pct: f64,
    pub source: String,
    /// True when the value was synthesized because no source produced a valid reading
    #[serde(default)]
    pub is_estimate: bool,
}

/// Named market factors for one forecast cycle. Values are signed fractional drivers of change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactorSet(BTreeMap<String, f64>);

impl FactorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    /// Missing factors read as zero.
    pub fn get(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy with every value clipped to `[-limit, limit]`; non-finite values become zero.
    pub fn clipped(&self, limit: f64) -> FactorSet {
        FactorSet(
            self.0
                .iter()
                .map(|(k, v)| {
                    let v = if v.is_finite() { v.clamp(-limit, limit) } else { 0.0 };
                    (k.clone(), v)
                })
                .collect(),
        )
    }
}

impl FromIterator<(String, f64)> for FactorSet {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        FactorSet(iter.into_iter().collect())
    }
}

/// Forecast for one metric. A calibrated prediction is a new value derived from a base one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub metric: MetricKind,
    pub current_value: f64,
    pub predicted_value: f64,
    /// In [0, 1]
    pub confidence: f64,
    pub horizon_days: u32,
    /// Factors whose magnitude exceeded the materiality threshold
    pub contributing_factors: Vec<String>,
    pub calibration_applied: bool,
    pub validation_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    /// True when `current_value` came from a synthesized estimate
    #[serde(default)]
    pub based_on_estimate: bool,
}

impl Prediction {
    /// Fractional move implied by the forecast.
    pub fn implied_change(&self) -> f64 {
        if self.current_value.abs() < f64::EPSILON {
            return 0.0;
        }
        (self.predicted_value - self.current_value) / self.current_value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasDirection {
    WellCalibrated,
    OptimisticBias,
    PessimisticBias,
    Unknown,
}

impl BiasDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasDirection::WellCalibrated => "well_calibrated",
            BiasDirection::OptimisticBias => "optimistic_bias",
            BiasDirection::PessimisticBias => "pessimistic_bias",
            BiasDirection::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BiasDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correction signals derived from a validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFactors {
    /// actual / predicted (1.0 when undefined)
    pub value_adjustment: f64,
    /// Std-dev of recent relative changes
    pub volatility_factor: f64,
    pub trend_strength: f64,
    pub seasonal_adjustment: f64,
}

impl Default for CalibrationFactors {
    fn default() -> Self {
        Self {
            value_adjustment: 1.0,
            volatility_factor: 0.0,
            trend_strength: 0.5,
            seasonal_adjustment: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub cycle_id: Uuid,
    pub metric: MetricKind,
    pub validated_at: DateTime<Utc>,
    pub actual_value: f64,
    pub predicted_value: Option<f64>,
    pub ground_truth_source: String,
    pub ground_truth_estimated: bool,
    /// In [0, 1]
    pub accuracy_score: f64,
    pub mean_absolute_error: f64,
    /// In [0, 1]
    pub correlation_coefficient: f64,
    pub bias_direction: BiasDirection,
    pub recommendations: Vec<String>,
    pub calibration_factors: CalibrationFactors,
}

/// One entry of the bounded validation history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub timestamp: DateTime<Utc>,
    pub accuracy: f64,
}
