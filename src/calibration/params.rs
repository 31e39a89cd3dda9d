//! Calibration parameter set: factor weights plus scalar multipliers.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const BASE_VALUE_MULTIPLIER: &str = "base_value_multiplier";
pub const VOLATILITY_ADJUSTMENT: &str = "volatility_adjustment";
pub const TREND_SENSITIVITY: &str = "trend_sensitivity";
pub const DEMAND_ELASTICITY: &str = "demand_elasticity";
pub const SUPPLY_RESPONSIVENESS: &str = "supply_responsiveness";
pub const SEASONAL_STRENGTH: &str = "seasonal_strength";

const DEFAULT_WEIGHTS: [(&str, f64); 7] = [
    ("china_demand_weight", 0.25),
    ("fuel_costs_weight", 0.20),
    ("fleet_capacity_weight", 0.15),
    ("port_congestion_weight", 0.10),
    ("geopolitical_weight", 0.10),
    ("global_growth_weight", 0.10),
    ("seasonal_weight", 0.10),
];

const DEFAULT_SCALARS: [&str; 6] = [
    BASE_VALUE_MULTIPLIER,
    VOLATILITY_ADJUSTMENT,
    TREND_SENSITIVITY,
    DEMAND_ELASTICITY,
    SUPPLY_RESPONSIVENESS,
    SEASONAL_STRENGTH,
];

/// Named model parameters. Every value is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationParameters(BTreeMap<String, f64>);

impl Default for CalibrationParameters {
    fn default() -> Self {
        let mut params = BTreeMap::new();
        for (name, weight) in DEFAULT_WEIGHTS {
            params.insert(name.to_string(), weight);
        }
        for name in DEFAULT_SCALARS {
            params.insert(name.to_string(), 1.0);
        }
        Self(params)
    }
}

impl CalibrationParameters {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn value_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    /// Scalar multiplier, neutral (1.0) when absent.
    pub fn scalar(&self, name: &str) -> f64 {
        self.value_or(name, 1.0)
    }

    /// `<factor>_weight`, or `default` when the factor has no weight.
    pub fn weight_for(&self, factor: &str, default: f64) -> f64 {
        self.value_or(&format!("{}_weight", factor), default)
    }

    /// Set a parameter. Non-finite values are ignored.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.0.insert(name.to_string(), value);
        true
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

    /// Smoothed update: `old * keep + proposed * (1 - keep)` for every parameter present in
    /// both sets. Returns the new set and the names that changed.
    pub fn blend(&self, proposed: &BTreeMap<String, f64>, keep: f64) -> (Self, Vec<String>) {
        let keep = keep.clamp(0.0, 1.0);
        let mut next = self.clone();
        let mut changed = Vec::new();

        for (name, target) in proposed {
            let Some(old) = self.get(name) else {
                continue;
            };
            if !target.is_finite() {
                continue;
            }
            let value = old * keep + target * (1.0 - keep);
            if value.is_finite() && value != old {
                next.0.insert(name.clone(), value);
                changed.push(name.clone());
            }
        }

        (next, changed)
    }

    /// Load a checkpoint. Unknown names are kept; missing names fall back to defaults.
    pub fn load_checkpoint(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
        let stored: BTreeMap<String, f64> =
            serde_json::from_str(&content).context("invalid checkpoint JSON")?;

        let mut params = Self::default();
        for (name, value) in stored {
            if !params.set(&name, value) {
                bail!("checkpoint value for {} is not finite", name);
            }
        }
        Ok(params)
    }

    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write checkpoint {}", path.display()))
    }
}
