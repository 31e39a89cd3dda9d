//! Weighted-factor forecast per metric

use chrono::Utc;

use super::factors::{
    CHINA_DEMAND, FLEET_CAPACITY, FUEL_COSTS, GEOPOLITICAL, GLOBAL_GROWTH, PORT_CONGESTION,
    SEASONAL,
};
use crate::calibration::params::{
    CalibrationParameters, DEMAND_ELASTICITY, SEASONAL_STRENGTH, SUPPLY_RESPONSIVENESS,
    TREND_SENSITIVITY, VOLATILITY_ADJUSTMENT,
};
use crate::config::PredictionPolicy;
use crate::models::{FactorSet, MetricKind, MetricObservation, Prediction};

/// Capesize rates move harder than the headline index
const CAPESIZE_BETA: f64 = 1.4;

/// Pure forecast function over factors and a parameter snapshot.
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    policy: PredictionPolicy,
}

impl PredictionEngine {
    pub fn new(policy: PredictionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PredictionPolicy {
        &self.policy
    }

    /// Forecast one metric from its current observation.
    pub fn predict_metric(
        &self,
        current: &MetricObservation,
        factors: &FactorSet,
        params: &CalibrationParameters,
        horizon_days: u32,
        last_accuracy: Option<f64>,
    ) -> Prediction {
        let metric = current.metric;
        let change = self.weighted_change(metric, factors, params);
        let predicted_value = metric.transform().apply(current.value, change);

        Prediction {
            metric,
            current_value: current.value,
            predicted_value,
            confidence: self.confidence(metric, last_accuracy),
            horizon_days,
            contributing_factors: self.contributing_factors(factors),
            calibration_applied: false,
            validation_score: None,
            created_at: Utc::now(),
            based_on_estimate: current.is_estimate,
        }
    }

    /// Bounded fractional change for a metric.
    pub fn weighted_change(
        &self,
        metric: MetricKind,
        factors: &FactorSet,
        params: &CalibrationParameters,
    ) -> f64 {
        let factors = factors.clipped(self.policy.factor_limit);

        let raw = match metric {
            MetricKind::Bdi => self.generic_sum(&factors, params),
            MetricKind::CapesizeRate => self.generic_sum(&factors, params) * CAPESIZE_BETA,
            MetricKind::BunkerFuel => {
                factors.get(FUEL_COSTS) * 0.6
                    + factors.get(GEOPOLITICAL) * 0.3
                    + factors.get(GLOBAL_GROWTH) * 0.1
            }
            MetricKind::PortCongestion => {
                factors.get(PORT_CONGESTION) * 0.5
                    + factors.get(SEASONAL) * 0.3
                    + factors.get(CHINA_DEMAND) * 0.2
            }
        };

        let scaled = raw * params.scalar(VOLATILITY_ADJUSTMENT) * params.scalar(TREND_SENSITIVITY);
        if !scaled.is_finite() {
            return 0.0;
        }
        scaled.clamp(self.policy.change_floor, self.policy.change_ceiling)
    }

    /// Sum of factor x weight, with demand / supply / seasonal elasticities.
    fn generic_sum(&self, factors: &FactorSet, params: &CalibrationParameters) -> f64 {
        factors
            .iter()
            .map(|(name, value)| {
                let elasticity = match name {
                    CHINA_DEMAND | GLOBAL_GROWTH => params.scalar(DEMAND_ELASTICITY),
                    FLEET_CAPACITY | PORT_CONGESTION => params.scalar(SUPPLY_RESPONSIVENESS),
                    SEASONAL => params.scalar(SEASONAL_STRENGTH),
                    _ => 1.0,
                };
                value * params.weight_for(name, self.policy.default_factor_weight) * elasticity
            })
            .sum()
    }

    /// Base confidence + history adjustment + metric offset, clipped.
    pub fn confidence(&self, metric: MetricKind, last_accuracy: Option<f64>) -> f64 {
        let history_adj = last_accuracy
            .filter(|a| a.is_finite())
            .map(|a| (a - 0.5) * 0.4)
            .unwrap_or(0.0);
        let confidence = self.policy.confidence_base + history_adj + metric.confidence_offset();
        confidence.clamp(self.policy.confidence_floor, self.policy.confidence_ceiling)
    }

    /// Factors above the materiality threshold, largest first.
    pub fn contributing_factors(&self, factors: &FactorSet) -> Vec<String> {
        let mut material: Vec<(&str, f64)> = factors
            .iter()
            .filter(|(_, v)| v.is_finite() && v.abs() > self.policy.materiality_threshold)
            .collect();
        material.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        material.into_iter().map(|(name, _)| name.to_string()).collect()
    }
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self::new(PredictionPolicy::default())
    }
}
