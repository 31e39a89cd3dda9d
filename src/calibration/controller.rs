//! Calibration controller
//!
//! Single writer of the parameter set. Readers take `snapshot()` and never observe a
//! partially applied update.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::{debug, info};

use super::params::{
    CalibrationParameters, BASE_VALUE_MULTIPLIER, DEMAND_ELASTICITY, SUPPLY_RESPONSIVENESS,
    TREND_SENSITIVITY, VOLATILITY_ADJUSTMENT,
};
use crate::config::CalibrationPolicy;
use crate::models::{BiasDirection, Prediction, ValidationRecord, ValidationResult};

const QUALITY_SCALE: f64 = 1.3;
const QUALITY_FLOOR: f64 = 0.6;
const QUALITY_CEILING: f64 = 1.2;
const QUALITY_WITHOUT_HISTORY: f64 = 0.8;

const VOLATILITY_TRIGGER: f64 = 0.03;
const CORRELATION_TRIGGER: f64 = 0.6;

/// Outcome of one `maybe_recalibrate` call
#[derive(Debug, Clone, Serialize)]
pub struct Recalibration {
    pub applied: bool,
    /// Parameters whose value moved
    pub changed: Vec<String>,
    /// Targets derived from the validation, before smoothing
    pub proposed: BTreeMap<String, f64>,
    pub quality: f64,
}

pub struct CalibrationController {
    policy: CalibrationPolicy,
    confidence_bounds: (f64, f64),
    params: ArcSwap<CalibrationParameters>,
    /// Validation history; also serializes parameter writes
    history: Mutex<VecDeque<ValidationRecord>>,
    last_validation: RwLock<Option<ValidationResult>>,
}

impl CalibrationController {
    pub fn new(policy: CalibrationPolicy) -> Self {
        Self::with_parameters(policy, CalibrationParameters::default())
    }

    pub fn with_parameters(policy: CalibrationPolicy, params: CalibrationParameters) -> Self {
        let capacity = policy.history_size;
        Self {
            policy,
            confidence_bounds: (0.30, 0.95),
            params: ArcSwap::new(Arc::new(params)),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            last_validation: RwLock::new(None),
        }
    }

    pub fn with_confidence_bounds(mut self, floor: f64, ceiling: f64) -> Self {
        self.confidence_bounds = (floor, ceiling);
        self
    }

    /// Immutable view of the current parameters.
    pub fn snapshot(&self) -> Arc<CalibrationParameters> {
        self.params.load_full()
    }

    /// Replace the parameter set wholesale, e.g. from a checkpoint.
    pub fn restore(&self, params: CalibrationParameters) {
        let _writer = self.history.lock();
        self.params.store(Arc::new(params));
    }

    /// Record a validation and apply a smoothed update when accuracy is below threshold.
    ///
    /// Only applied updates enter the history.
    pub fn maybe_recalibrate(&self, validation: &ValidationResult) -> Recalibration {
        let mut history = self.history.lock();
        *self.last_validation.write() = Some(validation.clone());

        if validation.accuracy_score >= self.policy.recalibration_threshold {
            debug!(
                metric = %validation.metric,
                accuracy = validation.accuracy_score,
                "Accuracy above threshold, parameters unchanged"
            );
            return Recalibration {
                applied: false,
                changed: Vec::new(),
                proposed: BTreeMap::new(),
                quality: quality_of(&history, self.policy.quality_window),
            };
        }

        let proposed = self.propose(validation);
        let current = self.params.load();
        let (next, changed) = current.blend(&proposed, self.policy.smoothing_weight);
        self.params.store(Arc::new(next));

        history.push_back(ValidationRecord {
            timestamp: validation.validated_at,
            accuracy: validation.accuracy_score,
        });
        while history.len() > self.policy.history_size {
            history.pop_front();
        }

        let quality = quality_of(&history, self.policy.quality_window);
        info!(
            metric = %validation.metric,
            accuracy = validation.accuracy_score,
            changed = ?changed,
            quality = quality,
            "🔧 Recalibrated model parameters"
        );

        Recalibration {
            applied: true,
            changed,
            proposed,
            quality,
        }
    }

    /// Parameter targets implied by a below-threshold validation.
    pub fn propose(&self, validation: &ValidationResult) -> BTreeMap<String, f64> {
        let factors = &validation.calibration_factors;
        let mut proposed = BTreeMap::new();

        proposed.insert(BASE_VALUE_MULTIPLIER.to_string(), factors.value_adjustment);

        match validation.bias_direction {
            BiasDirection::OptimisticBias => {
                proposed.insert(DEMAND_ELASTICITY.to_string(), 0.9);
                proposed.insert(SUPPLY_RESPONSIVENESS.to_string(), 1.1);
            }
            BiasDirection::PessimisticBias => {
                proposed.insert(DEMAND_ELASTICITY.to_string(), 1.1);
                proposed.insert(SUPPLY_RESPONSIVENESS.to_string(), 0.9);
            }
            BiasDirection::WellCalibrated | BiasDirection::Unknown => {}
        }

        if factors.volatility_factor.abs() > VOLATILITY_TRIGGER {
            proposed.insert(VOLATILITY_ADJUSTMENT.to_string(), 1.2);
        }
        if validation.correlation_coefficient < CORRELATION_TRIGGER {
            proposed.insert(TREND_SENSITIVITY.to_string(), 1.3);
        }

        proposed
    }

    /// Confidence discount from recent accuracy.
    pub fn calibration_quality(&self) -> f64 {
        quality_of(&self.history.lock(), self.policy.quality_window)
    }

    /// Derive the calibrated prediction from a base one.
    pub fn apply(&self, base: &Prediction) -> Prediction {
        let params = self.snapshot();
        let multiplier = params.scalar(BASE_VALUE_MULTIPLIER);
        let transform = base.metric.transform();

        let scaled = transform.bound(base.predicted_value * multiplier);
        let predicted_value = if scaled.is_finite() {
            scaled
        } else {
            base.predicted_value
        };

        let (floor, ceiling) = self.confidence_bounds;
        let confidence = (base.confidence * self.calibration_quality()).clamp(floor, ceiling);

        Prediction {
            predicted_value,
            confidence,
            calibration_applied: true,
            validation_score: self.last_accuracy(),
            ..base.clone()
        }
    }

    /// Accuracy of the most recent validation, recalibrated or not.
    pub fn last_accuracy(&self) -> Option<f64> {
        self.last_validation.read().as_ref().map(|v| v.accuracy_score)
    }

    pub fn last_validation(&self) -> Option<ValidationResult> {
        self.last_validation.read().clone()
    }

    /// Most recent `n` history entries, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<ValidationRecord> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).copied().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

fn quality_of(history: &VecDeque<ValidationRecord>, window: usize) -> f64 {
    if history.is_empty() {
        return QUALITY_WITHOUT_HISTORY;
    }
    let skip = history.len().saturating_sub(window.max(1));
    let mean = history.iter().skip(skip).map(|r| r.accuracy).mean();
    if !mean.is_finite() {
        return QUALITY_WITHOUT_HISTORY;
    }
    (mean * QUALITY_SCALE).clamp(QUALITY_FLOOR, QUALITY_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CalibrationFactors, MetricKind};
    use chrono::Utc;
    use uuid::Uuid;

    fn validation(accuracy: f64, bias: BiasDirection, factors: CalibrationFactors) -> ValidationResult {
        ValidationResult {
            cycle_id: Uuid::new_v4(),
            metric: MetricKind::Bdi,
            validated_at: Utc::now(),
            actual_value: 1000.0,
            predicted_value: Some(1000.0 / factors.value_adjustment),
            ground_truth_source: "baltic".into(),
            ground_truth_estimated: false,
            accuracy_score: accuracy,
            mean_absolute_error: 10.0,
            correlation_coefficient: factors.trend_strength,
            bias_direction: bias,
            recommendations: Vec::new(),
            calibration_factors: factors,
        }
    }

    fn poor_factors() -> CalibrationFactors {
        CalibrationFactors {
            value_adjustment: 0.8,
            volatility_factor: 0.06,
            trend_strength: 0.3,
            seasonal_adjustment: 0.0,
        }
    }

    fn base_prediction() -> Prediction {
        Prediction {
            metric: MetricKind::Bdi,
            current_value: 1850.0,
            predicted_value: 1914.75,
            confidence: 0.75,
            horizon_days: 7,
            contributing_factors: vec!["china_demand".into()],
            calibration_applied: false,
            validation_score: None,
            created_at: Utc::now(),
            based_on_estimate: false,
        }
    }

    #[test]
    fn test_accurate_validation_leaves_parameters_unchanged() {
        let controller = CalibrationController::new(CalibrationPolicy::default());
        let before = controller.snapshot();

        let outcome = controller.maybe_recalibrate(&validation(
            0.95,
            BiasDirection::OptimisticBias,
            poor_factors(),
        ));
        assert!(!outcome.applied);
        assert_eq!(*controller.snapshot(), *before);
        assert_eq!(controller.history_len(), 0);
        assert_eq!(controller.calibration_quality(), 0.8);
        assert_eq!(controller.last_accuracy(), Some(0.95));
    }

    #[test]
    fn test_update_is_smoothed_between_old_and_target() {
        let controller = CalibrationController::new(CalibrationPolicy::default());
        let before = controller.snapshot();

        let v = validation(0.55, BiasDirection::OptimisticBias, poor_factors());
        let outcome = controller.maybe_recalibrate(&v);
        assert!(outcome.applied);

        let after = controller.snapshot();
        for (name, target) in &outcome.proposed {
            let old = before.scalar(name);
            let new = after.scalar(name);
            let (lo, hi) = if old <= *target { (old, *target) } else { (*target, old) };
            assert!(new >= lo - 1e-12 && new <= hi + 1e-12, "{}: {} not in [{}, {}]", name, new, lo, hi);
        }
        assert!((after.scalar(BASE_VALUE_MULTIPLIER) - 0.94).abs() < 1e-12);
        assert!((after.scalar(DEMAND_ELASTICITY) - 0.97).abs() < 1e-12);
        assert!((after.scalar(SUPPLY_RESPONSIVENESS) - 1.03).abs() < 1e-12);
        assert!((after.scalar(VOLATILITY_ADJUSTMENT) - 1.06).abs() < 1e-12);
        assert!((after.scalar(TREND_SENSITIVITY) - 1.09).abs() < 1e-12);
        // Weights are untouched
        assert_eq!(after.weight_for("china_demand", 0.1), 0.25);
    }

    #[test]
    fn test_pessimistic_bias_reverses_elasticities() {
        let controller = CalibrationController::new(CalibrationPolicy::default());
        let proposed = controller.propose(&validation(
            0.7,
            BiasDirection::PessimisticBias,
            CalibrationFactors::default(),
        ));
        assert_eq!(proposed[DEMAND_ELASTICITY], 1.1);
        assert_eq!(proposed[SUPPLY_RESPONSIVENESS], 0.9);
        assert!(!proposed.contains_key(VOLATILITY_ADJUSTMENT));
        assert!(proposed.contains_key(TREND_SENSITIVITY));
    }

    #[test]
    fn test_default_result_below_threshold_recalibrates() {
        let controller = CalibrationController::new(CalibrationPolicy::default());
        let mut v = validation(0.75, BiasDirection::Unknown, CalibrationFactors::default());
        v.predicted_value = None;
        v.correlation_coefficient = 0.65;

        let outcome = controller.maybe_recalibrate(&v);
        assert!(outcome.applied);
        assert_eq!(outcome.proposed.get(BASE_VALUE_MULTIPLIER), Some(&1.0));
        assert_eq!(controller.history_len(), 1);
        assert!((outcome.quality - 0.75 * 1.3).abs() < 1e-9);

        let mut estimated = validation(0.4, BiasDirection::OptimisticBias, poor_factors());
        estimated.ground_truth_estimated = true;
        assert!(controller.maybe_recalibrate(&estimated).applied);
        assert_eq!(controller.history_len(), 2);
        assert!(controller.snapshot().scalar(DEMAND_ELASTICITY) < 1.0);
    }

    #[test]
    fn test_last_accuracy_tracks_latest_validation() {
        let controller = CalibrationController::new(CalibrationPolicy::default());
        assert_eq!(controller.last_accuracy(), None);

        let mut v = validation(0.75, BiasDirection::Unknown, CalibrationFactors::default());
        v.predicted_value = None;
        controller.maybe_recalibrate(&v);
        assert_eq!(controller.last_accuracy(), Some(0.75));

        // Not recorded in history, still the latest validation
        controller.maybe_recalibrate(&validation(
            0.92,
            BiasDirection::WellCalibrated,
            CalibrationFactors::default(),
        ));
        assert_eq!(controller.history_len(), 1);
        assert_eq!(controller.last_accuracy(), Some(0.92));
        assert_eq!(controller.apply(&base_prediction()).validation_score, Some(0.92));
    }

    #[test]
    fn test_calibration_quality() {
        let controller = CalibrationController::new(CalibrationPolicy::default());
        assert_eq!(controller.calibration_quality(), 0.8);

        for accuracy in [0.1, 0.1, 0.7, 0.7, 0.7, 0.7, 0.7, 0.95] {
            controller.maybe_recalibrate(&validation(
                accuracy,
                BiasDirection::WellCalibrated,
                CalibrationFactors::default(),
            ));
        }
        // 0.95 is above threshold and not recorded; last five are 0.7
        assert_eq!(controller.history_len(), 7);
        assert!((controller.calibration_quality() - 0.91).abs() < 1e-9);

        let low = CalibrationController::new(CalibrationPolicy::default());
        low.maybe_recalibrate(&validation(
            0.2,
            BiasDirection::WellCalibrated,
            CalibrationFactors::default(),
        ));
        assert_eq!(low.calibration_quality(), 0.6);
    }

    #[test]
    fn test_history_is_capped() {
        let controller = CalibrationController::new(CalibrationPolicy::default());
        for i in 0..25 {
            controller.maybe_recalibrate(&validation(
                0.5 + i as f64 * 0.001,
                BiasDirection::WellCalibrated,
                CalibrationFactors::default(),
            ));
        }
        assert_eq!(controller.history_len(), 10);
        let recent = controller.recent_history(3);
        assert_eq!(recent.len(), 3);
        assert!((recent[2].accuracy - 0.524).abs() < 1e-9);
    }

    #[test]
    fn test_apply_derives_calibrated_prediction() {
        let mut params = CalibrationParameters::default();
        params.set(BASE_VALUE_MULTIPLIER, 1.1);
        let controller = CalibrationController::with_parameters(CalibrationPolicy::default(), params);

        let base = base_prediction();
        let calibrated = controller.apply(&base);
        assert!(calibrated.calibration_applied);
        assert!(!base.calibration_applied);
        assert!((calibrated.predicted_value - 1914.75 * 1.1).abs() < 1e-9);
        // No history: quality 0.8
        assert!((calibrated.confidence - 0.6).abs() < 1e-12);
        assert_eq!(calibrated.validation_score, None);
        assert_eq!(calibrated.current_value, base.current_value);
    }

    #[test]
    fn test_apply_keeps_additive_metrics_in_bounds() {
        let mut params = CalibrationParameters::default();
        params.set(BASE_VALUE_MULTIPLIER, 1.5);
        let controller = CalibrationController::with_parameters(CalibrationPolicy::default(), params);

        let mut base = base_prediction();
        base.metric = MetricKind::PortCongestion;
        base.current_value = 80.0;
        base.predicted_value = 90.0;
        base.confidence = 0.1;

        let calibrated = controller.apply(&base);
        assert_eq!(calibrated.predicted_value, 100.0);
        assert_eq!(calibrated.confidence, 0.30);
    }
}
