//! Scores predictions against observed ground truth.

use chrono::{Datelike, Utc};
use statrs::statistics::Statistics;
use tracing::{debug, info};
use uuid::Uuid;

use super::recommendations::recommendations;
use crate::config::ValidationPolicy;
use crate::models::{
    BiasDirection, CalibrationFactors, MetricObservation, Prediction, ValidationResult,
};
use crate::prediction::SeasonalRegime;

const DEFAULT_ACCURACY: f64 = 0.75;
const DEFAULT_MAE: f64 = 150.0;
const DEFAULT_CORRELATION: f64 = 0.65;

/// Trend alignment with too little history to judge
const NEUTRAL_TREND: f64 = 0.5;
const SHORT_HISTORY_TREND: f64 = 0.7;

/// Guard for relative errors and ratios
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct ValidationEngine {
    policy: ValidationPolicy,
}

impl ValidationEngine {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Validate predictions for the ground truth's metric.
    ///
    /// `history` holds recent observed values of that metric, oldest first.
    /// Never fails: with no matching prediction a documented default result is returned.
    pub fn validate(
        &self,
        predictions: &[Prediction],
        ground_truth: &MetricObservation,
        history: &[f64],
    ) -> ValidationResult {
        let metric = ground_truth.metric;
        let actual = ground_truth.value;

        let matching: Vec<&Prediction> = predictions
            .iter()
            .filter(|p| p.metric == metric && p.predicted_value.is_finite())
            .collect();

        let window = self.window(history);
        let volatility_factor = volatility(window);
        let seasonal_adjustment =
            SeasonalRegime::for_month(ground_truth.timestamp.month()).midpoint();

        let (predicted_value, accuracy, mae, correlation, bias, value_adjustment) =
            match matching.iter().max_by_key(|p| p.created_at) {
                None => {
                    debug!(metric = %metric, "No prediction to validate, using defaults");
                    (
                        None,
                        DEFAULT_ACCURACY,
                        DEFAULT_MAE,
                        DEFAULT_CORRELATION,
                        BiasDirection::Unknown,
                        1.0,
                    )
                }
                Some(latest) => {
                    let n = matching.len() as f64;
                    let mean_predicted = matching.iter().map(|p| p.predicted_value).sum::<f64>() / n;
                    let mae = matching
                        .iter()
                        .map(|p| (p.predicted_value - actual).abs())
                        .sum::<f64>()
                        / n;
                    let mean_signed = mean_predicted - actual;

                    let relative_error = mae / actual.abs().max(EPSILON);
                    let accuracy = (1.0 - relative_error).clamp(0.0, 1.0);
                    let bias = self.classify_bias(mean_signed, actual);
                    let correlation = self.trend_correlation(latest, window);

                    let value_adjustment = if mean_predicted.abs() < EPSILON {
                        1.0
                    } else {
                        let ratio = actual / mean_predicted;
                        if ratio.is_finite() {
                            ratio
                        } else {
                            1.0
                        }
                    };

                    (
                        Some(mean_predicted),
                        accuracy,
                        mae,
                        correlation,
                        bias,
                        value_adjustment,
                    )
                }
            };

        let calibration_factors = CalibrationFactors {
            value_adjustment,
            volatility_factor,
            trend_strength: correlation,
            seasonal_adjustment,
        };

        let result = ValidationResult {
            cycle_id: Uuid::new_v4(),
            metric,
            validated_at: Utc::now(),
            actual_value: actual,
            predicted_value,
            ground_truth_source: ground_truth.source.clone(),
            ground_truth_estimated: ground_truth.is_estimate,
            accuracy_score: accuracy,
            mean_absolute_error: mae,
            correlation_coefficient: correlation,
            bias_direction: bias,
            recommendations: recommendations(accuracy, bias, &calibration_factors),
            calibration_factors,
        };

        info!(
            metric = %metric,
            actual = actual,
            accuracy = result.accuracy_score,
            bias = %result.bias_direction,
            "🎯 Validation complete"
        );
        result
    }

    /// Signed error within the band is well calibrated.
    pub fn classify_bias(&self, signed_error: f64, actual: f64) -> BiasDirection {
        if !signed_error.is_finite() {
            return BiasDirection::Unknown;
        }
        if signed_error.abs() < self.policy.bias_band_pct * actual.abs() {
            BiasDirection::WellCalibrated
        } else if signed_error > 0.0 {
            BiasDirection::OptimisticBias
        } else {
            BiasDirection::PessimisticBias
        }
    }

    /// Agreement between the predicted move and the recent 3-point trend, in [0, 1].
    pub fn trend_correlation(&self, prediction: &Prediction, window: &[f64]) -> f64 {
        if window.len() < 3 {
            return NEUTRAL_TREND;
        }
        if window.len() < self.policy.trend_window {
            return SHORT_HISTORY_TREND;
        }

        let start = window[window.len() - 3];
        let end = window[window.len() - 1];
        if start.abs() < EPSILON {
            return NEUTRAL_TREND;
        }
        let historical = (end - start) / start;
        let predicted = prediction.implied_change();
        let strength = (historical.abs() * 10.0).min(1.0);

        let score = if predicted * historical >= 0.0 {
            0.6 + 0.3 * strength
        } else {
            0.4 - 0.3 * strength
        };
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            NEUTRAL_TREND
        }
    }

    fn window<'a>(&self, history: &'a [f64]) -> &'a [f64] {
        let skip = history.len().saturating_sub(self.policy.trend_window);
        &history[skip..]
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new(ValidationPolicy::default())
    }
}

/// Sample std-dev of consecutive relative changes; 0 with fewer than 3 points.
fn volatility(window: &[f64]) -> f64 {
    if window.len() < 3 {
        return 0.0;
    }
    let changes: Vec<f64> = window
        .windows(2)
        .filter(|pair| pair[0].abs() > EPSILON)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .filter(|c| c.is_finite())
        .collect();
    if changes.len() < 2 {
        return 0.0;
    }
    let std_dev = changes.iter().std_dev();
    if std_dev.is_finite() {
        std_dev
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricKind;
    use chrono::{Duration, TimeZone};

    fn truth(value: f64) -> MetricObservation {
        MetricObservation {
            metric: MetricKind::Bdi,
            timestamp: Utc.with_ymd_and_hms(2024, 10, 15, 0, 0, 0).unwrap(),
            value,
            change: 0.0,
            change_pct: 0.0,
            source: "baltic".into(),
            is_estimate: false,
        }
    }

    fn prediction(current: f64, predicted: f64) -> Prediction {
        Prediction {
            metric: MetricKind::Bdi,
            current_value: current,
            predicted_value: predicted,
            confidence: 0.75,
            horizon_days: 7,
            contributing_factors: Vec::new(),
            calibration_applied: false,
            validation_score: None,
            created_at: Utc::now(),
            based_on_estimate: false,
        }
    }

    #[test]
    fn test_bias_classification() {
        let engine = ValidationEngine::default();
        let cases = [
            (1015.0, BiasDirection::WellCalibrated),
            (1050.0, BiasDirection::OptimisticBias),
            (950.0, BiasDirection::PessimisticBias),
        ];
        for (predicted, expected) in cases {
            let result = engine.validate(&[prediction(1000.0, predicted)], &truth(1000.0), &[]);
            assert_eq!(result.bias_direction, expected, "predicted {}", predicted);
        }
    }

    #[test]
    fn test_accuracy_and_value_adjustment() {
        let engine = ValidationEngine::default();
        let result = engine.validate(&[prediction(1000.0, 1050.0)], &truth(1000.0), &[]);
        assert!((result.accuracy_score - 0.95).abs() < 1e-12);
        assert!((result.mean_absolute_error - 50.0).abs() < 1e-12);
        assert!((result.calibration_factors.value_adjustment - 1000.0 / 1050.0).abs() < 1e-12);
        assert_eq!(result.predicted_value, Some(1050.0));
        assert_eq!(result.ground_truth_source, "baltic");
    }

    #[test]
    fn test_default_result_without_matching_prediction() {
        let engine = ValidationEngine::default();
        let mut other = prediction(600.0, 610.0);
        other.metric = MetricKind::BunkerFuel;

        let result = engine.validate(&[other], &truth(1800.0), &[]);
        assert_eq!(result.accuracy_score, 0.75);
        assert_eq!(result.mean_absolute_error, 150.0);
        assert_eq!(result.correlation_coefficient, 0.65);
        assert_eq!(result.bias_direction, BiasDirection::Unknown);
        assert_eq!(result.predicted_value, None);
        assert_eq!(result.calibration_factors.value_adjustment, 1.0);
        assert!(!result.recommendations.is_empty());
    }

    #[test]
    fn test_accuracy_is_clipped_and_zero_guarded() {
        let engine = ValidationEngine::default();
        let wild = engine.validate(&[prediction(1000.0, 9000.0)], &truth(1000.0), &[]);
        assert_eq!(wild.accuracy_score, 0.0);

        let zero_pred = engine.validate(&[prediction(1000.0, 0.0)], &truth(1000.0), &[]);
        assert_eq!(zero_pred.calibration_factors.value_adjustment, 1.0);
        assert!((0.0..=1.0).contains(&zero_pred.accuracy_score));

        let zero_actual = engine.validate(&[prediction(10.0, 5.0)], &truth(0.0), &[]);
        assert_eq!(zero_actual.accuracy_score, 0.0);
    }

    #[test]
    fn test_multiple_predictions_use_mean_error() {
        let engine = ValidationEngine::default();
        let mut older = prediction(1000.0, 1100.0);
        older.created_at = Utc::now() - Duration::hours(4);
        let newer = prediction(1000.0, 900.0);

        let result = engine.validate(&[older, newer], &truth(1000.0), &[]);
        assert!((result.mean_absolute_error - 100.0).abs() < 1e-12);
        assert!((result.accuracy_score - 0.9).abs() < 1e-12);
        // Signed errors cancel out
        assert_eq!(result.bias_direction, BiasDirection::WellCalibrated);
    }

    #[test]
    fn test_trend_correlation_defaults_and_alignment() {
        let engine = ValidationEngine::default();
        let rising = prediction(1000.0, 1050.0);
        let falling = prediction(1000.0, 950.0);

        assert_eq!(engine.trend_correlation(&rising, &[1000.0, 1010.0]), 0.5);
        assert_eq!(engine.trend_correlation(&rising, &[1000.0, 1010.0, 1020.0]), 0.7);

        // Ten points ending in a +5% three-point move: strength 0.5
        let history = [
            1000.0, 1000.0, 1000.0, 1000.0, 1000.0, 1000.0, 1000.0, 1000.0, 1020.0, 1050.0,
        ];
        let aligned = engine.trend_correlation(&rising, &history);
        let misaligned = engine.trend_correlation(&falling, &history);
        assert!((aligned - 0.75).abs() < 1e-9);
        assert!((misaligned - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_and_seasonal_factors() {
        let engine = ValidationEngine::default();
        let flat = [1000.0; 10];
        let result = engine.validate(&[prediction(1000.0, 1000.0)], &truth(1000.0), &flat);
        assert_eq!(result.calibration_factors.volatility_factor, 0.0);
        // October is peak season
        assert!((result.calibration_factors.seasonal_adjustment - 0.10).abs() < 1e-12);

        let choppy = [1000.0, 1100.0, 1000.0, 1100.0, 1000.0];
        let result = engine.validate(&[prediction(1000.0, 1000.0)], &truth(1000.0), &choppy);
        assert!(result.calibration_factors.volatility_factor > 0.05);
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("volatility")));
    }
}
