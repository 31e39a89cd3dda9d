//! Rule-based recommendations, emitted in a fixed order.

use crate::models::{BiasDirection, CalibrationFactors};

const CRITICAL_ACCURACY: f64 = 0.6;
const TARGET_ACCURACY: f64 = 0.8;
const SCALE_TOLERANCE: f64 = 0.1;
const VOLATILITY_WARNING: f64 = 0.05;
const TREND_WARNING: f64 = 0.5;

pub fn recommendations(
    accuracy: f64,
    bias: BiasDirection,
    factors: &CalibrationFactors,
) -> Vec<String> {
    let mut out = Vec::with_capacity(5);
    let pct = accuracy * 100.0;

    out.push(if accuracy < CRITICAL_ACCURACY {
        format!(
            "CRITICAL: accuracy {:.1}% is below 60%; review factor weights and ground-truth sources",
            pct
        )
    } else if accuracy < TARGET_ACCURACY {
        format!(
            "Accuracy {:.1}% needs improvement; recalibrate factor weights against recent data",
            pct
        )
    } else {
        format!("Accuracy {:.1}% is on target; fine-tune weights for marginal gains", pct)
    });

    match bias {
        BiasDirection::OptimisticBias => out.push(
            "Predictions run high (optimistic bias): reduce demand elasticity and increase supply responsiveness"
                .to_string(),
        ),
        BiasDirection::PessimisticBias => out.push(
            "Predictions run low (pessimistic bias): increase demand elasticity and reduce supply responsiveness"
                .to_string(),
        ),
        BiasDirection::WellCalibrated | BiasDirection::Unknown => {}
    }

    let scale = factors.value_adjustment - 1.0;
    if scale.abs() > SCALE_TOLERANCE {
        out.push(format!(
            "Scale base predictions by {:+.1}% to match observed levels",
            scale * 100.0
        ));
    }

    if factors.volatility_factor.abs() > VOLATILITY_WARNING {
        out.push(format!(
            "High volatility ({:.1}% per step): widen confidence bands and raise volatility adjustment",
            factors.volatility_factor * 100.0
        ));
    }

    if factors.trend_strength < TREND_WARNING {
        out.push(format!(
            "Predicted direction disagrees with the recent trend (alignment {:.2}): review trend sensitivity",
            factors.trend_strength
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_fire_in_order() {
        let factors = CalibrationFactors {
            value_adjustment: 0.8,
            volatility_factor: 0.07,
            trend_strength: 0.2,
            seasonal_adjustment: 0.0,
        };
        let recs = recommendations(0.55, BiasDirection::OptimisticBias, &factors);
        assert_eq!(recs.len(), 5);
        assert!(recs[0].starts_with("CRITICAL"));
        assert!(recs[1].contains("optimistic bias"));
        assert!(recs[2].contains("-20.0%"));
        assert!(recs[3].contains("volatility"));
        assert!(recs[4].contains("trend"));
    }

    #[test]
    fn test_quiet_when_calibrated() {
        let factors = CalibrationFactors {
            value_adjustment: 1.02,
            volatility_factor: 0.01,
            trend_strength: 0.8,
            seasonal_adjustment: 0.1,
        };
        let recs = recommendations(0.97, BiasDirection::WellCalibrated, &factors);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("fine-tune"));
    }

    #[test]
    fn test_accuracy_tiers() {
        let factors = CalibrationFactors::default();
        let mid = recommendations(0.7, BiasDirection::PessimisticBias, &factors);
        assert!(mid[0].contains("needs improvement"));
        assert!(mid[1].contains("increase demand elasticity"));
        assert_eq!(mid.len(), 2);
    }
}
