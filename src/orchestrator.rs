//! Forecast cycle driver
//!
//! One cycle: validate the previous forecast against fresh ground truth, maybe recalibrate,
//! forecast every tracked metric, apply calibration. Owns all loop state; nothing is global.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calibration::{CalibrationController, CalibrationParameters, Recalibration};
use crate::config::{ForecastConfig, SourceConfig};
use crate::ground_truth::{
    build_sources, FallbackChain, GroundTruthSource, HistoryStore, Provenance,
};
use crate::models::{
    FactorSet, MetricKind, MetricObservation, Prediction, ValidationRecord, ValidationResult,
};
use crate::prediction::{FactorAnalyzer, PredictionEngine, RandomFactorAnalyzer};
use crate::telemetry::ForecastMetrics;
use crate::validation::ValidationEngine;

/// Validation history entries shown on the dashboard
const DASHBOARD_HISTORY: usize = 10;

/// Forecast for one metric within a cycle
#[derive(Debug, Clone, Serialize)]
pub struct MetricForecast {
    pub metric: MetricKind,
    pub observation: MetricObservation,
    pub provenance: Provenance,
    pub base: Prediction,
    pub calibrated: Prediction,
}

/// Everything one cycle produced
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ground_truth: MetricObservation,
    pub ground_truth_provenance: Provenance,
    pub validation: ValidationResult,
    pub recalibration: Recalibration,
    pub factors: FactorSet,
    pub forecasts: Vec<MetricForecast>,
}

/// Read-only view for a UI or CLI
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub ground_truth: Option<MetricObservation>,
    pub last_validation: Option<ValidationResult>,
    pub parameters: CalibrationParameters,
    pub calibration_quality: f64,
    pub validation_history: Vec<ValidationRecord>,
    pub recommendations: Vec<String>,
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Default)]
struct LoopState {
    /// Uncalibrated forecasts of the last cycle; scored by the next validation
    base_predictions: Vec<Prediction>,
    predictions: Vec<Prediction>,
    ground_truth: Option<MetricObservation>,
    cycles: u64,
}

pub struct Orchestrator {
    config: ForecastConfig,
    chain: FallbackChain,
    analyzer: Arc<dyn FactorAnalyzer>,
    engine: PredictionEngine,
    validator: ValidationEngine,
    controller: CalibrationController,
    history: HistoryStore,
    metrics: Arc<ForecastMetrics>,
    /// One fetch-and-forecast in flight per metric
    cycle_locks: [AsyncMutex<()>; 4],
    state: RwLock<LoopState>,
}

impl Orchestrator {
    pub fn new(
        config: ForecastConfig,
        sources: Vec<Arc<dyn GroundTruthSource>>,
        analyzer: Arc<dyn FactorAnalyzer>,
        metrics: Arc<ForecastMetrics>,
    ) -> Self {
        let mut chain = FallbackChain::new(
            sources,
            config.fallback.clone(),
            config.bounds.clone(),
            metrics.clone(),
        );
        if let Some(seed) = config.factors.seed {
            chain = chain.with_seed(seed);
        }

        let controller = CalibrationController::new(config.calibration.clone())
            .with_confidence_bounds(
                config.prediction.confidence_floor,
                config.prediction.confidence_ceiling,
            );
        metrics.set_calibration_quality(controller.calibration_quality());

        Self {
            engine: PredictionEngine::new(config.prediction.clone()),
            validator: ValidationEngine::new(config.validation.clone()),
            history: HistoryStore::new(config.history.capacity),
            chain,
            analyzer,
            controller,
            metrics,
            cycle_locks: std::array::from_fn(|_| AsyncMutex::new(())),
            state: RwLock::new(LoopState::default()),
            config,
        }
    }

    /// Build sources and the random analyzer from configuration, and seed history.
    ///
    /// With no sources configured each tracked metric gets a simulated feed.
    pub async fn from_config(config: ForecastConfig, metrics: Arc<ForecastMetrics>) -> Result<Self> {
        let source_configs = if config.sources.is_empty() {
            warn!("⚠️ No ground-truth sources configured, using simulated feeds");
            simulated_defaults(&config)
        } else {
            config.sources.clone()
        };
        let sources = build_sources(&source_configs, config.fallback.per_source_timeout)?;
        let analyzer: Arc<dyn FactorAnalyzer> = Arc::new(RandomFactorAnalyzer::new(&config.factors));

        let seed_path = config.history.seed_path.clone();
        let validated = config.schedule.validated_metric;
        let orchestrator = Self::new(config, sources, analyzer, metrics);

        if let Some(path) = seed_path {
            if let Err(e) = orchestrator
                .history
                .seed_from_file(Path::new(&path), validated)
                .await
            {
                warn!(path = %path, error = %e, "⚠️ Could not seed history");
            }
        }

        Ok(orchestrator)
    }

    pub fn controller(&self) -> &CalibrationController {
        &self.controller
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn metrics(&self) -> &Arc<ForecastMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn source_names(&self) -> Vec<String> {
        self.chain.source_names()
    }

    async fn lock_metric(&self, metric: MetricKind) -> AsyncMutexGuard<'_, ()> {
        self.cycle_locks[metric as usize].lock().await
    }

    /// Run one full cycle. Never fails; degraded inputs fall back to defaults.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let validated = self.config.schedule.validated_metric;
        info!(cycle_id = %cycle_id, "🔄 Starting forecast cycle");

        let (truth, validation, recalibration) = {
            let _guard = self.lock_metric(validated).await;
            let truth = self.chain.fetch(validated).await;
            self.history.record(&truth.observation);

            let previous = self.state.read().base_predictions.clone();
            let series = self
                .history
                .recent_values(validated, self.config.validation.trend_window);
            let mut validation = self.validator.validate(&previous, &truth.observation, &series);
            validation.cycle_id = cycle_id;

            let recalibration = self.controller.maybe_recalibrate(&validation);
            (truth, validation, recalibration)
        };

        if validation.predicted_value.is_some() {
            self.metrics.set_last_accuracy(validation.accuracy_score);
        }
        self.metrics.set_calibration_quality(recalibration.quality);

        let factors = self.analyzer.analyze().await;
        debug!(factors = ?factors, "Market factors for cycle");

        let forecasts = join_all(self.config.schedule.tracked_metrics.iter().map(|&metric| {
            let known = (metric == validated)
                .then(|| (truth.observation.clone(), truth.provenance.clone()));
            self.forecast_metric(metric, &factors, known)
        }))
        .await;

        {
            let mut state = self.state.write();
            state.base_predictions = forecasts.iter().map(|f| f.base.clone()).collect();
            state.predictions = forecasts.iter().map(|f| f.calibrated.clone()).collect();
            state.ground_truth = Some(truth.observation.clone());
            state.cycles += 1;
        }
        self.metrics.record_cycle(recalibration.applied);

        let finished_at = Utc::now();
        info!(
            cycle_id = %cycle_id,
            accuracy = validation.accuracy_score,
            recalibrated = recalibration.applied,
            forecasts = forecasts.len(),
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "✅ Forecast cycle complete"
        );

        CycleReport {
            cycle_id,
            started_at,
            finished_at,
            ground_truth: truth.observation,
            ground_truth_provenance: truth.provenance,
            validation,
            recalibration,
            factors,
            forecasts,
        }
    }

    async fn forecast_metric(
        &self,
        metric: MetricKind,
        factors: &FactorSet,
        known: Option<(MetricObservation, Provenance)>,
    ) -> MetricForecast {
        let _guard = self.lock_metric(metric).await;

        let (observation, provenance) = match known {
            Some(known) => known,
            None => {
                let outcome = self.chain.fetch(metric).await;
                self.history.record(&outcome.observation);
                (outcome.observation, outcome.provenance)
            }
        };

        let params = self.controller.snapshot();
        let base = self.engine.predict_metric(
            &observation,
            factors,
            &params,
            self.config.schedule.horizon_days,
            self.controller.last_accuracy(),
        );
        let calibrated = self.controller.apply(&base);

        debug!(
            metric = %metric,
            current = observation.value,
            base = base.predicted_value,
            calibrated = calibrated.predicted_value,
            confidence = calibrated.confidence,
            "Forecast ready"
        );

        MetricForecast {
            metric,
            observation,
            provenance,
            base,
            calibrated,
        }
    }

    /// Drive cycles on a fixed interval until `shutdown` resolves.
    pub async fn run<S, C>(&self, interval: Duration, shutdown: S, mut on_cycle: C)
    where
        S: Future<Output = ()>,
        C: FnMut(&CycleReport),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_secs = interval.as_secs(), "🚀 Forecast loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("🛑 Forecast loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    on_cycle(&report);
                }
            }
        }
    }

    pub fn dashboard(&self) -> DashboardSnapshot {
        let state = self.state.read();
        let last_validation = self.controller.last_validation();
        let recommendations = last_validation
            .as_ref()
            .map(|v| v.recommendations.clone())
            .unwrap_or_default();

        DashboardSnapshot {
            generated_at: Utc::now(),
            ground_truth: state.ground_truth.clone(),
            last_validation,
            parameters: (*self.controller.snapshot()).clone(),
            calibration_quality: self.controller.calibration_quality(),
            validation_history: self.controller.recent_history(DASHBOARD_HISTORY),
            recommendations,
            predictions: state.predictions.clone(),
        }
    }

    pub fn cycles_completed(&self) -> u64 {
        self.state.read().cycles
    }
}

fn simulated_defaults(config: &ForecastConfig) -> Vec<SourceConfig> {
    config
        .schedule
        .tracked_metrics
        .iter()
        .map(|&metric| SourceConfig::Simulated {
            name: format!("simulated_{}", metric),
            metric,
            baseline: config.bounds_for(metric).baseline,
            daily_volatility: 0.02,
            seed: config.factors.seed,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_defaults_cover_tracked_metrics() {
        let config = ForecastConfig::default();
        let sources = simulated_defaults(&config);
        assert_eq!(sources.len(), MetricKind::ALL.len());
        assert_eq!(sources[0].name(), "simulated_bdi");
    }

    #[tokio::test]
    async fn test_first_cycle_uses_default_validation() {
        let mut config = ForecastConfig::default();
        config.factors.seed = Some(3);
        let orchestrator = Orchestrator::from_config(config, Arc::new(ForecastMetrics::new()))
            .await
            .unwrap();

        let report = orchestrator.run_cycle().await;
        assert_eq!(report.validation.accuracy_score, 0.75);
        assert_eq!(report.validation.predicted_value, None);
        // 0.75 is below the 0.8 threshold
        assert!(report.recalibration.applied);
        assert_eq!(report.forecasts.len(), 4);

        // Confidence reads the validation just computed: 0.70 + 0.10 + 0.05
        let bdi = report
            .forecasts
            .iter()
            .find(|f| f.metric == MetricKind::Bdi)
            .unwrap();
        assert!((bdi.base.confidence - 0.85).abs() < 1e-9);
        assert_eq!(bdi.calibrated.validation_score, Some(0.75));
        assert!(report.forecasts.iter().all(|f| f.calibrated.calibration_applied));
        assert_eq!(orchestrator.cycles_completed(), 1);

        let dashboard = orchestrator.dashboard();
        assert_eq!(dashboard.predictions.len(), 4);
        assert!(dashboard.ground_truth.is_some());
        assert!((dashboard.calibration_quality - 0.75 * 1.3).abs() < 1e-9);
        assert_eq!(dashboard.validation_history.len(), 1);
    }
}
