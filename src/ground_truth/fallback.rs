//! Ground-Truth Fallback Chain
//!
//! Tries sources in priority order until one returns a plausible, fresh reading:
//! - every source call is bounded by the per-source timeout and never retried within a fetch
//! - accepted observations are cached per metric for a short TTL
//! - when every source fails, a noisy estimate around the last known good value is synthesized
//!
//! `fetch` never fails; callers inspect [`Provenance`] to discount estimated data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::source::{FetchError, GroundTruthSource, InvalidReason, SourceReading};
use crate::config::{FallbackPolicy, FetchStrategy, MetricBounds};
use crate::models::{MetricKind, MetricObservation, FALLBACK_ESTIMATE_SOURCE};
use crate::telemetry::ForecastMetrics;

/// Where the returned observation came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    Live { source: String },
    Cached { source: String },
    Estimated,
}

/// Outcome of one source attempt within a fetch
#[derive(Debug, Clone)]
pub struct SourceAttempt {
    pub source: String,
    /// `None` when the reading was accepted
    pub error: Option<FetchError>,
}

/// Result of a chain fetch. Always carries a usable observation.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub observation: MetricObservation,
    pub provenance: Provenance,
    pub attempts: Vec<SourceAttempt>,
}

impl FetchOutcome {
    pub fn is_estimate(&self) -> bool {
        matches!(self.provenance, Provenance::Estimated)
    }
}

#[derive(Debug, Clone)]
struct CachedObservation {
    observation: MetricObservation,
    stored_at: Instant,
}

type AttemptResult = Result<MetricObservation, FetchError>;

pub struct FallbackChain {
    sources: Vec<Arc<dyn GroundTruthSource>>,
    policy: FallbackPolicy,
    bounds: HashMap<MetricKind, MetricBounds>,
    /// Last accepted observation per metric
    cache: Mutex<HashMap<MetricKind, CachedObservation>>,
    rng: Mutex<StdRng>,
    metrics: Arc<ForecastMetrics>,
}

impl FallbackChain {
    pub fn new(
        mut sources: Vec<Arc<dyn GroundTruthSource>>,
        policy: FallbackPolicy,
        bounds: Vec<MetricBounds>,
        metrics: Arc<ForecastMetrics>,
    ) -> Self {
        // Stable: equal priorities keep configuration order
        sources.sort_by_key(|s| s.priority());

        let mut bounds_map: HashMap<MetricKind, MetricBounds> = MetricKind::ALL
            .iter()
            .map(|m| (*m, MetricBounds::default_for(*m)))
            .collect();
        for b in bounds {
            bounds_map.insert(b.metric, b);
        }

        Self {
            sources,
            policy,
            bounds: bounds_map,
            cache: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            metrics,
        }
    }

    /// Deterministic estimate noise.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    /// Latest accepted observation for a metric, regardless of TTL.
    pub fn last_known_good(&self, metric: MetricKind) -> Option<MetricObservation> {
        self.cache
            .lock()
            .get(&metric)
            .map(|c| c.observation.clone())
    }

    /// Drop the cached observation so the next fetch goes to the sources.
    pub fn invalidate(&self, metric: MetricKind) {
        self.cache.lock().remove(&metric);
    }

    /// Fetch the current ground truth for `metric`. Never fails.
    pub async fn fetch(&self, metric: MetricKind) -> FetchOutcome {
        if let Some(observation) = self.fresh_cached(metric) {
            self.metrics.record_cache_hit();
            debug!(metric = %metric, source = %observation.source, "Ground truth served from cache");
            return FetchOutcome {
                provenance: Provenance::Cached {
                    source: observation.source.clone(),
                },
                observation,
                attempts: Vec::new(),
            };
        }

        let (accepted, attempts) = match self.policy.strategy {
            FetchStrategy::Sequential => self.fetch_sequential(metric).await,
            FetchStrategy::Race => self.fetch_race(metric).await,
        };

        if let Some(observation) = accepted {
            self.cache.lock().insert(
                metric,
                CachedObservation {
                    observation: observation.clone(),
                    stored_at: Instant::now(),
                },
            );
            info!(
                metric = %metric,
                source = %observation.source,
                value = observation.value,
                "📡 Ground truth accepted"
            );
            return FetchOutcome {
                provenance: Provenance::Live {
                    source: observation.source.clone(),
                },
                observation,
                attempts,
            };
        }

        self.metrics.record_fallback_estimate();
        let observation = self.estimate(metric);
        warn!(
            metric = %metric,
            attempted = attempts.len(),
            estimate = observation.value,
            "🛑 All ground-truth sources exhausted, using fallback estimate"
        );
        FetchOutcome {
            observation,
            provenance: Provenance::Estimated,
            attempts,
        }
    }

    fn fresh_cached(&self, metric: MetricKind) -> Option<MetricObservation> {
        let cache = self.cache.lock();
        let cached = cache.get(&metric)?;
        (cached.stored_at.elapsed() < self.policy.cache_ttl).then(|| cached.observation.clone())
    }

    async fn fetch_sequential(
        &self,
        metric: MetricKind,
    ) -> (Option<MetricObservation>, Vec<SourceAttempt>) {
        let candidates = self.candidates(metric);
        let mut attempts = Vec::with_capacity(candidates.len());

        for source in &candidates {
            let result = self.attempt(source.as_ref(), metric).await;
            match result {
                Ok(observation) => {
                    attempts.push(SourceAttempt {
                        source: source.name().to_string(),
                        error: None,
                    });
                    return (Some(observation), attempts);
                }
                Err(err) => attempts.push(SourceAttempt {
                    source: source.name().to_string(),
                    error: Some(err),
                }),
            }
        }

        (None, attempts)
    }

    /// Launch every source at once. A result is accepted as soon as all higher-priority
    /// sources have failed, so priority still breaks ties between concurrent successes.
    async fn fetch_race(
        &self,
        metric: MetricKind,
    ) -> (Option<MetricObservation>, Vec<SourceAttempt>) {
        let candidates = self.candidates(metric);
        let mut pending: FuturesUnordered<_> = candidates
            .iter()
            .enumerate()
            .map(move |(idx, source)| {
                let source = source.clone();
                async move { (idx, self.attempt(source.as_ref(), metric).await) }
            })
            .collect();

        let mut slots: Vec<Option<AttemptResult>> = vec![None; candidates.len()];

        while let Some((idx, result)) = pending.next().await {
            slots[idx] = Some(result);
            if let Some(winner) = race_winner(&slots) {
                let observation = match slots[winner].take() {
                    Some(Ok(observation)) => observation,
                    _ => continue,
                };
                // Remaining futures are dropped here; their results are discarded.
                let attempts = collect_attempts(&candidates, &slots, Some(winner));
                return (Some(observation), attempts);
            }
        }

        let attempts = collect_attempts(&candidates, &slots, None);
        (None, attempts)
    }

    /// Sources tracking `metric`, in priority order.
    fn candidates(&self, metric: MetricKind) -> Vec<Arc<dyn GroundTruthSource>> {
        self.sources
            .iter()
            .filter(|s| s.supports(metric))
            .cloned()
            .collect()
    }

    /// One bounded call to a source plus sanity validation.
    async fn attempt(&self, source: &dyn GroundTruthSource, metric: MetricKind) -> AttemptResult {
        let name = source.name().to_string();

        if !source.supports(metric) {
            return Err(FetchError::Unsupported {
                source: name,
                metric,
            });
        }

        let started = Instant::now();
        let result = match timeout(self.policy.per_source_timeout, source.fetch(metric)).await {
            Err(_) => Err(FetchError::Timeout {
                source: name.clone(),
                after: self.policy.per_source_timeout,
            }),
            Ok(Err(e)) => Err(FetchError::Unavailable {
                source: name.clone(),
                reason: format!("{:#}", e),
            }),
            Ok(Ok(reading)) => self.validate_reading(&name, metric, reading),
        };

        match &result {
            Ok(_) => {
                self.metrics.record_source(&name, true);
                debug!(
                    source = %name,
                    metric = %metric,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Source reading passed validation"
                );
            }
            Err(err) => {
                self.metrics.record_source(&name, false);
                warn!(source = %name, metric = %metric, error = %err, "⚠️ Ground-truth source failed");
            }
        }

        result
    }

    fn validate_reading(
        &self,
        source: &str,
        metric: MetricKind,
        reading: SourceReading,
    ) -> AttemptResult {
        let invalid = |reason| FetchError::Invalid {
            source: source.to_string(),
            reason,
        };

        if !reading.value.is_finite() {
            return Err(invalid(InvalidReason::NotFinite));
        }

        let bounds = self.bounds_for(metric);
        if !bounds.contains(reading.value) {
            return Err(invalid(InvalidReason::OutOfRange {
                value: reading.value,
                min: bounds.min,
                max: bounds.max,
            }));
        }

        // Future-dated readings count as fresh
        let age = (Utc::now() - reading.observed_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > self.policy.staleness_bound {
            return Err(invalid(InvalidReason::Stale {
                age,
                bound: self.policy.staleness_bound,
            }));
        }

        Ok(MetricObservation {
            metric,
            timestamp: reading.observed_at,
            value: reading.value,
            change: sanitize(reading.change_abs),
            change_pct: sanitize(reading.change_pct),
            source: source.to_string(),
            is_estimate: false,
        })
    }

    /// Last known good value (or the metric baseline) perturbed by bounded noise.
    fn estimate(&self, metric: MetricKind) -> MetricObservation {
        let bounds = self.bounds_for(metric);
        let base = self
            .last_known_good(metric)
            .map(|o| o.value)
            .unwrap_or(bounds.baseline);

        let pct = self.policy.estimate_noise_pct.abs();
        let noise = self.rng.lock().gen_range(-pct..=pct);
        let value = (base * (1.0 + noise)).clamp(bounds.min, bounds.max);

        MetricObservation {
            metric,
            timestamp: Utc::now(),
            value,
            change: 0.0,
            change_pct: 0.0,
            source: FALLBACK_ESTIMATE_SOURCE.to_string(),
            is_estimate: true,
        }
    }

    fn bounds_for(&self, metric: MetricKind) -> MetricBounds {
        self.bounds
            .get(&metric)
            .cloned()
            .unwrap_or_else(|| MetricBounds::default_for(metric))
    }
}

/// Index of the first successful slot with every earlier slot completed and failed.
fn race_winner(slots: &[Option<AttemptResult>]) -> Option<usize> {
    for (idx, slot) in slots.iter().enumerate() {
        match slot {
            None => return None,
            Some(Ok(_)) => return Some(idx),
            Some(Err(_)) => continue,
        }
    }
    None
}

/// Attempt log for a race: the winner plus every completed failure.
fn collect_attempts(
    sources: &[Arc<dyn GroundTruthSource>],
    slots: &[Option<AttemptResult>],
    winner: Option<usize>,
) -> Vec<SourceAttempt> {
    slots
        .iter()
        .zip(sources)
        .enumerate()
        .filter_map(|(idx, (slot, source))| {
            let source = source.name().to_string();
            if Some(idx) == winner {
                return Some(SourceAttempt {
                    source,
                    error: None,
                });
            }
            match slot {
                Some(Err(err)) => Some(SourceAttempt {
                    source,
                    error: Some(err.clone()),
                }),
                _ => None,
            }
        })
        .collect()
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
