//! Prometheus Metrics for the Forecast Loop

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Forecast loop metrics registry
///
/// Rendered in Prometheus text exposition format
#[derive(Debug, Default)]
pub struct ForecastMetrics {
    /// Successful fetches per source
    pub source_success: RwLock<BTreeMap<String, AtomicU64>>,

    /// Failed, timed-out or rejected fetches per source
    pub source_failure: RwLock<BTreeMap<String, AtomicU64>>,

    /// Fetches answered from the TTL cache
    pub cache_hits: AtomicU64,

    /// Fetches answered with a synthesized estimate
    pub fallback_estimates: AtomicU64,

    /// Completed cycles
    pub cycles_total: AtomicU64,

    /// Cycles that applied a parameter update
    pub recalibrations_total: AtomicU64,

    /// Last accuracy score (f64 bits)
    last_accuracy: AtomicU64,

    /// Current calibration quality (f64 bits)
    calibration_quality: AtomicU64,
}

impl ForecastMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_source(&self, source: &str, success: bool) {
        let map = if success {
            &self.source_success
        } else {
            &self.source_failure
        };
        if let Some(counter) = map.read().get(source) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        map.write()
            .entry(source.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_estimate(&self) {
        self.fallback_estimates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle(&self, recalibrated: bool) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        if recalibrated {
            self.recalibrations_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_last_accuracy(&self, accuracy: f64) {
        self.last_accuracy.store(accuracy.to_bits(), Ordering::Relaxed);
    }

    pub fn set_calibration_quality(&self, quality: f64) {
        self.calibration_quality
            .store(quality.to_bits(), Ordering::Relaxed);
    }

    pub fn last_accuracy(&self) -> f64 {
        f64::from_bits(self.last_accuracy.load(Ordering::Relaxed))
    }

    pub fn source_count(&self, source: &str, success: bool) -> u64 {
        let map = if success {
            &self.source_success
        } else {
            &self.source_failure
        };
        map.read()
            .get(source)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Export all metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP bdi_source_fetch_success_total Successful ground-truth fetches\n");
        output.push_str("# TYPE bdi_source_fetch_success_total counter\n");
        for (source, count) in self.source_success.read().iter() {
            output.push_str(&format!(
                "bdi_source_fetch_success_total{{source=\"{}\"}} {}\n",
                source,
                count.load(Ordering::Relaxed)
            ));
        }

        output.push_str("\n# HELP bdi_source_fetch_failure_total Failed or rejected ground-truth fetches\n");
        output.push_str("# TYPE bdi_source_fetch_failure_total counter\n");
        for (source, count) in self.source_failure.read().iter() {
            output.push_str(&format!(
                "bdi_source_fetch_failure_total{{source=\"{}\"}} {}\n",
                source,
                count.load(Ordering::Relaxed)
            ));
        }

        let counters = [
            ("bdi_ground_truth_cache_hits_total", "Fetches served from cache", &self.cache_hits),
            (
                "bdi_fallback_estimates_total",
                "Fetches answered with a synthesized estimate",
                &self.fallback_estimates,
            ),
            ("bdi_cycles_total", "Completed forecast cycles", &self.cycles_total),
            (
                "bdi_recalibrations_total",
                "Cycles that applied a parameter update",
                &self.recalibrations_total,
            ),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!(
                "\n# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }

        output.push_str("\n# HELP bdi_last_accuracy Accuracy score of the last validation\n");
        output.push_str("# TYPE bdi_last_accuracy gauge\n");
        output.push_str(&format!("bdi_last_accuracy {}\n", self.last_accuracy()));

        output.push_str("\n# HELP bdi_calibration_quality Current calibration quality factor\n");
        output.push_str("# TYPE bdi_calibration_quality gauge\n");
        output.push_str(&format!(
            "bdi_calibration_quality {}\n",
            f64::from_bits(self.calibration_quality.load(Ordering::Relaxed))
        ));

        output
    }
}
