//! Bounded per-metric historical series

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::sources::load_series;
use crate::models::{MetricKind, MetricObservation};

/// In-memory series of live observations, oldest first.
///
/// Estimates are never recorded so trend and volatility only see real reads.
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    series: RwLock<HashMap<MetricKind, VecDeque<MetricObservation>>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an observation. Returns false when it was skipped.
    pub fn record(&self, observation: &MetricObservation) -> bool {
        if observation.is_estimate || !observation.value.is_finite() {
            return false;
        }

        let mut series = self.series.write();
        let points = series
            .entry(observation.metric)
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        match points
            .iter()
            .rposition(|p| p.timestamp <= observation.timestamp)
        {
            Some(idx) if points[idx].timestamp == observation.timestamp => {
                points[idx] = observation.clone();
            }
            Some(idx) => points.insert(idx + 1, observation.clone()),
            None => points.push_front(observation.clone()),
        }

        while points.len() > self.capacity {
            points.pop_front();
        }
        true
    }

    pub fn series(&self, metric: MetricKind) -> Vec<MetricObservation> {
        self.series
            .read()
            .get(&metric)
            .map(|points| points.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Values of the most recent `n` points, oldest first.
    pub fn recent_values(&self, metric: MetricKind, n: usize) -> Vec<f64> {
        let series = self.series.read();
        let Some(points) = series.get(&metric) else {
            return Vec::new();
        };
        let skip = points.len().saturating_sub(n);
        points.iter().skip(skip).map(|p| p.value).collect()
    }

    pub fn latest(&self, metric: MetricKind) -> Option<MetricObservation> {
        self.series
            .read()
            .get(&metric)
            .and_then(|points| points.back().cloned())
    }

    pub fn len(&self, metric: MetricKind) -> usize {
        self.series.read().get(&metric).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, metric: MetricKind) -> bool {
        self.len(metric) == 0
    }

    /// Seed a metric's history from a JSON series file.
    pub async fn seed_from_file(&self, path: &Path, metric: MetricKind) -> Result<usize> {
        let observations = load_series(path, metric, "history_seed").await?;
        let recorded = observations.iter().filter(|obs| self.record(obs)).count();
        info!(
            metric = %metric,
            points = recorded,
            "📚 Seeded history from {}",
            path.display()
        );
        debug!(metric = %metric, retained = self.len(metric), "History size after seeding");
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn obs(day: u32, value: f64) -> MetricObservation {
        MetricObservation {
            metric: MetricKind::Bdi,
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            value,
            change: 0.0,
            change_pct: 0.0,
            source: "test".into(),
            is_estimate: false,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let store = HistoryStore::new(5);
        for day in 1..=8 {
            assert!(store.record(&obs(day, 1000.0 + day as f64)));
        }
        assert_eq!(store.len(MetricKind::Bdi), 5);
        assert_eq!(store.recent_values(MetricKind::Bdi, 2), vec![1007.0, 1008.0]);
        assert_eq!(store.latest(MetricKind::Bdi).unwrap().value, 1008.0);
    }

    #[test]
    fn test_same_timestamp_replaces_point() {
        let store = HistoryStore::new(10);
        store.record(&obs(1, 1000.0));
        store.record(&obs(2, 1010.0));
        store.record(&obs(2, 1020.0));
        assert_eq!(store.recent_values(MetricKind::Bdi, 10), vec![1000.0, 1020.0]);
    }

    #[test]
    fn test_out_of_order_points_are_sorted() {
        let store = HistoryStore::new(10);
        store.record(&obs(3, 1030.0));
        store.record(&obs(1, 1010.0));
        store.record(&obs(2, 1020.0));
        assert_eq!(
            store.recent_values(MetricKind::Bdi, 10),
            vec![1010.0, 1020.0, 1030.0]
        );
    }

    #[test]
    fn test_estimates_are_skipped() {
        let store = HistoryStore::new(10);
        let mut estimate = obs(1, 1500.0);
        estimate.is_estimate = true;
        assert!(!store.record(&estimate));

        let mut bad = obs(2, f64::NAN);
        bad.timestamp = bad.timestamp + Duration::hours(1);
        assert!(!store.record(&bad));
        assert!(store.is_empty(MetricKind::Bdi));
    }

    #[tokio::test]
    async fn test_seed_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"[{"date": "2024-01-01", "value": 1500}, {"date": "2024-01-02", "value": 1520}]"#,
        )
        .unwrap();

        let store = HistoryStore::new(90);
        let seeded = store
            .seed_from_file(file.path(), MetricKind::Bdi)
            .await
            .unwrap();
        assert_eq!(seeded, 2);
        assert_eq!(store.recent_values(MetricKind::Bdi, 10), vec![1500.0, 1520.0]);
    }
}
