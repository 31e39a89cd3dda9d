//! Concrete ground-truth sources
//!
//! - `JsonApiSource`: HTTP endpoint returning JSON, fields addressed by JSON pointer
//! - `FileSource`: local JSON series of dated points
//! - `SimulatedSource`: seeded random walk standing in for scraped feeds

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::source::{GroundTruthSource, SourceReading};
use crate::config::SourceConfig;
use crate::models::{MetricKind, MetricObservation};

/// Build sources from configuration. Configuration order is priority order.
pub fn build_sources(
    configs: &[SourceConfig],
    request_timeout: Duration,
) -> Result<Vec<Arc<dyn GroundTruthSource>>> {
    let mut sources: Vec<Arc<dyn GroundTruthSource>> = Vec::with_capacity(configs.len());

    for (idx, config) in configs.iter().enumerate() {
        let priority = u8::try_from(idx).unwrap_or(u8::MAX);
        let source: Arc<dyn GroundTruthSource> = match config {
            SourceConfig::JsonApi {
                name,
                metric,
                url,
                value_pointer,
                timestamp_pointer,
                change_pointer,
                change_pct_pointer,
                api_key_env,
            } => {
                let api_key = api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.trim().is_empty());
                if api_key_env.is_some() && api_key.is_none() {
                    warn!(source = %name, "API key variable configured but not set");
                }
                let mut source =
                    JsonApiSource::new(name, *metric, url, value_pointer, request_timeout)?
                        .with_priority(priority);
                source.timestamp_pointer = timestamp_pointer.clone();
                source.change_pointer = change_pointer.clone();
                source.change_pct_pointer = change_pct_pointer.clone();
                source.api_key = api_key;
                Arc::new(source)
            }
            SourceConfig::File { name, metric, path } => {
                Arc::new(FileSource::new(name, *metric, path).with_priority(priority))
            }
            SourceConfig::Simulated {
                name,
                metric,
                baseline,
                daily_volatility,
                seed,
            } => Arc::new(
                SimulatedSource::new(name, *metric, *baseline, *daily_volatility, *seed)
                    .with_priority(priority),
            ),
        };
        debug!(source = source.name(), priority, "Registered ground-truth source");
        sources.push(source);
    }

    Ok(sources)
}

/// HTTP JSON feed
pub struct JsonApiSource {
    name: String,
    metric: MetricKind,
    url: String,
    value_pointer: String,
    pub timestamp_pointer: Option<String>,
    pub change_pointer: Option<String>,
    pub change_pct_pointer: Option<String>,
    pub api_key: Option<String>,
    priority: u8,
    request_timeout: Duration,
    client: Client,
}

impl JsonApiSource {
    pub fn new(
        name: &str,
        metric: MetricKind,
        url: &str,
        value_pointer: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            name: name.to_string(),
            metric,
            url: url.to_string(),
            value_pointer: value_pointer.to_string(),
            timestamp_pointer: None,
            change_pointer: None,
            change_pct_pointer: None,
            api_key: None,
            priority: 100,
            request_timeout,
            client,
        })
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Pull a reading out of a response body.
    pub fn extract_reading(&self, body: &Value) -> Result<SourceReading> {
        let raw = body
            .pointer(&self.value_pointer)
            .ok_or_else(|| anyhow!("no value at {}", self.value_pointer))?;
        let value = json_number(raw)
            .ok_or_else(|| anyhow!("value at {} is not numeric: {}", self.value_pointer, raw))?;

        let observed_at = match &self.timestamp_pointer {
            Some(ptr) => body
                .pointer(ptr)
                .and_then(parse_timestamp)
                .ok_or_else(|| anyhow!("no parseable timestamp at {}", ptr))?,
            None => Utc::now(),
        };

        let field = |ptr: &Option<String>| {
            ptr.as_deref()
                .and_then(|p| body.pointer(p))
                .and_then(json_number)
                .unwrap_or(0.0)
        };

        Ok(SourceReading {
            value,
            observed_at,
            change_abs: field(&self.change_pointer),
            change_pct: field(&self.change_pct_pointer),
        })
    }
}

#[async_trait::async_trait]
impl GroundTruthSource for JsonApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn supports(&self, metric: MetricKind) -> bool {
        metric == self.metric
    }

    async fn fetch(&self, metric: MetricKind) -> Result<SourceReading> {
        if metric != self.metric {
            bail!("{} only provides {}", self.name, self.metric);
        }

        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let body: Value = request
            .send()
            .await
            .context("request failed")?
            .error_for_status()
            .context("non-success status")?
            .json()
            .await
            .context("failed to parse JSON body")?;

        self.extract_reading(&body)
    }
}

#[derive(Debug, Deserialize)]
struct SeriesPoint {
    #[serde(alias = "timestamp", alias = "observed_at")]
    date: Value,
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeriesFile {
    Many(Vec<SeriesPoint>),
    One(SeriesPoint),
}

/// Load a JSON series file into observations, oldest first, with changes filled in.
pub async fn load_series(path: &Path, metric: MetricKind, source: &str) -> Result<Vec<MetricObservation>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read series {}", path.display()))?;
    parse_series(&content, metric, source)
}

pub fn parse_series(content: &str, metric: MetricKind, source: &str) -> Result<Vec<MetricObservation>> {
    let points = match serde_json::from_str::<SeriesFile>(content).context("invalid series JSON")? {
        SeriesFile::Many(points) => points,
        SeriesFile::One(point) => vec![point],
    };

    let mut dated: Vec<(DateTime<Utc>, f64)> = Vec::with_capacity(points.len());
    for point in points {
        let ts = parse_timestamp(&point.date)
            .ok_or_else(|| anyhow!("unparseable date: {}", point.date))?;
        let value = json_number(&point.value)
            .ok_or_else(|| anyhow!("non-numeric value: {}", point.value))?;
        dated.push((ts, value));
    }
    dated.sort_by_key(|(ts, _)| *ts);

    let mut previous: Option<f64> = None;
    let observations = dated
        .into_iter()
        .map(|(timestamp, value)| {
            let mut reading = SourceReading::new(value, timestamp);
            if let Some(prev) = previous {
                reading = reading.with_previous(prev);
            }
            previous = Some(value);
            MetricObservation {
                metric,
                timestamp,
                value,
                change: reading.change_abs,
                change_pct: reading.change_pct,
                source: source.to_string(),
                is_estimate: false,
            }
        })
        .collect();

    Ok(observations)
}

/// Latest point of a local JSON series
pub struct FileSource {
    name: String,
    metric: MetricKind,
    path: PathBuf,
    priority: u8,
}

impl FileSource {
    pub fn new(name: &str, metric: MetricKind, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            metric,
            path: path.into(),
            priority: 100,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait::async_trait]
impl GroundTruthSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn supports(&self, metric: MetricKind) -> bool {
        metric == self.metric
    }

    async fn fetch(&self, metric: MetricKind) -> Result<SourceReading> {
        let series = load_series(&self.path, metric, &self.name).await?;
        let latest = series
            .last()
            .ok_or_else(|| anyhow!("series {} is empty", self.path.display()))?;
        Ok(SourceReading {
            value: latest.value,
            observed_at: latest.timestamp,
            change_abs: latest.change,
            change_pct: latest.change_pct,
        })
    }
}

/// Seeded random walk around a baseline
pub struct SimulatedSource {
    name: String,
    metric: MetricKind,
    baseline: f64,
    daily_volatility: f64,
    priority: u8,
    state: Mutex<(ChaCha8Rng, f64)>,
}

impl SimulatedSource {
    pub fn new(
        name: &str,
        metric: MetricKind,
        baseline: f64,
        daily_volatility: f64,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            name: name.to_string(),
            metric,
            baseline,
            daily_volatility: daily_volatility.abs(),
            priority: 100,
            state: Mutex::new((rng, baseline)),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait::async_trait]
impl GroundTruthSource for SimulatedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn supports(&self, metric: MetricKind) -> bool {
        metric == self.metric
    }

    async fn fetch(&self, metric: MetricKind) -> Result<SourceReading> {
        if metric != self.metric {
            bail!("{} only simulates {}", self.name, self.metric);
        }

        let mut state = self.state.lock();
        let (rng, last) = &mut *state;
        let step = rng.gen_range(-self.daily_volatility..=self.daily_volatility);
        let previous = *last;
        // Walk stays within +/-50% of the baseline
        let next = (previous * (1.0 + step)).clamp(self.baseline * 0.5, self.baseline * 1.5);
        *last = next;

        Ok(SourceReading::new(next, Utc::now()).with_previous(previous))
    }
}

/// Numbers, or strings like "1,850" / "1850.5".
fn json_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
}

/// RFC 3339 strings, `YYYY-MM-DD` dates, or unix seconds / milliseconds.
pub fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Values this large are milliseconds
            if raw.abs() > 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_extract_reading_with_pointers() {
        let mut source =
            JsonApiSource::new(
                "baltic",
                MetricKind::Bdi,
                "http://localhost",
                "/data/0/close",
                Duration::from_secs(10),
            )
                .unwrap();
        source.timestamp_pointer = Some("/data/0/date".into());
        source.change_pointer = Some("/data/0/change".into());

        let body = json!({
            "data": [{ "close": "1,850", "date": "2024-03-15", "change": -12 }]
        });
        let reading = source.extract_reading(&body).unwrap();
        assert_eq!(reading.value, 1850.0);
        assert_eq!(reading.change_abs, -12.0);
        assert_eq!(reading.change_pct, 0.0);
        assert_eq!(reading.observed_at.to_rfc3339(), "2024-03-15T00:00:00+00:00");
    }

    #[test]
    fn test_extract_reading_missing_value() {
        let source =
            JsonApiSource::new(
                "baltic",
                MetricKind::Bdi,
                "http://localhost",
                "/value",
                Duration::from_secs(10),
            )
            .unwrap();
        assert!(source.extract_reading(&json!({ "other": 1 })).is_err());
        assert!(source.extract_reading(&json!({ "value": "n/a" })).is_err());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let secs = parse_timestamp(&json!(1_700_000_000)).unwrap();
        let millis = parse_timestamp(&json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(secs, millis);
        assert!(parse_timestamp(&json!("2024-01-02T10:00:00Z")).is_some());
        assert!(parse_timestamp(&json!("2024-01-02")).is_some());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(null)).is_none());
    }

    #[test]
    fn test_parse_series_sorts_and_fills_changes() {
        let content = r#"[
            {"date": "2024-01-03", "value": 1900},
            {"date": "2024-01-01", "value": 1800},
            {"date": "2024-01-02", "value": "1,850"}
        ]"#;
        let series = parse_series(content, MetricKind::Bdi, "file").unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].value, 1800.0);
        assert_eq!(series[0].change, 0.0);
        assert_eq!(series[2].value, 1900.0);
        assert!((series[2].change - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_file_source_returns_latest_point() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        write!(
            file,
            r#"[{{"date": "2024-01-01", "value": 1500}}, {{"date": "{}", "value": 1650}}]"#,
            today
        )
        .unwrap();

        let source = FileSource::new("bdi-file", MetricKind::Bdi, file.path());
        let reading = source.fetch(MetricKind::Bdi).await.unwrap();
        assert_eq!(reading.value, 1650.0);
        assert!((reading.change_abs - 150.0).abs() < 1e-9);
        assert!(!source.supports(MetricKind::BunkerFuel));
    }

    #[tokio::test]
    async fn test_file_source_missing_file_errors() {
        let source = FileSource::new("missing", MetricKind::Bdi, "/nonexistent/bdi.json");
        assert!(source.fetch(MetricKind::Bdi).await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_source_is_seeded_and_bounded() {
        let a = SimulatedSource::new("sim-a", MetricKind::Bdi, 1500.0, 0.03, Some(42));
        let b = SimulatedSource::new("sim-b", MetricKind::Bdi, 1500.0, 0.03, Some(42));

        for _ in 0..50 {
            let ra = a.fetch(MetricKind::Bdi).await.unwrap();
            let rb = b.fetch(MetricKind::Bdi).await.unwrap();
            assert_eq!(ra.value, rb.value);
            assert!(ra.value >= 750.0 && ra.value <= 2250.0);
        }
        assert!(a.fetch(MetricKind::BunkerFuel).await.is_err());
    }

    #[test]
    fn test_build_sources_keeps_config_order() {
        let configs = vec![
            SourceConfig::Simulated {
                name: "sim".into(),
                metric: MetricKind::Bdi,
                baseline: 1500.0,
                daily_volatility: 0.02,
                seed: Some(1),
            },
            SourceConfig::File {
                name: "file".into(),
                metric: MetricKind::Bdi,
                path: "bdi.json".into(),
            },
        ];
        let sources = build_sources(&configs, Duration::from_secs(5)).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name(), "sim");
        assert!(sources[0].priority() < sources[1].priority());
    }

    #[test]
    fn test_http_client_uses_configured_timeout() {
        let source = JsonApiSource::new(
            "baltic",
            MetricKind::Bdi,
            "http://localhost",
            "/value",
            Duration::from_secs(45),
        )
        .unwrap();
        assert_eq!(source.request_timeout(), Duration::from_secs(45));

        let configs = vec![SourceConfig::JsonApi {
            name: "api".into(),
            metric: MetricKind::Bdi,
            url: "http://localhost".into(),
            value_pointer: "/value".into(),
            timestamp_pointer: None,
            change_pointer: None,
            change_pct_pointer: None,
            api_key_env: None,
        }];
        let sources = build_sources(&configs, Duration::from_secs(45)).unwrap();
        assert_eq!(sources[0].name(), "api");
    }
}
