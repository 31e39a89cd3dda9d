//! Market factor analysis
//!
//! The random analyzer is a placeholder for real signals (commodity indices, news sentiment,
//! AIS density). Anything implementing `FactorAnalyzer` can replace it.

use std::collections::BTreeMap;

use chrono::{Datelike, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FactorPolicy;
use crate::models::FactorSet;

pub const CHINA_DEMAND: &str = "china_demand";
pub const FUEL_COSTS: &str = "fuel_costs";
pub const FLEET_CAPACITY: &str = "fleet_capacity";
pub const PORT_CONGESTION: &str = "port_congestion";
pub const GEOPOLITICAL: &str = "geopolitical";
pub const GLOBAL_GROWTH: &str = "global_growth";
pub const SEASONAL: &str = "seasonal";

/// Non-seasonal factors and their default sampling ranges.
const FACTOR_RANGES: [(&str, f64, f64); 6] = [
    (CHINA_DEMAND, -0.15, 0.15),
    (FUEL_COSTS, -0.10, 0.10),
    (FLEET_CAPACITY, -0.05, 0.05),
    (PORT_CONGESTION, -0.08, 0.08),
    (GEOPOLITICAL, -0.05, 0.10),
    (GLOBAL_GROWTH, -0.06, 0.06),
];

/// Dry-bulk seasonal regime by calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalRegime {
    /// Sep-Nov
    Peak,
    /// Jun-Aug
    Moderate,
    /// Dec-Feb
    Trough,
    /// Mar-May
    Recovering,
}

impl SeasonalRegime {
    /// Month is 1-based.
    pub fn for_month(month: u32) -> Self {
        match month {
            9..=11 => SeasonalRegime::Peak,
            6..=8 => SeasonalRegime::Moderate,
            3..=5 => SeasonalRegime::Recovering,
            _ => SeasonalRegime::Trough,
        }
    }

    pub fn range(&self) -> (f64, f64) {
        match self {
            SeasonalRegime::Peak => (0.05, 0.15),
            SeasonalRegime::Moderate => (-0.02, 0.05),
            SeasonalRegime::Trough => (-0.15, -0.05),
            SeasonalRegime::Recovering => (0.0, 0.08),
        }
    }

    pub fn midpoint(&self) -> f64 {
        let (lo, hi) = self.range();
        (lo + hi) / 2.0
    }
}

/// Produces the factor set for one forecast cycle.
#[async_trait::async_trait]
pub trait FactorAnalyzer: Send + Sync {
    async fn analyze(&self) -> FactorSet;
}

/// Uniform draws within per-factor ranges; seasonal range follows the calendar.
pub struct RandomFactorAnalyzer {
    overrides: BTreeMap<String, (f64, f64)>,
    rng: Mutex<StdRng>,
}

impl RandomFactorAnalyzer {
    pub fn new(policy: &FactorPolicy) -> Self {
        let rng = match policy.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let overrides = policy
            .ranges
            .iter()
            .map(|r| (r.name.clone(), (r.min, r.max)))
            .collect();
        Self {
            overrides,
            rng: Mutex::new(rng),
        }
    }

    /// Draw a factor set as if it were the given month.
    pub fn sample_for_month(&self, month: u32) -> FactorSet {
        let regime = SeasonalRegime::for_month(month);
        let mut rng = self.rng.lock();
        let mut factors = FactorSet::new();

        let defaults = FACTOR_RANGES
            .iter()
            .map(|(name, lo, hi)| (*name, (*lo, *hi)))
            .chain(std::iter::once((SEASONAL, regime.range())));

        for (name, default_range) in defaults {
            let (lo, hi) = self.overrides.get(name).copied().unwrap_or(default_range);
            factors.insert(name, draw(&mut rng, lo, hi));
        }

        // Extra configured signals beyond the built-in schema
        for (name, (lo, hi)) in &self.overrides {
            if !is_schema_factor(name) {
                factors.insert(name, draw(&mut rng, *lo, *hi));
            }
        }

        debug!(regime = ?regime, factors = factors.len(), "Sampled market factors");
        factors
    }
}

fn is_schema_factor(name: &str) -> bool {
    name == SEASONAL || FACTOR_RANGES.iter().any(|(known, _, _)| *known == name)
}

fn draw(rng: &mut StdRng, lo: f64, hi: f64) -> f64 {
    if lo < hi {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

#[async_trait::async_trait]
impl FactorAnalyzer for RandomFactorAnalyzer {
    async fn analyze(&self) -> FactorSet {
        self.sample_for_month(Utc::now().month())
    }
}

/// Returns a fixed factor set; used for externally computed signals and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticFactorAnalyzer {
    factors: FactorSet,
}

impl StaticFactorAnalyzer {
    pub fn new(factors: FactorSet) -> Self {
        Self { factors }
    }

    /// Every schema factor present and zero.
    pub fn neutral() -> Self {
        let factors = FACTOR_RANGES
            .iter()
            .map(|(name, _, _)| (name.to_string(), 0.0))
            .chain(std::iter::once((SEASONAL.to_string(), 0.0)))
            .collect();
        Self { factors }
    }
}

#[async_trait::async_trait]
impl FactorAnalyzer for StaticFactorAnalyzer {
    async fn analyze(&self) -> FactorSet {
        self.factors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FactorRangeConfig;

    #[test]
    fn test_seasonal_regimes() {
        assert_eq!(SeasonalRegime::for_month(10), SeasonalRegime::Peak);
        assert_eq!(SeasonalRegime::for_month(7), SeasonalRegime::Moderate);
        assert_eq!(SeasonalRegime::for_month(1), SeasonalRegime::Trough);
        assert_eq!(SeasonalRegime::for_month(12), SeasonalRegime::Trough);
        assert_eq!(SeasonalRegime::for_month(4), SeasonalRegime::Recovering);
        assert!((SeasonalRegime::Trough.midpoint() + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_draws_stay_in_range() {
        let analyzer = RandomFactorAnalyzer::new(&FactorPolicy {
            seed: Some(11),
            ranges: Vec::new(),
        });
        for month in 1..=12 {
            let factors = analyzer.sample_for_month(month);
            assert_eq!(factors.len(), 7);
            for (name, lo, hi) in FACTOR_RANGES {
                let v = factors.get(name);
                assert!(v >= lo && v <= hi, "{} = {} outside [{}, {}]", name, v, lo, hi);
            }
            let (lo, hi) = SeasonalRegime::for_month(month).range();
            let seasonal = factors.get(SEASONAL);
            assert!(seasonal >= lo && seasonal <= hi);
        }
    }

    #[test]
    fn test_seeded_draws_are_reproducible() {
        let policy = FactorPolicy {
            seed: Some(99),
            ranges: Vec::new(),
        };
        let a = RandomFactorAnalyzer::new(&policy);
        let b = RandomFactorAnalyzer::new(&policy);
        assert_eq!(a.sample_for_month(3), b.sample_for_month(3));
    }

    #[test]
    fn test_range_overrides_and_extra_signals() {
        let analyzer = RandomFactorAnalyzer::new(&FactorPolicy {
            seed: Some(5),
            ranges: vec![
                FactorRangeConfig {
                    name: CHINA_DEMAND.into(),
                    min: 0.12,
                    max: 0.12,
                },
                FactorRangeConfig {
                    name: "iron_ore_imports".into(),
                    min: 0.01,
                    max: 0.02,
                },
            ],
        });
        let factors = analyzer.sample_for_month(6);
        assert_eq!(factors.get(CHINA_DEMAND), 0.12);
        let extra = factors.get("iron_ore_imports");
        assert!((0.01..=0.02).contains(&extra));
    }

    #[tokio::test]
    async fn test_static_analyzer() {
        let neutral = StaticFactorAnalyzer::neutral().analyze().await;
        assert_eq!(neutral.len(), 7);
        assert!(neutral.iter().all(|(_, v)| v == 0.0));

        let fixed = FactorSet::new().with(CHINA_DEMAND, 0.1);
        let analyzer = StaticFactorAnalyzer::new(fixed.clone());
        assert_eq!(analyzer.analyze().await, fixed);
    }
}
