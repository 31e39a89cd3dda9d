//! Forecasting: market factors in, per-metric predictions out.

pub mod engine;
pub mod factors;

pub use engine::PredictionEngine;
pub use factors::{FactorAnalyzer, RandomFactorAnalyzer, SeasonalRegime, StaticFactorAnalyzer};
