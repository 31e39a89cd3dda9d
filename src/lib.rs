//! BDI Forecast Library
//!
//! Closed-loop forecasting for the Baltic Dry Index and related freight metrics.
//! Each cycle forecasts, validates the previous forecast against ground truth and
//! calibrates the model parameters.

pub mod calibration;
pub mod config;
pub mod ground_truth;
pub mod models;
pub mod orchestrator;
pub mod prediction;
pub mod telemetry;
pub mod validation;

pub use config::ForecastConfig;
pub use orchestrator::{CycleReport, DashboardSnapshot, Orchestrator};
