//! Calibration: smoothed parameter updates driven by validation results.

pub mod controller;
pub mod params;

pub use controller::{CalibrationController, Recalibration};
pub use params::CalibrationParameters;
