//! Validation: accuracy, bias and trend alignment of the previous forecast against ground truth.

pub mod engine;
pub mod recommendations;

pub use engine::ValidationEngine;
pub use recommendations::recommendations;
