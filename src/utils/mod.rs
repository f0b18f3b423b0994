//! Utility functions and types shared by the pipeline stages.

pub mod error;
mod logging;

pub use error::{Error, Result};
pub use logging::{init_logging, init_test_logging};

/// Clamp into `[0, 1]`, mapping NaN to 0.
pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Re-export of commonly used types
pub mod prelude {
    pub use super::{
        clamp01,
        error::{Error, Result},
        init_logging, mean,
    };
}
