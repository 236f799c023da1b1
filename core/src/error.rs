//! Error types for the dynamic occupancy grid map.
//!
//! Only construction-time misconfiguration and malformed per-cycle input are errors. Expected
//! per-cycle conditions such as empty cells or a fully degenerate particle population are handled
//! inside the pipeline and reported through [`crate::map::Diagnostics`].

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DogmError {
    /// Invalid [`crate::config::GridParams`]; raised before any buffer is allocated.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Measurement input whose length does not match the grid dimensions.
    #[error("Measurement shape mismatch: expected {expected} values, got {actual}")]
    MeasurementShape { expected: usize, actual: usize },

    /// Negative or non-finite `dt` passed to an update.
    #[error("Invalid time step: {0} (must be finite and non-negative)")]
    InvalidTimeStep(f64),
}

pub type Result<T> = std::result::Result<T, DogmError>;
