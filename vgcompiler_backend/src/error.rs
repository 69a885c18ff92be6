//! Backend error taxonomy.
//!
//! Every fallible operation in this crate and the executor crate returns
//! [`Result`]. Boundary violations carry the full list of offending
//! channels, so a bulk write or a whole-plan synthesis reports every breach
//! at once instead of stopping at the first.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One out-of-bounds channel target.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryBreach {
    pub channel: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl fmt::Display for BoundaryBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} outside [{}, {}]",
            self.channel, self.value, self.min, self.max
        )
    }
}

fn breach_list(breaches: &[BoundaryBreach]) -> String {
    breaches
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid setup: malformed names, singular matrices, degenerate sweep
    /// or timing parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// One or more channel targets fell outside registered bounds. Values
    /// are rejected, never clamped.
    #[error("boundary violation: {}", breach_list(.0))]
    BoundaryViolation(Vec<BoundaryBreach>),

    /// A named channel or virtual gate is not registered.
    #[error("not found: {0}")]
    NotFound(String),

    /// Marker events could not be placed without colliding on a shared
    /// physical line.
    #[error("marker conflict: {0}")]
    MarkerConflict(String),

    /// An instrument did not respond within its deadline.
    #[error("hardware timeout in {phase} after {timeout:?}")]
    HardwareTimeout {
        phase: &'static str,
        timeout: Duration,
    },

    /// An instrument reported a fault or behaved inconsistently.
    #[error("hardware failure: {0}")]
    HardwareFailure(String),

    /// The operation was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
