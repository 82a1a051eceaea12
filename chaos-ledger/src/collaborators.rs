//! Contracts for external collaborators
//!
//! Statistical test suites and trajectory renderers live outside this
//! crate. The ledger hands them reproduced bitstreams and trajectories
//! through these traits.

use crate::types::{Bitstream, Trajectory};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Significance threshold for pass/fail decisions
pub const SIGNIFICANCE_LEVEL: f64 = 0.01;

/// Outcome of one statistical test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalTestResult {
    /// Test name
    pub name: String,
    /// p-value in `[0, 1]`
    pub p_value: f64,
    /// `p_value >= SIGNIFICANCE_LEVEL`
    pub passed: bool,
}

impl StatisticalTestResult {
    /// Result with pass/fail decided at [`SIGNIFICANCE_LEVEL`]
    pub fn from_p_value(name: impl Into<String>, p_value: f64) -> Self {
        Self {
            name: name.into(),
            p_value,
            passed: p_value >= SIGNIFICANCE_LEVEL,
        }
    }
}

/// Statistical test suite over a bit sequence of any length
pub trait StatisticsEngine: Send + Sync {
    /// Run every test in the suite
    fn run(&self, bits: &Bitstream) -> Result<Vec<StatisticalTestResult>>;
}

/// Raster renderer for simulation trajectories
pub trait Renderer {
    /// Produced image type
    type Image;

    /// Render the per-point paths onto the trajectory's canvas
    fn render(&self, trajectory: &Trajectory) -> Result<Self::Image>;
}
