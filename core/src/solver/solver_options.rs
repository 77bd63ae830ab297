use serde::{Deserialize, Serialize};

use crate::error::SolverError;

/// Everything configurable about a solver instance. Deserializable so a
/// driver can load it from JSON; every field has a working default except
/// that real problems will want their own `horizon`/`n_stages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Horizon length `T`.
    pub horizon: f64,
    /// Number of grid cells `N`.
    pub n_stages: usize,
    /// Capacity of the impulse/aux/lift slot vectors.
    pub max_num_impulse: usize,
    /// Worker threads of the solver's private pool.
    pub nthreads: usize,
    /// Contact-stabilization time step of the Baumgarte residual.
    pub baumgarte_time_step: f64,
    /// Interior-point barrier parameter.
    pub barrier: f64,
    /// Fraction-to-boundary rate of the step-size rule.
    pub fraction_to_boundary_rate: f64,
    pub use_line_search: bool,
    pub line_search_reduction_rate: f64,
    pub min_line_search_step: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            horizon: 1.0,
            n_stages: 20,
            max_num_impulse: 0,
            nthreads: 1,
            baumgarte_time_step: 0.05,
            barrier: 1e-4,
            fraction_to_boundary_rate: 0.995,
            use_line_search: false,
            line_search_reduction_rate: 0.75,
            min_line_search_step: 0.05,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), SolverError> {
        if !(self.horizon > 0.0) {
            return Err(SolverError::config("T must be positive"));
        }
        if self.n_stages == 0 {
            return Err(SolverError::config("N must be positive"));
        }
        if self.nthreads == 0 {
            return Err(SolverError::config("nthreads must be positive"));
        }
        if !(self.baumgarte_time_step > 0.0) {
            return Err(SolverError::config("baumgarte_time_step must be positive"));
        }
        if !(self.barrier > 0.0) {
            return Err(SolverError::config("barrier must be positive"));
        }
        if !(self.fraction_to_boundary_rate > 0.0 && self.fraction_to_boundary_rate < 1.0) {
            return Err(SolverError::config(
                "fraction_to_boundary_rate must be in (0, 1)",
            ));
        }
        if !(self.line_search_reduction_rate > 0.0 && self.line_search_reduction_rate < 1.0) {
            return Err(SolverError::config(
                "line_search_reduction_rate must be in (0, 1)",
            ));
        }
        if !(self.min_line_search_step > 0.0 && self.min_line_search_step < 1.0) {
            return Err(SolverError::config("min_line_search_step must be in (0, 1)"));
        }
        Ok(())
    }

    /// Nominal grid-cell width.
    pub fn dt_nominal(&self) -> f64 {
        self.horizon / self.n_stages as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_validate() {
        assert!(SolverOptions::default().validate().is_ok());
    }

    #[test]
    fn test_bad_options_are_rejected() {
        let mut o = SolverOptions::default();
        o.horizon = 0.0;
        assert!(o.validate().is_err());
        let mut o = SolverOptions::default();
        o.nthreads = 0;
        assert!(o.validate().is_err());
        let mut o = SolverOptions::default();
        o.barrier = -1.0;
        assert!(o.validate().is_err());
        let mut o = SolverOptions::default();
        o.baumgarte_time_step = 0.0;
        assert!(o.validate().is_err());
        let mut o = SolverOptions::default();
        o.fraction_to_boundary_rate = 1.0;
        assert!(o.validate().is_err());
    }
}
