use thiserror::Error;

use crate::hybrid::GridIndex;

/// Errors surfaced by the solver. Construction-time validation problems are
/// `InvalidConfiguration`; everything that can fail during an iteration is
/// either `Infeasible` (reported, iterate untouched) or `NumericalFailure`
/// (fatal for the current iteration).
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An inequality-constraint component found a non-positive slack or dual
    /// at the given sub-interval.
    #[error("infeasible solution at {stage:?}")]
    Infeasible { stage: GridIndex },

    /// Cholesky breakdown or non-finite values in a condensed block.
    #[error("numerical failure at {stage:?}: {what}")]
    NumericalFailure { stage: GridIndex, what: &'static str },
}

impl SolverError {
    pub fn config(msg: impl Into<String>) -> Self {
        SolverError::InvalidConfiguration(msg.into())
    }
}
