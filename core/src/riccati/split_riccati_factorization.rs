use nalgebra::{DMatrix, DVector};

use crate::robot::RobotDims;

/// Value-function factors of one sub-interval plus everything the
/// pure-state-constraint machinery needs from it.
///
/// `P`/`s` are the quadratic/linear cost-to-go factors. `K`/`k` the LQR gain
/// and feedforward. `pi`/`pi_res`/`n_mat` propagate the initial-state
/// sensitivity (`Π`, `π`, `N`) used when impulse-time state constraints are
/// present, and `n_vec` is the aggregated constraint-multiplier term entering
/// the costate.
#[derive(Debug, Clone)]
pub struct SplitRiccatiFactorization {
    pub pqq: DMatrix<f64>,
    pub pqv: DMatrix<f64>,
    pub pvq: DMatrix<f64>,
    pub pvv: DMatrix<f64>,
    pub sq: DVector<f64>,
    pub sv: DVector<f64>,
    /// LQR feedback gain, `dimu × 2·dimv`.
    pub k_gain: DMatrix<f64>,
    /// LQR feedforward, `dimu`.
    pub k_ff: DVector<f64>,
    /// `Quu⁻¹·Fvuᵀ`.
    pub ginv_bt: DMatrix<f64>,
    /// Closed-loop transition `A + B·K`.
    pub ap_bk: DMatrix<f64>,
    /// `B·Quu⁻¹·Bᵀ`.
    pub bginv_bt: DMatrix<f64>,
    /// Affine term `Fx + B·k` of the closed-loop transition.
    pub ap_bk_res: DVector<f64>,
    /// Initial-state sensitivity `Π`.
    pub pi: DMatrix<f64>,
    /// Affine part `π` of the state propagation.
    pub pi_res: DVector<f64>,
    /// Covariance-like factor `N`.
    pub n_mat: DMatrix<f64>,
    /// Aggregated state-constraint multiplier term `n`.
    pub n_vec: DVector<f64>,
}

impl SplitRiccatiFactorization {
    pub fn new(dims: &RobotDims) -> Self {
        let (v, u, x) = (dims.dimv, dims.dimu(), dims.dimx());
        Self {
            pqq: DMatrix::zeros(v, v),
            pqv: DMatrix::zeros(v, v),
            pvq: DMatrix::zeros(v, v),
            pvv: DMatrix::zeros(v, v),
            sq: DVector::zeros(v),
            sv: DVector::zeros(v),
            k_gain: DMatrix::zeros(u, x),
            k_ff: DVector::zeros(u),
            ginv_bt: DMatrix::zeros(u, v),
            ap_bk: DMatrix::zeros(x, x),
            bginv_bt: DMatrix::zeros(x, x),
            ap_bk_res: DVector::zeros(x),
            pi: DMatrix::identity(x, x),
            pi_res: DVector::zeros(x),
            n_mat: DMatrix::zeros(x, x),
            n_vec: DVector::zeros(x),
        }
    }

    /// Copy the cost-to-go of `src` and make this slot an identity
    /// pass-through of the closed-loop chain (used for zero-length pieces).
    pub fn set_passthrough(&mut self, src: &SplitRiccatiFactorization) {
        self.pqq.copy_from(&src.pqq);
        self.pqv.copy_from(&src.pqv);
        self.pvq.copy_from(&src.pvq);
        self.pvv.copy_from(&src.pvv);
        self.sq.copy_from(&src.sq);
        self.sv.copy_from(&src.sv);
        self.k_gain.fill(0.0);
        self.k_ff.fill(0.0);
        self.ginv_bt.fill(0.0);
        self.ap_bk.fill_with_identity();
        self.bginv_bt.fill(0.0);
        self.ap_bk_res.fill(0.0);
    }
}
