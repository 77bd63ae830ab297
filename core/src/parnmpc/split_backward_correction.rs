use nalgebra::{DMatrix, DVector};

use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::ocp::split_direction::SplitDirection;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;
use crate::robot::{RobotDims, RobotModel};

/// Local KKT inversion and the correction steps of one ParNMPC stage.
///
/// The stage system couples `(λ, x, u)` through the backward-Euler state
/// equation; its matrix is
///
/// ```text
///     [ 0    Fx   Fu  ]
///     [ Fxᵀ  Qxx  Qxu ]
///     [ Fuᵀ  Qxuᵀ Quu ]
/// ```
///
/// of dimension `4·dimv + dimu`. The coarse update inverts it with the
/// neighbor couplings frozen; the backward/forward corrections then feed in
/// the true costate (from the terminal side) and state (from the initial
/// side) through the stored inverse.
pub struct SplitBackwardCorrection {
    kkt_mat: DMatrix<f64>,
    kkt_mat_inv: DMatrix<f64>,
    /// Costate mismatch of the next stage (backward coupling).
    x_res_bwd: DVector<f64>,
    /// State mismatch of the previous stage (forward coupling).
    x_res_fwd: DVector<f64>,
    dimv: usize,
    dimu: usize,
}

impl SplitBackwardCorrection {
    pub fn new(dims: &RobotDims) -> Self {
        let (v, u) = (dims.dimv, dims.dimu());
        let dim_kkt = 4 * v + u;
        Self {
            kkt_mat: DMatrix::zeros(dim_kkt, dim_kkt),
            kkt_mat_inv: DMatrix::zeros(dim_kkt, dim_kkt),
            x_res_bwd: DVector::zeros(2 * v),
            x_res_fwd: DVector::zeros(2 * v),
            dimv: v,
            dimu: u,
        }
    }

    /// Invert the stage KKT matrix and write the coarse-updated solution
    /// `s_new = s − H⁻¹·r`. `aux_mat` (the terminal-Hessian surrogate of the
    /// cost-to-go) is added to `Qxx` on every stage that is not the last.
    #[allow(clippy::too_many_arguments)]
    pub fn coarse_update<R: RobotModel>(
        &mut self,
        robot: &R,
        grid: GridIndex,
        dt: f64,
        aux_mat: Option<&DMatrix<f64>>,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        s: &SplitSolution,
        s_new: &mut SplitSolution,
    ) -> Result<(), SolverError> {
        let (v, u) = (self.dimv, self.dimu);
        let x = 2 * v;
        self.kkt_mat.fill(0.0);
        // state-equation rows/columns
        {
            let mut fqq = self.kkt_mat.view_mut((0, x), (v, v));
            fqq.copy_from(&kkt_matrix.fqq);
        }
        for i in 0..v {
            self.kkt_mat[(i, x + v + i)] = dt;
        }
        self.kkt_mat.view_mut((v, x), (v, v)).copy_from(&kkt_matrix.fvq);
        self.kkt_mat
            .view_mut((v, x + v), (v, v))
            .copy_from(&kkt_matrix.fvv);
        self.kkt_mat
            .view_mut((v, 2 * x), (v, u))
            .copy_from(&kkt_matrix.fvu);
        {
            let fx = self.kkt_mat.view((0, x), (x, x)).into_owned();
            self.kkt_mat.view_mut((x, 0), (x, x)).copy_from(&fx.transpose());
        }
        {
            let fu = self.kkt_mat.view((0, 2 * x), (x, u)).into_owned();
            self.kkt_mat
                .view_mut((2 * x, 0), (u, x))
                .copy_from(&fu.transpose());
        }
        // Hessian blocks
        {
            let mut qxx = self.kkt_mat.view_mut((x, x), (x, x));
            qxx.copy_from(&kkt_matrix.qxx);
            if let Some(aux) = aux_mat {
                qxx += aux;
            }
        }
        self.kkt_mat
            .view_mut((x, 2 * x), (x, u))
            .copy_from(&kkt_matrix.qxu());
        {
            let qxu = kkt_matrix.qxu().into_owned();
            self.kkt_mat
                .view_mut((2 * x, x), (u, x))
                .copy_from(&qxu.transpose());
        }
        self.kkt_mat
            .view_mut((2 * x, 2 * x), (u, u))
            .copy_from(&kkt_matrix.quu());
        self.kkt_mat_inv = self
            .kkt_mat
            .clone()
            .try_inverse()
            .ok_or(SolverError::NumericalFailure {
                stage: grid,
                what: "stage KKT matrix is singular",
            })?;
        let mut rhs = DVector::zeros(2 * x + u);
        rhs.rows_mut(0, x).copy_from(&kkt_residual.fx);
        rhs.rows_mut(x, x).copy_from(&kkt_residual.lx);
        rhs.rows_mut(2 * x, u).copy_from(&kkt_residual.lu());
        let w = &self.kkt_mat_inv * rhs;
        s_new.lmd.copy_from(&(&s.lmd - w.rows(0, v)));
        s_new.gmm.copy_from(&(&s.gmm - w.rows(v, v)));
        let dq = w.rows(x, v).into_owned();
        robot.integrate_configuration(&s.q, &dq, -1.0, &mut s_new.q);
        s_new.v.copy_from(&(&s.v - w.rows(x + v, v)));
        s_new.u.copy_from(&(&s.u - w.rows(2 * x, u)));
        Ok(())
    }

    /// Serial part of the backward sweep: correct this stage's costate from
    /// the already-corrected next stage.
    pub fn backward_correction_serial(
        &mut self,
        s_next: &SplitSolution,
        s_new_next: &SplitSolution,
        s_new: &mut SplitSolution,
    ) {
        let v = self.dimv;
        let x = 2 * v;
        self.x_res_bwd.rows_mut(0, v).copy_from(&(&s_new_next.lmd - &s_next.lmd));
        self.x_res_bwd.rows_mut(v, v).copy_from(&(&s_new_next.gmm - &s_next.gmm));
        let corr = self.kkt_mat_inv.view((0, x), (x, x)) * &self.x_res_bwd;
        s_new.lmd -= corr.rows(0, v);
        s_new.gmm -= corr.rows(v, v);
    }

    /// Parallel part of the backward sweep: the state/input components of the
    /// same correction.
    pub fn backward_correction_parallel<R: RobotModel>(
        &self,
        robot: &R,
        s_new: &mut SplitSolution,
    ) {
        let (v, u) = (self.dimv, self.dimu);
        let x = 2 * v;
        let corr = self.kkt_mat_inv.view((x, x), (x + u, x)) * &self.x_res_bwd;
        let dq = corr.rows(0, v).into_owned();
        let q0 = s_new.q.clone();
        robot.integrate_configuration(&q0, &dq, -1.0, &mut s_new.q);
        s_new.v -= corr.rows(v, v);
        s_new.u -= corr.rows(x, u);
    }

    /// Serial part of the forward sweep: correct this stage's state from the
    /// already-corrected previous stage.
    pub fn forward_correction_serial<R: RobotModel>(
        &mut self,
        robot: &R,
        s_prev: &SplitSolution,
        s_new_prev: &SplitSolution,
        s_new: &mut SplitSolution,
    ) {
        let v = self.dimv;
        let x = 2 * v;
        let mut dq = DVector::zeros(v);
        robot.subtract_configuration(&s_new_prev.q, &s_prev.q, &mut dq);
        self.x_res_fwd.rows_mut(0, v).copy_from(&dq);
        self.x_res_fwd.rows_mut(v, v).copy_from(&(&s_new_prev.v - &s_prev.v));
        let corr = self.kkt_mat_inv.view((x, 0), (x, x)) * &self.x_res_fwd;
        let dqc = corr.rows(0, v).into_owned();
        let q0 = s_new.q.clone();
        robot.integrate_configuration(&q0, &dqc, -1.0, &mut s_new.q);
        s_new.v -= corr.rows(v, v);
    }

    /// Parallel part of the forward sweep: costate/input components.
    pub fn forward_correction_parallel(&self, s_new: &mut SplitSolution) {
        let (v, u) = (self.dimv, self.dimu);
        let x = 2 * v;
        let corr_lmd = self.kkt_mat_inv.view((0, 0), (x, x)) * &self.x_res_fwd;
        s_new.lmd -= corr_lmd.rows(0, v);
        s_new.gmm -= corr_lmd.rows(v, v);
        let corr_u = self.kkt_mat_inv.view((2 * x, 0), (u, x)) * &self.x_res_fwd;
        s_new.u -= corr_u;
    }

    /// Newton direction from the corrected solution.
    pub fn compute_direction<R: RobotModel>(
        &self,
        robot: &R,
        s: &SplitSolution,
        s_new: &SplitSolution,
        d: &mut SplitDirection,
    ) {
        let v = self.dimv;
        let mut dq = DVector::zeros(v);
        robot.subtract_configuration(&s_new.q, &s.q, &mut dq);
        d.dq_mut().copy_from(&dq);
        d.dv_mut().copy_from(&(&s_new.v - &s.v));
        d.du.copy_from(&(&s_new.u - &s.u));
        d.dlmd_mut().copy_from(&(&s_new.lmd - &s.lmd));
        d.dgmm_mut().copy_from(&(&s_new.gmm - &s.gmm));
    }
}
