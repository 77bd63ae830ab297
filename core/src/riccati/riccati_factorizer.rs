use nalgebra::{DMatrix, DVector, linalg::Cholesky};

use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::ocp::split_direction::SplitDirection;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::robot::RobotDims;

use super::split_riccati_factorization::SplitRiccatiFactorization;

/// One backward/forward Riccati step at an ordinary sub-interval.
///
/// The state transition is `A = [Fqq, dt·I; Fvq, Fvv]`, `B = [0; Fvu]`; on a
/// fixed base `Fqq = I` and the products simplify, so most formulas branch on
/// the floating-base flag. The factorizer owns the `AᵀP`/`BᵀP` scratch; the
/// per-stage results (gains, closed-loop factors) land in the
/// `SplitRiccatiFactorization` of the stage.
pub struct RiccatiFactorizer {
    has_floating_base: bool,
    dimv: usize,
    dimu: usize,
    at_pqq: DMatrix<f64>,
    at_pqv: DMatrix<f64>,
    at_pvq: DMatrix<f64>,
    at_pvv: DMatrix<f64>,
    bt_pq: DMatrix<f64>,
    bt_pv: DMatrix<f64>,
    gk: DMatrix<f64>,
}

impl RiccatiFactorizer {
    pub fn new(dims: &RobotDims) -> Self {
        let (v, u) = (dims.dimv, dims.dimu());
        Self {
            has_floating_base: dims.has_floating_base,
            dimv: v,
            dimu: u,
            at_pqq: DMatrix::zeros(v, v),
            at_pqv: DMatrix::zeros(v, v),
            at_pvq: DMatrix::zeros(v, v),
            at_pvv: DMatrix::zeros(v, v),
            bt_pq: DMatrix::zeros(u, v),
            bt_pv: DMatrix::zeros(u, v),
            gk: DMatrix::zeros(u, 2 * v),
        }
    }

    /// Backward step: fold the next stage's cost-to-go into this stage's KKT
    /// blocks, compute the LQR gain, then this stage's cost-to-go.
    pub fn backward_riccati_recursion(
        &mut self,
        riccati_next: &SplitRiccatiFactorization,
        dt: f64,
        grid: GridIndex,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
        riccati: &mut SplitRiccatiFactorization,
    ) -> Result<(), SolverError> {
        debug_assert!(dt > 0.0);
        self.factorize_kkt_matrix(riccati_next, dt, kkt_matrix, kkt_residual);
        self.compute_feedback_gain(grid, kkt_matrix, kkt_residual, riccati)?;
        self.factorize_riccati_factorization(riccati_next, dt, kkt_matrix, kkt_residual, riccati);
        Ok(())
    }

    fn factorize_kkt_matrix(
        &mut self,
        riccati_next: &SplitRiccatiFactorization,
        dt: f64,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let v = self.dimv;
        let rn = riccati_next;
        if self.has_floating_base {
            self.at_pqq.copy_from(&(kkt_matrix.fqq.transpose() * &rn.pqq));
            self.at_pqq += kkt_matrix.fvq.transpose() * &rn.pvq;
            self.at_pqv.copy_from(&(kkt_matrix.fqq.transpose() * &rn.pqv));
            self.at_pqv += kkt_matrix.fvq.transpose() * &rn.pvv;
        } else {
            self.at_pqq.copy_from(&rn.pqq);
            self.at_pqq += kkt_matrix.fvq.transpose() * &rn.pvq;
            self.at_pqv.copy_from(&rn.pqv);
            self.at_pqv += kkt_matrix.fvq.transpose() * &rn.pvv;
        }
        self.at_pvq.copy_from(&(dt * &rn.pqq));
        self.at_pvq += kkt_matrix.fvv.transpose() * &rn.pvq;
        self.at_pvv.copy_from(&(dt * &rn.pqv));
        self.at_pvv += kkt_matrix.fvv.transpose() * &rn.pvv;
        self.bt_pq.copy_from(&(kkt_matrix.fvu.transpose() * &rn.pvq));
        self.bt_pv.copy_from(&(kkt_matrix.fvu.transpose() * &rn.pvv));
        // state Hessian
        let qqq_add = if self.has_floating_base {
            &self.at_pqq * &kkt_matrix.fqq + &self.at_pqv * &kkt_matrix.fvq
        } else {
            &self.at_pqq + &self.at_pqv * &kkt_matrix.fvq
        };
        let qqv_add = dt * &self.at_pqq + &self.at_pqv * &kkt_matrix.fvv;
        let qvv_add = dt * &self.at_pvq + &self.at_pvv * &kkt_matrix.fvv;
        {
            let mut qqq = kkt_matrix.qxx.view_mut((0, 0), (v, v));
            qqq += qqq_add;
        }
        {
            let mut qqv = kkt_matrix.qxx.view_mut((0, v), (v, v));
            qqv += qqv_add;
        }
        {
            let qqv = kkt_matrix.qxx.view((0, v), (v, v)).into_owned();
            let mut qvq = kkt_matrix.qxx.view_mut((v, 0), (v, v));
            qvq.copy_from(&qqv.transpose());
        }
        {
            let mut qvv = kkt_matrix.qxx.view_mut((v, v), (v, v));
            qvv += qvv_add;
        }
        // state-input and input Hessians
        let qqu_add = &self.at_pqv * &kkt_matrix.fvu;
        let qvu_add = &self.at_pvv * &kkt_matrix.fvu;
        {
            let mut qqu = kkt_matrix.qxu_mut();
            let mut top = qqu.rows_mut(0, v);
            top += qqu_add;
        }
        {
            let mut qxu = kkt_matrix.qxu_mut();
            let mut bottom = qxu.rows_mut(v, v);
            bottom += qvu_add;
        }
        let quu_add = &self.bt_pv * &kkt_matrix.fvu;
        {
            let mut quu = kkt_matrix.quu_mut();
            quu += quu_add;
        }
        // gradient of the input
        let lu_add = &self.bt_pq * kkt_residual.fq().into_owned()
            + &self.bt_pv * kkt_residual.fv().into_owned()
            - kkt_matrix.fvu.transpose() * &rn.sv;
        let mut lu = kkt_residual.lu_mut();
        lu += lu_add;
    }

    fn compute_feedback_gain(
        &mut self,
        grid: GridIndex,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        riccati: &mut SplitRiccatiFactorization,
    ) -> Result<(), SolverError> {
        let quu = kkt_matrix.quu().into_owned();
        let chol = Cholesky::new(quu).ok_or(SolverError::NumericalFailure {
            stage: grid,
            what: "Cholesky of the condensed input Hessian failed",
        })?;
        riccati
            .k_gain
            .copy_from(&(-chol.solve(&kkt_matrix.qxu().transpose())));
        riccati
            .k_ff
            .copy_from(&(-chol.solve(&kkt_residual.lu().into_owned())));
        riccati
            .ginv_bt
            .copy_from(&chol.solve(&kkt_matrix.fvu.transpose()));
        Ok(())
    }

    fn factorize_riccati_factorization(
        &mut self,
        riccati_next: &SplitRiccatiFactorization,
        dt: f64,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        riccati: &mut SplitRiccatiFactorization,
    ) {
        let v = self.dimv;
        let rn = riccati_next;
        riccati.pqq.copy_from(&kkt_matrix.qxx.view((0, 0), (v, v)));
        riccati.pqv.copy_from(&kkt_matrix.qxx.view((0, v), (v, v)));
        riccati.pvv.copy_from(&kkt_matrix.qxx.view((v, v), (v, v)));
        self.gk.copy_from(&(kkt_matrix.quu() * &riccati.k_gain));
        let kq = riccati.k_gain.columns(0, v).into_owned();
        let kv = riccati.k_gain.columns(v, v).into_owned();
        riccati.pqq -= kq.transpose() * self.gk.columns(0, v);
        riccati.pqv -= kq.transpose() * self.gk.columns(v, v);
        riccati.pvv -= kv.transpose() * self.gk.columns(v, v);
        riccati.pvq.copy_from(&riccati.pqv.transpose());
        // preserve symmetry
        let sym_q = 0.5 * (&riccati.pqq + riccati.pqq.transpose());
        riccati.pqq.copy_from(&sym_q);
        let sym_v = 0.5 * (&riccati.pvv + riccati.pvv.transpose());
        riccati.pvv.copy_from(&sym_v);
        if self.has_floating_base {
            riccati.sq.copy_from(&(kkt_matrix.fqq.transpose() * &rn.sq));
            riccati.sq += kkt_matrix.fvq.transpose() * &rn.sv;
        } else {
            riccati.sq.copy_from(&rn.sq);
            riccati.sq += kkt_matrix.fvq.transpose() * &rn.sv;
        }
        riccati.sv.copy_from(&(dt * &rn.sq));
        riccati.sv += kkt_matrix.fvv.transpose() * &rn.sv;
        let fq = kkt_residual.fq().into_owned();
        let fv = kkt_residual.fv().into_owned();
        riccati.sq -= &self.at_pqq * &fq;
        riccati.sq -= &self.at_pqv * &fv;
        riccati.sv -= &self.at_pvq * &fq;
        riccati.sv -= &self.at_pvv * &fv;
        riccati.sq -= kkt_residual.lq().into_owned();
        riccati.sv -= kkt_residual.lv().into_owned();
        riccati.sq -= kkt_matrix.qxu().rows(0, v) * &riccati.k_ff;
        riccati.sv -= kkt_matrix.qxu().rows(v, v) * &riccati.k_ff;
    }

    /// Serial forward step: propagate the state direction to the next slot.
    pub fn forward_riccati_recursion(
        &self,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        dt: f64,
        d: &SplitDirection,
        dx_next: &mut DVector<f64>,
    ) {
        let v = self.dimv;
        let dq = d.dq().into_owned();
        let dv = d.dv().into_owned();
        let dq_next = if self.has_floating_base {
            &kkt_matrix.fqq * &dq + dt * &dv + kkt_residual.fq().into_owned()
        } else {
            &dq + dt * &dv + kkt_residual.fq().into_owned()
        };
        let dv_next = &kkt_matrix.fvq * &dq
            + &kkt_matrix.fvv * &dv
            + &kkt_matrix.fvu * &d.du
            + kkt_residual.fv().into_owned();
        dx_next.rows_mut(0, v).copy_from(&dq_next);
        dx_next.rows_mut(v, v).copy_from(&dv_next);
    }

    /// Closed-loop factors for the pure-state-constraint machinery.
    pub fn factorize_state_constraint_parallel(
        &self,
        dt: f64,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        riccati: &mut SplitRiccatiFactorization,
    ) {
        let v = self.dimv;
        riccati.ap_bk.fill(0.0);
        if self.has_floating_base {
            riccati.ap_bk.view_mut((0, 0), (v, v)).copy_from(&kkt_matrix.fqq);
        } else {
            let mut tl = riccati.ap_bk.view_mut((0, 0), (v, v));
            tl.fill_diagonal(1.0);
        }
        for i in 0..v {
            riccati.ap_bk[(i, v + i)] = dt;
        }
        riccati.ap_bk.view_mut((v, 0), (v, v)).copy_from(&kkt_matrix.fvq);
        riccati.ap_bk.view_mut((v, v), (v, v)).copy_from(&kkt_matrix.fvv);
        let bk = &kkt_matrix.fvu * &riccati.k_gain;
        {
            let mut bottom = riccati.ap_bk.rows_mut(v, v);
            bottom += bk;
        }
        riccati.bginv_bt.fill(0.0);
        let bgb = &kkt_matrix.fvu * &riccati.ginv_bt;
        riccati.bginv_bt.view_mut((v, v), (v, v)).copy_from(&bgb);
        riccati.ap_bk_res.copy_from(&kkt_residual.fx);
        let bkff = &kkt_matrix.fvu * &riccati.k_ff;
        let mut tail = riccati.ap_bk_res.rows_mut(v, v);
        tail += bkff;
    }

    /// Costate direction from the cost-to-go (plus the state-constraint term
    /// when impulses are present).
    pub fn compute_costate_direction(riccati: &SplitRiccatiFactorization, d: &mut SplitDirection) {
        let dq = d.dq().into_owned();
        let dv = d.dv().into_owned();
        let v = dq.len();
        let dlmd = &riccati.pqq * &dq + &riccati.pqv * &dv - &riccati.sq
            + riccati.n_vec.rows(0, v);
        let dgmm = &riccati.pvq * &dq + &riccati.pvv * &dv - &riccati.sv
            + riccati.n_vec.rows(v, v);
        d.dlmd_mut().copy_from(&dlmd);
        d.dgmm_mut().copy_from(&dgmm);
    }

    /// `du = K·dx + k − Quu⁻¹Bᵀ·n_next` (last term only with impulse-time
    /// state constraints; `n_next` is the `n` of the following slot).
    pub fn compute_input_direction(
        riccati: &SplitRiccatiFactorization,
        n_next: Option<&DVector<f64>>,
        d: &mut SplitDirection,
    ) {
        let mut du = &riccati.k_gain * &d.dx + &riccati.k_ff;
        if let Some(n) = n_next {
            let v = riccati.ginv_bt.ncols();
            du -= &riccati.ginv_bt * n.rows(v, v);
        }
        d.du.copy_from(&du);
    }
}
