use nalgebra::{DMatrix, DVector};

use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::robot::{RobotDims, RobotModel};

use super::contact_dynamics::min_dt;
use super::split_direction::SplitDirection;
use super::split_kkt_matrix::SplitKktMatrix;
use super::split_kkt_residual::SplitKktResidual;
use super::split_solution::SplitSolution;

/// Condenser for a fixed-base robot without contacts. The acceleration and
/// the inverse-dynamics multiplier are eliminated through `M⁻¹` directly; no
/// Schur complement is needed.
#[derive(Debug, Clone)]
pub struct UnconstrainedDynamics {
    didq: DMatrix<f64>,
    didv: DMatrix<f64>,
    dida: DMatrix<f64>,
    minv: DMatrix<f64>,
    minv_didq: DMatrix<f64>,
    minv_didv: DMatrix<f64>,
    qaqv: DMatrix<f64>,
    qau: DMatrix<f64>,
    id: DVector<f64>,
    minv_id: DVector<f64>,
    la_cond: DVector<f64>,
    dimv: usize,
}

impl UnconstrainedDynamics {
    pub fn new(dims: &RobotDims) -> Self {
        let v = dims.dimv;
        debug_assert_eq!(dims.dim_passive, 0);
        Self {
            didq: DMatrix::zeros(v, v),
            didv: DMatrix::zeros(v, v),
            dida: DMatrix::zeros(v, v),
            minv: DMatrix::zeros(v, v),
            minv_didq: DMatrix::zeros(v, v),
            minv_didv: DMatrix::zeros(v, v),
            qaqv: DMatrix::zeros(v, 2 * v),
            qau: DMatrix::zeros(v, v),
            id: DVector::zeros(v),
            minv_id: DVector::zeros(v),
            la_cond: DVector::zeros(v),
            dimv: v,
        }
    }

    pub fn linearize<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        dt: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        debug_assert!(dt >= 0.0);
        robot.rnea(ws, &s.q, &s.v, &s.a, &mut self.id);
        self.id -= &s.u;
        robot.rnea_derivatives(
            ws,
            &s.q,
            &s.v,
            &s.a,
            &mut self.didq,
            &mut self.didv,
            &mut self.dida,
        );
        {
            let mut lq = kkt_residual.lq_mut();
            lq += dt * (self.didq.transpose() * &s.beta);
        }
        {
            let mut lv = kkt_residual.lv_mut();
            lv += dt * (self.didv.transpose() * &s.beta);
        }
        kkt_residual.la += dt * (self.dida.transpose() * &s.beta);
        {
            let mut lu = kkt_residual.lu_mut();
            lu -= dt * &s.beta;
        }
    }

    pub fn condense<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        q: &DVector<f64>,
        dt: f64,
        grid: GridIndex,
        backward_euler: bool,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), SolverError> {
        let v = self.dimv;
        robot.compute_minv(ws, q, &mut self.minv);
        if self.minv.iter().any(|x| !x.is_finite()) {
            return Err(SolverError::NumericalFailure {
                stage: grid,
                what: "inertia-matrix inverse produced non-finite entries",
            });
        }
        self.minv_didq.copy_from(&(&self.minv * &self.didq));
        self.minv_didv.copy_from(&(&self.minv * &self.didv));
        self.minv_id.copy_from(&(&self.minv * &self.id));
        for r in 0..v {
            let w = kkt_matrix.qaa[r];
            self.qaqv
                .view_mut((r, 0), (1, v))
                .copy_from(&(-w * self.minv_didq.row(r)));
            self.qaqv
                .view_mut((r, v), (1, v))
                .copy_from(&(-w * self.minv_didv.row(r)));
            self.qau.row_mut(r).copy_from(&(w * self.minv.row(r)));
            self.la_cond[r] = kkt_residual.la[r] - w * self.minv_id[r];
        }
        {
            let minv_dqv = self.minv_dqv();
            kkt_matrix.qxx -= minv_dqv.transpose() * &self.qaqv;
            kkt_matrix.qxu_full -= minv_dqv.transpose() * &self.qau;
            kkt_residual.lx -= minv_dqv.transpose() * &self.la_cond;
        }
        kkt_matrix.quu_full += &self.minv * &self.qau;
        kkt_residual.lu_full += &self.minv * &self.la_cond;
        kkt_matrix.fvq.copy_from(&(-dt * &self.minv_didq));
        kkt_matrix.fvv.copy_from(&(-dt * &self.minv_didv));
        let diag = if backward_euler { -1.0 } else { 1.0 };
        for r in 0..v {
            kkt_matrix.fvv[(r, r)] += diag;
        }
        kkt_matrix.fvu.copy_from(&(dt * &self.minv));
        {
            let shift = dt * &self.minv_id;
            let mut fv = kkt_residual.fv_mut();
            fv -= shift;
        }
        Ok(())
    }

    fn minv_dqv(&self) -> DMatrix<f64> {
        let v = self.dimv;
        let mut out = DMatrix::zeros(v, 2 * v);
        out.view_mut((0, 0), (v, v)).copy_from(&self.minv_didq);
        out.view_mut((0, v), (v, v)).copy_from(&self.minv_didv);
        out
    }

    pub fn compute_condensed_primal_direction(&mut self, d: &mut SplitDirection) {
        let v = self.dimv;
        let da = &self.minv * &d.du
            - &self.minv_didq * d.dq().into_owned()
            - &self.minv_didv * d.dv().into_owned()
            - &self.minv_id;
        d.daf_active_mut().rows_mut(0, v).copy_from(&da);
    }

    pub fn compute_condensed_dual_direction(
        &mut self,
        dt: f64,
        dgmm: &DVector<f64>,
        d: &mut SplitDirection,
    ) {
        if dt < min_dt() {
            let mut bm = d.dbetamu_active_mut();
            bm.fill(0.0);
            return;
        }
        self.la_cond += &self.qaqv * &d.dx + &self.qau * &d.du;
        self.la_cond.axpy(dt, dgmm, 1.0);
        let dbeta = -(1.0 / dt) * (&self.minv * &self.la_cond);
        d.dbetamu_active_mut().copy_from(&dbeta);
    }

    pub fn compute_residual<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        s: &SplitSolution,
    ) {
        robot.rnea(ws, &s.q, &s.v, &s.a, &mut self.id);
        self.id -= &s.u;
    }

    pub fn l1_norm_residual(&self, dt: f64) -> f64 {
        dt * self.id.lp_norm(1)
    }

    pub fn squared_norm_residual(&self, dt: f64) -> f64 {
        dt * dt * self.id.norm_squared()
    }
}
