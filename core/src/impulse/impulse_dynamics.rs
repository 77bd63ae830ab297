use nalgebra::{DMatrix, DVector};

use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::robot::contact_status::ImpulseStatus;
use crate::robot::{RobotDims, RobotModel};

use super::impulse_split_direction::ImpulseSplitDirection;
use super::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use super::impulse_split_solution::ImpulseSplitSolution;

/// Condenser of the impulse dynamics: instantaneous velocity jump under the
/// impulse forces plus the post-impulse contact-velocity constraint. The
/// Schur elimination removes `(dv, f)` from the KKT system; the
/// contact-position constraint stays as a pure-state equality for the Schur
/// solve over events.
#[derive(Debug, Clone)]
pub struct ImpulseDynamics {
    didq: DMatrix<f64>,
    diddv: DMatrix<f64>,
    dvdq: DMatrix<f64>,
    dvdv: DMatrix<f64>,
    /// Rows `[∂ID; ∂V]`, columns `(q, v)`.
    didc_dqv: DMatrix<f64>,
    mjtjinv: DMatrix<f64>,
    mjtjinv_didc_dqv: DMatrix<f64>,
    qdvfqv: DMatrix<f64>,
    /// `(ID, V)` stacked residual.
    idc: DVector<f64>,
    mjtjinv_idc: DVector<f64>,
    ldvf: DVector<f64>,
    scratch_v: DVector<f64>,
    scratch_c: DVector<f64>,
    dimv: usize,
    dimp: usize,
}

impl ImpulseDynamics {
    pub fn new(dims: &RobotDims) -> Self {
        let (v, fmax) = (dims.dimv, dims.max_dimf());
        let n = v + fmax;
        Self {
            didq: DMatrix::zeros(v, v),
            diddv: DMatrix::zeros(v, v),
            dvdq: DMatrix::zeros(fmax, v),
            dvdv: DMatrix::zeros(fmax, v),
            didc_dqv: DMatrix::zeros(n, 2 * v),
            mjtjinv: DMatrix::zeros(n, n),
            mjtjinv_didc_dqv: DMatrix::zeros(n, 2 * v),
            qdvfqv: DMatrix::zeros(n, 2 * v),
            idc: DVector::zeros(n),
            mjtjinv_idc: DVector::zeros(n),
            ldvf: DVector::zeros(n),
            scratch_v: DVector::zeros(v),
            scratch_c: DVector::zeros(fmax),
            dimv: v,
            dimp: 0,
        }
    }

    pub fn set_impulse_status(&mut self, status: &ImpulseStatus) {
        self.dimp = status.dimp();
    }

    fn n_active(&self) -> usize {
        self.dimv + self.dimp
    }

    /// Evaluate residuals/derivatives at `s` and augment the KKT residual
    /// with the multiplier terms. Kinematics in `ws` must be current.
    pub fn linearize<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        status: &ImpulseStatus,
        s: &ImpulseSplitSolution,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) {
        self.set_impulse_status(status);
        let (v, np) = (self.dimv, self.dimp);
        robot.set_impulse_forces(ws, status, &s.f);
        robot.rnea_impulse(ws, &s.q, &s.dv, &mut self.scratch_v);
        self.idc.rows_mut(0, v).copy_from(&self.scratch_v);
        robot.rnea_impulse_derivatives(ws, &s.q, &s.dv, &mut self.didq, &mut self.diddv);
        robot.compute_impulse_velocity_residual(ws, status, &s.v, &s.dv, &mut self.scratch_c);
        self.idc.rows_mut(v, np).copy_from(&self.scratch_c.rows(0, np));
        robot.compute_impulse_velocity_derivatives(ws, status, &mut self.dvdq, &mut self.dvdv);
        self.didc_dqv.view_mut((0, 0), (v, v)).copy_from(&self.didq);
        self.didc_dqv.view_mut((0, v), (v, v)).fill(0.0);
        self.didc_dqv
            .view_mut((v, 0), (np, v))
            .copy_from(&self.dvdq.view((0, 0), (np, v)));
        self.didc_dqv
            .view_mut((v, v), (np, v))
            .copy_from(&self.dvdv.view((0, 0), (np, v)));
        // multiplier terms
        {
            let mut lq = kkt_residual.lq_mut();
            lq += self.didq.transpose() * &s.beta;
        }
        kkt_residual.ldv += self.diddv.transpose() * &s.beta;
        if np > 0 {
            {
                let mut lf = kkt_residual.lf_active_mut();
                // ∂ID/∂f = -∂V/∂dvᵀ
                lf -= self.dvdv.view((0, 0), (np, v)) * &s.beta;
            }
            let mu = s.mu_stack().into_owned();
            {
                let mut lq = kkt_residual.lq_mut();
                lq += self.dvdq.view((0, 0), (np, v)).transpose() * &mu;
            }
            {
                let mut lv = kkt_residual.lv_mut();
                lv += self.dvdv.view((0, 0), (np, v)).transpose() * &mu;
            }
            kkt_residual.ldv += self.dvdv.view((0, 0), (np, v)).transpose() * &mu;
        }
    }

    /// Schur-eliminate `(dv, f)` and the contact-velocity multiplier.
    pub fn condense<R: RobotModel>(
        &mut self,
        robot: &R,
        grid: GridIndex,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) -> Result<(), SolverError> {
        let (v, np) = (self.dimv, self.dimp);
        let n = v + np;
        robot.compute_mjtjinv(&self.diddv, &self.dvdv, np, &mut self.mjtjinv);
        if self.mjtjinv.view((0, 0), (n, n)).iter().any(|x| !x.is_finite()) {
            return Err(SolverError::NumericalFailure {
                stage: grid,
                what: "impulse-KKT factorization produced non-finite entries",
            });
        }
        self.mjtjinv_didc_dqv.view_mut((0, 0), (n, 2 * v)).copy_from(
            &(self.mjtjinv.view((0, 0), (n, n)) * self.didc_dqv.view((0, 0), (n, 2 * v))),
        );
        self.mjtjinv_idc
            .rows_mut(0, n)
            .copy_from(&(self.mjtjinv.view((0, 0), (n, n)) * self.idc.rows(0, n)));
        for r in 0..v {
            let w = kkt_matrix.qdvdv[r];
            self.qdvfqv
                .row_mut(r)
                .copy_from(&(-w * self.mjtjinv_didc_dqv.row(r)));
            self.ldvf[r] = kkt_residual.ldv[r] - w * self.mjtjinv_idc[r];
        }
        if np > 0 {
            let qff = kkt_matrix.qff_active().into_owned();
            self.qdvfqv
                .view_mut((v, 0), (np, 2 * v))
                .copy_from(&(-&qff * self.mjtjinv_didc_dqv.view((v, 0), (np, 2 * v))));
            let lf_shift = &qff * self.mjtjinv_idc.rows(v, np);
            let mut lf_rows = self.ldvf.rows_mut(v, np);
            lf_rows.copy_from(&(-kkt_residual.lf_active() - lf_shift));
        }
        kkt_matrix.qxx -= self.mjtjinv_didc_dqv.view((0, 0), (n, 2 * v)).transpose()
            * self.qdvfqv.view((0, 0), (n, 2 * v));
        kkt_residual.lx -=
            self.mjtjinv_didc_dqv.view((0, 0), (n, 2 * v)).transpose() * self.ldvf.rows(0, n);
        // condensed state-equation blocks: v_next = v + dv with dv eliminated
        kkt_matrix
            .fvq
            .copy_from(&(-1.0 * self.mjtjinv_didc_dqv.view((0, 0), (v, v))));
        kkt_matrix
            .fvv
            .copy_from(&(-1.0 * self.mjtjinv_didc_dqv.view((0, v), (v, v))));
        for r in 0..v {
            kkt_matrix.fvv[(r, r)] += 1.0;
        }
        {
            let shift = self.mjtjinv_idc.rows(0, v).into_owned();
            let mut fv = kkt_residual.fv_mut();
            fv -= shift;
        }
        Ok(())
    }

    pub fn compute_condensed_primal_direction(&mut self, d: &mut ImpulseSplitDirection) {
        let n = self.n_active();
        let ddvf = -(self.mjtjinv_didc_dqv.view((0, 0), (n, 2 * self.dimv)) * &d.dx)
            - self.mjtjinv_idc.rows(0, n);
        d.ddvf_active_mut().copy_from(&ddvf);
        let mut df = d.df_mut();
        df.neg_mut();
    }

    /// `dgmm` is the velocity-costate direction of the following (aux) stage.
    pub fn compute_condensed_dual_direction(
        &mut self,
        dgmm: &DVector<f64>,
        d: &mut ImpulseSplitDirection,
    ) {
        let (v, n) = (self.dimv, self.n_active());
        {
            let shift = self.qdvfqv.view((0, 0), (n, 2 * v)) * &d.dx;
            let mut ldvf = self.ldvf.rows_mut(0, n);
            ldvf += shift;
        }
        {
            let mut top = self.ldvf.rows_mut(0, v);
            top += dgmm;
        }
        let dbm = -(self.mjtjinv.view((0, 0), (n, n)) * self.ldvf.rows(0, n));
        d.dbetamu_active_mut().copy_from(&dbm);
    }

    /// Residual-only evaluation (KKT-error path).
    pub fn compute_residual<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        status: &ImpulseStatus,
        s: &ImpulseSplitSolution,
    ) {
        self.set_impulse_status(status);
        let (v, np) = (self.dimv, self.dimp);
        robot.set_impulse_forces(ws, status, &s.f);
        robot.rnea_impulse(ws, &s.q, &s.dv, &mut self.scratch_v);
        self.idc.rows_mut(0, v).copy_from(&self.scratch_v);
        robot.compute_impulse_velocity_residual(ws, status, &s.v, &s.dv, &mut self.scratch_c);
        self.idc.rows_mut(v, np).copy_from(&self.scratch_c.rows(0, np));
    }

    pub fn l1_norm_residual(&self) -> f64 {
        self.idc.rows(0, self.n_active()).lp_norm(1)
    }

    pub fn squared_norm_residual(&self) -> f64 {
        self.idc.rows(0, self.n_active()).norm_squared()
    }
}
