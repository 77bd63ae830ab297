use nalgebra::{DMatrix, DVector};

use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::robot::contact_status::ContactStatus;
use crate::robot::{RobotDims, RobotModel};

use super::split_direction::SplitDirection;
use super::split_kkt_matrix::SplitKktMatrix;
use super::split_kkt_residual::SplitKktResidual;
use super::split_solution::SplitSolution;

/// Sub-interval lengths below this are treated as zero.
pub fn min_dt() -> f64 {
    f64::EPSILON.sqrt()
}

/// Scratch of the contact-dynamics condensation at one sub-interval.
///
/// The acceleration and contact-force rows are kept stacked (`a` first, then
/// the active force rows) so the whole elimination is a handful of products
/// with the `[M Jᵀ; J 0]⁻¹` factor. Buffers are max-size; `dimf` is the
/// active cursor and the active block of a stacked buffer is its top-left
/// `dimv + dimf` part.
#[derive(Debug, Clone)]
pub struct ContactDynamicsData {
    pub didq: DMatrix<f64>,
    pub didv: DMatrix<f64>,
    pub dida: DMatrix<f64>,
    pub dcdq: DMatrix<f64>,
    pub dcdv: DMatrix<f64>,
    pub dcda: DMatrix<f64>,
    /// Rows `[∂ID; ∂C]`, columns `(q, v)`.
    pub didc_dqv: DMatrix<f64>,
    pub mjtjinv: DMatrix<f64>,
    pub mjtjinv_didc_dqv: DMatrix<f64>,
    pub qafqv: DMatrix<f64>,
    pub qafu_full: DMatrix<f64>,
    /// `(ID, C)` stacked residual.
    pub idc: DVector<f64>,
    pub mjtjinv_idc: DVector<f64>,
    pub laf: DVector<f64>,
    pub u_passive: DVector<f64>,
    scratch_v: DVector<f64>,
    scratch_c: DVector<f64>,
    dimv: usize,
    dimu: usize,
    dim_passive: usize,
    dimf: usize,
}

impl ContactDynamicsData {
    pub fn new(dims: &RobotDims) -> Self {
        let (v, fmax) = (dims.dimv, dims.max_dimf());
        let naf = v + fmax;
        Self {
            didq: DMatrix::zeros(v, v),
            didv: DMatrix::zeros(v, v),
            dida: DMatrix::zeros(v, v),
            dcdq: DMatrix::zeros(fmax, v),
            dcdv: DMatrix::zeros(fmax, v),
            dcda: DMatrix::zeros(fmax, v),
            didc_dqv: DMatrix::zeros(naf, 2 * v),
            mjtjinv: DMatrix::zeros(naf, naf),
            mjtjinv_didc_dqv: DMatrix::zeros(naf, 2 * v),
            qafqv: DMatrix::zeros(naf, 2 * v),
            qafu_full: DMatrix::zeros(naf, v),
            idc: DVector::zeros(naf),
            mjtjinv_idc: DVector::zeros(naf),
            laf: DVector::zeros(naf),
            u_passive: DVector::zeros(dims.dim_passive),
            scratch_v: DVector::zeros(v),
            scratch_c: DVector::zeros(fmax),
            dimv: v,
            dimu: dims.dimu(),
            dim_passive: dims.dim_passive,
            dimf: 0,
        }
    }

    pub fn set_contact_status(&mut self, status: &ContactStatus) {
        self.dimf = status.dimf();
    }

    pub fn dimf(&self) -> usize {
        self.dimf
    }

    /// Active rows of the stacked `(a, f)` space.
    fn naf(&self) -> usize {
        self.dimv + self.dimf
    }
}

/// Condenser of the smooth contact dynamics: inverse-dynamics equality with
/// contact forces plus the Baumgarte-stabilized contact constraint. The
/// Schur elimination removes `(a, f)` (and the passive torques) from the KKT
/// system before the Riccati recursion.
#[derive(Debug, Clone)]
pub struct ContactDynamics {
    data: ContactDynamicsData,
    baumgarte_time_step: f64,
    has_floating_base: bool,
    has_active_contacts: bool,
}

impl ContactDynamics {
    pub fn new(dims: &RobotDims, baumgarte_time_step: f64) -> Result<Self, SolverError> {
        if !(baumgarte_time_step > 0.0) {
            return Err(SolverError::config("baumgarte_time_step must be positive"));
        }
        Ok(Self {
            data: ContactDynamicsData::new(dims),
            baumgarte_time_step,
            has_floating_base: dims.has_floating_base,
            has_active_contacts: false,
        })
    }

    pub fn set_contact_status(&mut self, status: &ContactStatus) {
        self.data.set_contact_status(status);
        self.has_active_contacts = status.has_active_contacts();
    }

    pub fn data(&self) -> &ContactDynamicsData {
        &self.data
    }

    /// Evaluate the dynamics residuals and their derivatives at `s` and
    /// augment the KKT residual with the multiplier terms. Kinematics in `ws`
    /// must be current.
    pub fn linearize<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        status: &ContactStatus,
        dt: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        debug_assert!(dt >= 0.0);
        self.set_contact_status(status);
        self.linearize_inverse_dynamics(robot, ws, status, s);
        self.linearize_contact_constraint(robot, ws, status);
        let d = &mut self.data;
        let (v, p, nf) = (d.dimv, d.dim_passive, d.dimf);
        // inverse-dynamics multiplier terms
        {
            let mut lq = kkt_residual.lq_mut();
            lq += dt * (d.didq.transpose() * &s.beta);
        }
        {
            let mut lv = kkt_residual.lv_mut();
            lv += dt * (d.didv.transpose() * &s.beta);
        }
        kkt_residual.la += dt * (d.dida.transpose() * &s.beta);
        if nf > 0 {
            // dID/df = -dC/daᵀ, so the force rows reuse the Baumgarte Jacobian
            let mut lf = kkt_residual.lf_active_mut();
            lf -= dt * (d.dcda.view((0, 0), (nf, v)) * &s.beta);
        }
        // torque rows of the inverse-dynamics constraint
        if self.has_floating_base {
            {
                let mut lu = kkt_residual.lu_mut();
                lu -= dt * s.beta.rows(p, v - p);
            }
            {
                let mut lup = kkt_residual.lu_passive_mut();
                lup -= dt * s.beta.rows(0, p);
                lup += dt * &s.nu_passive;
            }
            d.u_passive.copy_from(&s.u_passive);
        } else {
            let mut lu = kkt_residual.lu_mut();
            lu -= dt * &s.beta;
        }
        // contact-constraint multiplier terms
        if nf > 0 {
            let mu = s.mu_stack();
            {
                let mut lq = kkt_residual.lq_mut();
                lq += dt * (d.dcdq.view((0, 0), (nf, v)).transpose() * &mu);
            }
            {
                let mut lv = kkt_residual.lv_mut();
                lv += dt * (d.dcdv.view((0, 0), (nf, v)).transpose() * &mu);
            }
            kkt_residual.la += dt * (d.dcda.view((0, 0), (nf, v)).transpose() * &mu);
        }
    }

    fn linearize_inverse_dynamics<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        status: &ContactStatus,
        s: &SplitSolution,
    ) {
        let d = &mut self.data;
        robot.set_contact_forces(ws, status, &s.f);
        robot.rnea(ws, &s.q, &s.v, &s.a, &mut d.scratch_v);
        d.idc.rows_mut(0, d.dimv).copy_from(&d.scratch_v);
        let (v, p) = (d.dimv, d.dim_passive);
        if self.has_floating_base {
            {
                let mut id_passive = d.idc.rows_mut(0, p);
                id_passive -= &s.u_passive;
            }
            let mut id_actuated = d.idc.rows_mut(p, v - p);
            id_actuated -= &s.u;
        } else {
            let mut id = d.idc.rows_mut(0, v);
            id -= &s.u;
        }
        robot.rnea_derivatives(ws, &s.q, &s.v, &s.a, &mut d.didq, &mut d.didv, &mut d.dida);
        d.didc_dqv.view_mut((0, 0), (v, v)).copy_from(&d.didq);
        d.didc_dqv.view_mut((0, v), (v, v)).copy_from(&d.didv);
    }

    fn linearize_contact_constraint<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        status: &ContactStatus,
    ) {
        let d = &mut self.data;
        let (v, nf) = (d.dimv, d.dimf);
        if nf == 0 {
            return;
        }
        robot.compute_baumgarte_residual(ws, status, self.baumgarte_time_step, &mut d.scratch_c);
        d.idc.rows_mut(v, nf).copy_from(&d.scratch_c.rows(0, nf));
        robot.compute_baumgarte_derivatives(
            ws,
            status,
            self.baumgarte_time_step,
            &mut d.dcdq,
            &mut d.dcdv,
            &mut d.dcda,
        );
        d.didc_dqv.view_mut((v, 0), (nf, v)).copy_from(&d.dcdq.view((0, 0), (nf, v)));
        d.didc_dqv.view_mut((v, v), (nf, v)).copy_from(&d.dcdv.view((0, 0), (nf, v)));
    }

    /// Forward-Euler condensation (direct Riccati path).
    pub fn condense_forward_euler<R: RobotModel>(
        &mut self,
        robot: &R,
        dt: f64,
        grid: GridIndex,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), SolverError> {
        self.condense(robot, dt, grid, false, kkt_matrix, kkt_residual)
    }

    /// Backward-Euler condensation (ParNMPC path); only the sign of the
    /// identity part of `Fvv` differs.
    pub fn condense_backward_euler<R: RobotModel>(
        &mut self,
        robot: &R,
        dt: f64,
        grid: GridIndex,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), SolverError> {
        self.condense(robot, dt, grid, true, kkt_matrix, kkt_residual)
    }

    fn condense<R: RobotModel>(
        &mut self,
        robot: &R,
        dt: f64,
        grid: GridIndex,
        backward_euler: bool,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), SolverError> {
        debug_assert!(dt >= 0.0);
        let d = &mut self.data;
        let (v, u, p, nf) = (d.dimv, d.dimu, d.dim_passive, d.dimf);
        let naf = v + nf;
        robot.compute_mjtjinv(&d.dida, &d.dcda, nf, &mut d.mjtjinv);
        if d.mjtjinv.view((0, 0), (naf, naf)).iter().any(|x| !x.is_finite()) {
            return Err(SolverError::NumericalFailure {
                stage: grid,
                what: "contact-KKT factorization produced non-finite entries",
            });
        }
        d.mjtjinv_didc_dqv
            .view_mut((0, 0), (naf, 2 * v))
            .copy_from(&(d.mjtjinv.view((0, 0), (naf, naf)) * d.didc_dqv.view((0, 0), (naf, 2 * v))));
        d.mjtjinv_idc
            .rows_mut(0, naf)
            .copy_from(&(d.mjtjinv.view((0, 0), (naf, naf)) * d.idc.rows(0, naf)));
        // Qaf blocks: a-rows scaled by the (diagonal) acceleration Hessian,
        // f-rows by the contact-force Hessian.
        for r in 0..v {
            let w = kkt_matrix.qaa[r];
            d.qafqv
                .row_mut(r)
                .copy_from(&(-w * d.mjtjinv_didc_dqv.row(r)));
            d.qafu_full
                .row_mut(r)
                .copy_from(&(w * d.mjtjinv.view((0, 0), (naf, naf)).row(r).columns(0, v)));
        }
        if nf > 0 {
            let qff = kkt_matrix.qff_active().into_owned();
            d.qafqv
                .view_mut((v, 0), (nf, 2 * v))
                .copy_from(&(-&qff * d.mjtjinv_didc_dqv.view((v, 0), (nf, 2 * v))));
            d.qafu_full
                .view_mut((v, 0), (nf, v))
                .copy_from(&(&qff * d.mjtjinv.view((v, 0), (nf, v))));
        }
        // laf
        d.laf.rows_mut(0, v).copy_from(&kkt_residual.la);
        for r in 0..v {
            d.laf[r] -= kkt_matrix.qaa[r] * d.mjtjinv_idc[r];
        }
        if nf > 0 {
            let lf_shift = kkt_matrix.qff_active() * d.mjtjinv_idc.rows(v, nf);
            let mut lf_rows = d.laf.rows_mut(v, nf);
            lf_rows.copy_from(&(-kkt_residual.lf_active() - lf_shift));
        }
        // reduced Hessian and gradient blocks
        kkt_matrix.qxx -= d.mjtjinv_didc_dqv.view((0, 0), (naf, 2 * v)).transpose()
            * d.qafqv.view((0, 0), (naf, 2 * v));
        kkt_matrix.qxu_full -= d.mjtjinv_didc_dqv.view((0, 0), (naf, 2 * v)).transpose()
            * d.qafu_full.view((0, 0), (naf, v));
        kkt_residual.lx -=
            d.mjtjinv_didc_dqv.view((0, 0), (naf, 2 * v)).transpose() * d.laf.rows(0, naf);
        kkt_matrix.quu_full +=
            d.mjtjinv.view((0, 0), (v, naf)) * d.qafu_full.view((0, 0), (naf, v));
        kkt_residual.lu_full += d.mjtjinv.view((0, 0), (v, naf)) * d.laf.rows(0, naf);
        if self.has_floating_base {
            let shift_u = kkt_matrix.quu_full.view((p, 0), (u, p)) * &d.u_passive;
            let mut lu = kkt_residual.lu_mut();
            lu -= shift_u;
            kkt_residual.lx -= kkt_matrix.qxu_full.view((0, 0), (2 * v, p)) * &d.u_passive;
        }
        // condensed state-equation blocks
        kkt_matrix
            .fvq
            .copy_from(&(-dt * d.mjtjinv_didc_dqv.view((0, 0), (v, v))));
        kkt_matrix
            .fvv
            .copy_from(&(-dt * d.mjtjinv_didc_dqv.view((0, v), (v, v))));
        if backward_euler {
            for r in 0..v {
                kkt_matrix.fvv[(r, r)] -= 1.0;
            }
        } else {
            for r in 0..v {
                kkt_matrix.fvv[(r, r)] += 1.0;
            }
        }
        kkt_matrix
            .fvu
            .copy_from(&(dt * d.mjtjinv.view((0, p), (v, u))));
        if self.has_floating_base {
            let shift = dt * (d.mjtjinv.view((0, 0), (v, p)) * &d.u_passive);
            let mut fv = kkt_residual.fv_mut();
            fv -= shift;
        }
        {
            let shift = dt * d.mjtjinv_idc.rows(0, v);
            let mut fv = kkt_residual.fv_mut();
            fv -= shift;
        }
        Ok(())
    }

    /// Recover `(da, df)` (and the passive torque direction) from the state
    /// and input directions.
    pub fn compute_condensed_primal_direction(&mut self, d: &mut SplitDirection) {
        let data = &mut self.data;
        let (v, u, p, nf) = (data.dimv, data.dimu, data.dim_passive, data.dimf);
        let naf = v + nf;
        d.du_passive.copy_from(&(-&data.u_passive));
        data.scratch_v.rows_mut(0, p).copy_from(&d.du_passive);
        data.scratch_v.rows_mut(p, u).copy_from(&d.du);
        let daf = data.mjtjinv.view((0, 0), (naf, v)) * data.scratch_v.rows(0, v)
            - data.mjtjinv_didc_dqv.view((0, 0), (naf, 2 * v)) * &d.dx
            - data.mjtjinv_idc.rows(0, naf);
        d.daf_active_mut().copy_from(&daf);
        let mut df = d.df_mut();
        df.neg_mut();
    }

    /// Recover `(dβ, dμ)` and the passive-torque multiplier direction.
    /// `dgmm` is the velocity-costate direction attached to this stage's
    /// state equation. For `dt` below `min_dt()` the duals are undefined and
    /// set to zero.
    pub fn compute_condensed_dual_direction(
        &mut self,
        dt: f64,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        dgmm: &DVector<f64>,
        d: &mut SplitDirection,
    ) {
        let data = &mut self.data;
        let (v, u, p, nf) = (data.dimv, data.dimu, data.dim_passive, data.dimf);
        let naf = v + nf;
        if dt < min_dt() {
            d.dnu_passive.fill(0.0);
            let mut bm = d.dbetamu_active_mut();
            bm.fill(0.0);
            return;
        }
        data.scratch_v.rows_mut(0, p).copy_from(&d.du_passive);
        data.scratch_v.rows_mut(p, u).copy_from(&d.du);
        if self.has_floating_base {
            let mut dnu = kkt_residual.lu_passive().into_owned();
            dnu += kkt_matrix.quu_full.view((0, 0), (p, v)) * data.scratch_v.rows(0, v);
            dnu += kkt_matrix.qxu_full.view((0, 0), (2 * v, p)).transpose() * &d.dx;
            dnu += dt * (data.mjtjinv.view((0, 0), (p, v)) * dgmm);
            dnu.scale_mut(-1.0 / dt);
            d.dnu_passive.copy_from(&dnu);
        }
        {
            let shift = data.qafqv.view((0, 0), (naf, 2 * v)) * &d.dx
                + data.qafu_full.view((0, 0), (naf, v)) * data.scratch_v.rows(0, v);
            let mut laf = data.laf.rows_mut(0, naf);
            laf += shift;
        }
        {
            let mut la = data.laf.rows_mut(0, v);
            la.axpy(dt, dgmm, 1.0);
        }
        let dbm = -(1.0 / dt) * (data.mjtjinv.view((0, 0), (naf, naf)) * data.laf.rows(0, naf));
        d.dbetamu_active_mut().copy_from(&dbm);
    }

    /// Evaluate only the dynamics residuals (KKT-error path).
    pub fn compute_residual<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        status: &ContactStatus,
        s: &SplitSolution,
    ) {
        self.set_contact_status(status);
        self.linearize_inverse_dynamics_residual_only(robot, ws, status, s);
        let d = &mut self.data;
        if d.dimf > 0 {
            robot.compute_baumgarte_residual(ws, status, self.baumgarte_time_step, &mut d.scratch_c);
            let nf = d.dimf;
            let v = d.dimv;
            d.idc.rows_mut(v, nf).copy_from(&d.scratch_c.rows(0, nf));
        }
    }

    fn linearize_inverse_dynamics_residual_only<R: RobotModel>(
        &mut self,
        robot: &R,
        ws: &mut R::Workspace,
        status: &ContactStatus,
        s: &SplitSolution,
    ) {
        let d = &mut self.data;
        robot.set_contact_forces(ws, status, &s.f);
        robot.rnea(ws, &s.q, &s.v, &s.a, &mut d.scratch_v);
        d.idc.rows_mut(0, d.dimv).copy_from(&d.scratch_v);
        let (v, p) = (d.dimv, d.dim_passive);
        if self.has_floating_base {
            {
                let mut id_passive = d.idc.rows_mut(0, p);
                id_passive -= &s.u_passive;
            }
            let mut id_actuated = d.idc.rows_mut(p, v - p);
            id_actuated -= &s.u;
            d.u_passive.copy_from(&s.u_passive);
        } else {
            let mut id = d.idc.rows_mut(0, v);
            id -= &s.u;
        }
    }

    pub fn l1_norm_residual(&self, dt: f64) -> f64 {
        let d = &self.data;
        let base = d.idc.rows(0, d.naf()).lp_norm(1);
        if self.has_floating_base {
            dt * (base + d.u_passive.lp_norm(1))
        } else {
            dt * base
        }
    }

    pub fn squared_norm_residual(&self, dt: f64) -> f64 {
        let d = &self.data;
        let base = d.idc.rows(0, d.naf()).norm_squared();
        if self.has_floating_base {
            dt * dt * (base + d.u_passive.norm_squared())
        } else {
            dt * dt * base
        }
    }
}
