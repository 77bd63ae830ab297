use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVector, DVectorView, DVectorViewMut};

use crate::robot::RobotDims;
use crate::robot::contact_status::ImpulseStatus;

/// KKT blocks at an impulse stage. `pq` is the Jacobian of the
/// contact-position (impulse condition) constraint — the pure-state equality
/// consumed by the Schur solve — while the contact-velocity constraint is
/// condensed away together with `(dv, f)`.
#[derive(Debug, Clone)]
pub struct ImpulseSplitKktMatrix {
    pub fqq: DMatrix<f64>,
    pub fqq_prev: DMatrix<f64>,
    pub fqq_prev_inv: DMatrix<f64>,
    pub fvq: DMatrix<f64>,
    pub fvv: DMatrix<f64>,
    pub qxx: DMatrix<f64>,
    /// Diagonal of the velocity-jump Hessian.
    pub qdvdv: DVector<f64>,
    pub qff: DMatrix<f64>,
    /// Impulse-condition Jacobian w.r.t. `q`; rows `0..dimp` active.
    pub pq: DMatrix<f64>,
    dimv: usize,
    dimp: usize,
}

impl ImpulseSplitKktMatrix {
    pub fn new(dims: &RobotDims) -> Self {
        let (v, fmax) = (dims.dimv, dims.max_dimf());
        Self {
            fqq: DMatrix::zeros(v, v),
            fqq_prev: DMatrix::zeros(v, v),
            fqq_prev_inv: DMatrix::zeros(v, v),
            fvq: DMatrix::zeros(v, v),
            fvv: DMatrix::zeros(v, v),
            qxx: DMatrix::zeros(2 * v, 2 * v),
            qdvdv: DVector::zeros(v),
            qff: DMatrix::zeros(fmax, fmax),
            pq: DMatrix::zeros(fmax, v),
            dimv: v,
            dimp: 0,
        }
    }

    pub fn set_impulse_status(&mut self, status: &ImpulseStatus) {
        self.dimp = status.dimp();
    }

    pub fn dimp(&self) -> usize {
        self.dimp
    }

    pub fn set_zero(&mut self) {
        self.fqq.fill(0.0);
        self.fqq_prev.fill(0.0);
        self.fqq_prev_inv.fill(0.0);
        self.fvq.fill(0.0);
        self.fvv.fill(0.0);
        self.qxx.fill(0.0);
        self.qdvdv.fill(0.0);
        self.qff.fill(0.0);
        self.pq.fill(0.0);
    }

    pub fn qff_active(&self) -> DMatrixView<'_, f64> {
        self.qff.view((0, 0), (self.dimp, self.dimp))
    }

    pub fn qff_active_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.qff.view_mut((0, 0), (self.dimp, self.dimp))
    }

    pub fn pq_active(&self) -> DMatrixView<'_, f64> {
        self.pq.view((0, 0), (self.dimp, self.dimv))
    }

    pub fn pq_active_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.pq.view_mut((0, 0), (self.dimp, self.dimv))
    }
}

/// KKT residual blocks at an impulse stage.
#[derive(Debug, Clone)]
pub struct ImpulseSplitKktResidual {
    /// State-equation residual `(Fq, Fv)`.
    pub fx: DVector<f64>,
    /// Stationarity over `(q, v⁻)`.
    pub lx: DVector<f64>,
    /// Stationarity over the velocity jump.
    pub ldv: DVector<f64>,
    /// Stationarity over the impulse forces; head `dimp` active.
    pub lf: DVector<f64>,
    /// Impulse-condition (contact position) residual; head `dimp` active.
    pub p: DVector<f64>,
    dimv: usize,
    dimp: usize,
}

impl ImpulseSplitKktResidual {
    pub fn new(dims: &RobotDims) -> Self {
        let v = dims.dimv;
        Self {
            fx: DVector::zeros(2 * v),
            lx: DVector::zeros(2 * v),
            ldv: DVector::zeros(v),
            lf: DVector::zeros(dims.max_dimf()),
            p: DVector::zeros(dims.max_dimf()),
            dimv: v,
            dimp: 0,
        }
    }

    pub fn set_impulse_status(&mut self, status: &ImpulseStatus) {
        self.dimp = status.dimp();
    }

    pub fn dimp(&self) -> usize {
        self.dimp
    }

    pub fn set_zero(&mut self) {
        self.fx.fill(0.0);
        self.lx.fill(0.0);
        self.ldv.fill(0.0);
        self.lf.fill(0.0);
        self.p.fill(0.0);
    }

    pub fn fq_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.fx.rows_mut(0, self.dimv)
    }

    pub fn fv_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.fx.rows_mut(self.dimv, self.dimv)
    }

    pub fn lq(&self) -> DVectorView<'_, f64> {
        self.lx.rows(0, self.dimv)
    }

    pub fn lq_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lx.rows_mut(0, self.dimv)
    }

    pub fn lv_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lx.rows_mut(self.dimv, self.dimv)
    }

    pub fn lf_active(&self) -> DVectorView<'_, f64> {
        self.lf.rows(0, self.dimp)
    }

    pub fn lf_active_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lf.rows_mut(0, self.dimp)
    }

    pub fn p_active(&self) -> DVectorView<'_, f64> {
        self.p.rows(0, self.dimp)
    }

    pub fn p_active_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.p.rows_mut(0, self.dimp)
    }

    /// Squared KKT error. The impulse-condition residual only counts when the
    /// state constraint is handled at this event (impulse after stage 0).
    pub fn kkt_error_squared_norm(&self, state_constraint_valid: bool) -> f64 {
        let mut e = self.fx.norm_squared()
            + self.lx.norm_squared()
            + self.ldv.norm_squared()
            + self.lf.rows(0, self.dimp).norm_squared();
        if state_constraint_valid {
            e += self.p.rows(0, self.dimp).norm_squared();
        }
        e
    }
}
