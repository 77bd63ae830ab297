use nalgebra::{DVector, DVectorView, DVectorViewMut};

use crate::robot::RobotDims;
use crate::robot::contact_status::ContactStatus;

/// KKT gradient blocks at one sub-interval: state-equation residual `fx` and
/// the stationarity residuals of each primal variable.
#[derive(Debug, Clone)]
pub struct SplitKktResidual {
    /// State-equation residual, `(Fq, Fv)` stacked.
    pub fx: DVector<f64>,
    /// Stationarity over the state, `(lq, lv)` stacked.
    pub lx: DVector<f64>,
    pub la: DVector<f64>,
    /// Stationarity over the contact forces; head `dimf` active.
    pub lf: DVector<f64>,
    /// Stationarity over the stacked torques `[u_passive; u]`.
    pub lu_full: DVector<f64>,
    dimv: usize,
    dimu: usize,
    dim_passive: usize,
    dimf: usize,
}

impl SplitKktResidual {
    pub fn new(dims: &RobotDims) -> Self {
        let v = dims.dimv;
        Self {
            fx: DVector::zeros(2 * v),
            lx: DVector::zeros(2 * v),
            la: DVector::zeros(v),
            lf: DVector::zeros(dims.max_dimf()),
            lu_full: DVector::zeros(v),
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

    pub fn set_zero(&mut self) {
        self.fx.fill(0.0);
        self.lx.fill(0.0);
        self.la.fill(0.0);
        self.lf.fill(0.0);
        self.lu_full.fill(0.0);
    }

    pub fn fq(&self) -> DVectorView<'_, f64> {
        self.fx.rows(0, self.dimv)
    }

    pub fn fq_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.fx.rows_mut(0, self.dimv)
    }

    pub fn fv(&self) -> DVectorView<'_, f64> {
        self.fx.rows(self.dimv, self.dimv)
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

    pub fn lv(&self) -> DVectorView<'_, f64> {
        self.lx.rows(self.dimv, self.dimv)
    }

    pub fn lv_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lx.rows_mut(self.dimv, self.dimv)
    }

    /// Actuated-torque stationarity.
    pub fn lu(&self) -> DVectorView<'_, f64> {
        self.lu_full.rows(self.dim_passive, self.dimu)
    }

    pub fn lu_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lu_full.rows_mut(self.dim_passive, self.dimu)
    }

    /// Passive-torque stationarity.
    pub fn lu_passive(&self) -> DVectorView<'_, f64> {
        self.lu_full.rows(0, self.dim_passive)
    }

    pub fn lu_passive_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lu_full.rows_mut(0, self.dim_passive)
    }

    pub fn lf_active(&self) -> DVectorView<'_, f64> {
        self.lf.rows(0, self.dimf)
    }

    pub fn lf_active_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.lf.rows_mut(0, self.dimf)
    }

    /// Squared norm of every residual block at this sub-interval.
    pub fn kkt_error_squared_norm(&self) -> f64 {
        self.fx.norm_squared()
            + self.lx.norm_squared()
            + self.la.norm_squared()
            + self.lf.rows(0, self.dimf).norm_squared()
            + self.lu_full.norm_squared()
    }
}
