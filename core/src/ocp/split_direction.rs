use nalgebra::{DVector, DVectorView, DVectorViewMut};

use crate::robot::RobotDims;
use crate::robot::contact_status::ContactStatus;

/// Newton direction at one ordinary sub-interval. Field sizes mirror the
/// owning [`super::split_solution::SplitSolution`]; `(da, df)` and
/// `(dbeta, dmu)` are kept stacked because the dynamics condenser recovers
/// them with one `MJtJinv` product.
#[derive(Debug, Clone)]
pub struct SplitDirection {
    /// `(dq, dv)` stacked.
    pub dx: DVector<f64>,
    pub du: DVector<f64>,
    pub du_passive: DVector<f64>,
    /// `(da, df)` stacked; `df` rows `dimv..dimv+dimf` active.
    pub daf: DVector<f64>,
    /// `(dlmd, dgmm)` stacked.
    pub dlmdgmm: DVector<f64>,
    /// `(dbeta, dmu)` stacked.
    pub dbetamu: DVector<f64>,
    pub dnu_passive: DVector<f64>,
    dimv: usize,
    dimf: usize,
}

impl SplitDirection {
    pub fn new(dims: &RobotDims) -> Self {
        let v = dims.dimv;
        Self {
            dx: DVector::zeros(2 * v),
            du: DVector::zeros(dims.dimu()),
            du_passive: DVector::zeros(dims.dim_passive),
            daf: DVector::zeros(v + dims.max_dimf()),
            dlmdgmm: DVector::zeros(2 * v),
            dbetamu: DVector::zeros(v + dims.max_dimf()),
            dnu_passive: DVector::zeros(dims.dim_passive),
            dimv: v,
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
        self.dx.fill(0.0);
        self.du.fill(0.0);
        self.du_passive.fill(0.0);
        self.daf.fill(0.0);
        self.dlmdgmm.fill(0.0);
        self.dbetamu.fill(0.0);
        self.dnu_passive.fill(0.0);
    }

    pub fn dq(&self) -> DVectorView<'_, f64> {
        self.dx.rows(0, self.dimv)
    }

    pub fn dq_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dx.rows_mut(0, self.dimv)
    }

    pub fn dv(&self) -> DVectorView<'_, f64> {
        self.dx.rows(self.dimv, self.dimv)
    }

    pub fn dv_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dx.rows_mut(self.dimv, self.dimv)
    }

    pub fn da(&self) -> DVectorView<'_, f64> {
        self.daf.rows(0, self.dimv)
    }

    pub fn df(&self) -> DVectorView<'_, f64> {
        self.daf.rows(self.dimv, self.dimf)
    }

    pub fn daf_active(&self) -> DVectorView<'_, f64> {
        self.daf.rows(0, self.dimv + self.dimf)
    }

    pub fn daf_active_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.daf.rows_mut(0, self.dimv + self.dimf)
    }

    pub fn df_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.daf.rows_mut(self.dimv, self.dimf)
    }

    pub fn dlmd(&self) -> DVectorView<'_, f64> {
        self.dlmdgmm.rows(0, self.dimv)
    }

    pub fn dlmd_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dlmdgmm.rows_mut(0, self.dimv)
    }

    pub fn dgmm(&self) -> DVectorView<'_, f64> {
        self.dlmdgmm.rows(self.dimv, self.dimv)
    }

    pub fn dgmm_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dlmdgmm.rows_mut(self.dimv, self.dimv)
    }

    pub fn dbeta(&self) -> DVectorView<'_, f64> {
        self.dbetamu.rows(0, self.dimv)
    }

    pub fn dmu(&self) -> DVectorView<'_, f64> {
        self.dbetamu.rows(self.dimv, self.dimf)
    }

    pub fn dbetamu_active_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dbetamu.rows_mut(0, self.dimv + self.dimf)
    }
}
