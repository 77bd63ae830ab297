use nalgebra::{DVector, DVectorView, DVectorViewMut};

use crate::robot::RobotDims;
use crate::robot::contact_status::ImpulseStatus;

/// Newton direction at an impulse stage.
#[derive(Debug, Clone)]
pub struct ImpulseSplitDirection {
    /// `(dq, dv)` stacked.
    pub dx: DVector<f64>,
    /// `(ddv, df)` stacked; `df` rows active.
    pub ddvf: DVector<f64>,
    /// `(dlmd, dgmm)` stacked.
    pub dlmdgmm: DVector<f64>,
    /// `(dbeta, dmu)` stacked.
    pub dbetamu: DVector<f64>,
    /// Direction of the impulse-condition multiplier.
    dxi: DVector<f64>,
    dimv: usize,
    dimp: usize,
}

impl ImpulseSplitDirection {
    pub fn new(dims: &RobotDims) -> Self {
        let v = dims.dimv;
        Self {
            dx: DVector::zeros(2 * v),
            ddvf: DVector::zeros(v + dims.max_dimf()),
            dlmdgmm: DVector::zeros(2 * v),
            dbetamu: DVector::zeros(v + dims.max_dimf()),
            dxi: DVector::zeros(dims.max_dimf()),
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
        self.dx.fill(0.0);
        self.ddvf.fill(0.0);
        self.dlmdgmm.fill(0.0);
        self.dbetamu.fill(0.0);
        self.dxi.fill(0.0);
    }

    pub fn dq(&self) -> DVectorView<'_, f64> {
        self.dx.rows(0, self.dimv)
    }

    pub fn dv(&self) -> DVectorView<'_, f64> {
        self.dx.rows(self.dimv, self.dimv)
    }

    pub fn ddv(&self) -> DVectorView<'_, f64> {
        self.ddvf.rows(0, self.dimv)
    }

    pub fn df(&self) -> DVectorView<'_, f64> {
        self.ddvf.rows(self.dimv, self.dimp)
    }

    pub fn df_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.ddvf.rows_mut(self.dimv, self.dimp)
    }

    pub fn ddvf_active_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.ddvf.rows_mut(0, self.dimv + self.dimp)
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
        self.dbetamu.rows(self.dimv, self.dimp)
    }

    pub fn dbetamu_active_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dbetamu.rows_mut(0, self.dimv + self.dimp)
    }

    pub fn dxi(&self) -> DVectorView<'_, f64> {
        self.dxi.rows(0, self.dimp)
    }

    pub fn dxi_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.dxi.rows_mut(0, self.dimp)
    }
}
