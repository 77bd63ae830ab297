use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVector};

use crate::robot::RobotDims;
use crate::robot::contact_status::ContactStatus;

/// Hessian / Jacobian blocks of the KKT system at one sub-interval.
///
/// Storage is allocated once at maximum size; the active contact dimension is
/// a cursor (`dimf`) and the contact blocks are sliced to it. Control columns
/// are stacked `[u_passive; u]` so `qxu_full`/`quu_full` always have `dimv`
/// columns; the actuated sub-blocks are views.
#[derive(Debug, Clone)]
pub struct SplitKktMatrix {
    /// ∂(q ⊖ q_next)/∂q of the state equation (Lie-group adjoint when the
    /// base floats, identity otherwise).
    pub fqq: DMatrix<f64>,
    /// ∂(q_prev ⊖ q)/∂q, kept for the costate terms of the previous stage.
    pub fqq_prev: DMatrix<f64>,
    pub fvq: DMatrix<f64>,
    pub fvv: DMatrix<f64>,
    pub fvu: DMatrix<f64>,
    /// State Hessian, `2·dimv` square, blocks (qq, qv; vq, vv).
    pub qxx: DMatrix<f64>,
    /// State-input Hessian, columns over the stacked torques.
    pub qxu_full: DMatrix<f64>,
    /// Input Hessian over the stacked torques.
    pub quu_full: DMatrix<f64>,
    /// Diagonal of the acceleration Hessian.
    pub qaa: DVector<f64>,
    /// Contact-force Hessian; top-left `dimf` block is active.
    pub qff: DMatrix<f64>,
    dimv: usize,
    dimu: usize,
    dim_passive: usize,
    dimf: usize,
}

impl SplitKktMatrix {
    pub fn new(dims: &RobotDims) -> Self {
        let (v, x, fmax) = (dims.dimv, dims.dimx(), dims.max_dimf());
        Self {
            fqq: DMatrix::zeros(v, v),
            fqq_prev: DMatrix::zeros(v, v),
            fvq: DMatrix::zeros(v, v),
            fvv: DMatrix::zeros(v, v),
            fvu: DMatrix::zeros(v, dims.dimu()),
            qxx: DMatrix::zeros(x, x),
            qxu_full: DMatrix::zeros(x, v),
            quu_full: DMatrix::zeros(v, v),
            qaa: DVector::zeros(v),
            qff: DMatrix::zeros(fmax, fmax),
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

    pub fn dimv(&self) -> usize {
        self.dimv
    }

    pub fn set_zero(&mut self) {
        self.fqq.fill(0.0);
        self.fqq_prev.fill(0.0);
        self.fvq.fill(0.0);
        self.fvv.fill(0.0);
        self.fvu.fill(0.0);
        self.qxx.fill(0.0);
        self.qxu_full.fill(0.0);
        self.quu_full.fill(0.0);
        self.qaa.fill(0.0);
        self.qff.fill(0.0);
    }

    /// Actuated columns of the state-input Hessian.
    pub fn qxu(&self) -> DMatrixView<'_, f64> {
        self.qxu_full.view((0, self.dim_passive), (2 * self.dimv, self.dimu))
    }

    pub fn qxu_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.qxu_full.view_mut((0, self.dim_passive), (2 * self.dimv, self.dimu))
    }

    /// Actuated block of the input Hessian.
    pub fn quu(&self) -> DMatrixView<'_, f64> {
        self.quu_full
            .view((self.dim_passive, self.dim_passive), (self.dimu, self.dimu))
    }

    pub fn quu_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.quu_full
            .view_mut((self.dim_passive, self.dim_passive), (self.dimu, self.dimu))
    }

    /// Active contact-force Hessian.
    pub fn qff_active(&self) -> DMatrixView<'_, f64> {
        self.qff.view((0, 0), (self.dimf, self.dimf))
    }

    pub fn qff_active_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        self.qff.view_mut((0, 0), (self.dimf, self.dimf))
    }
}
