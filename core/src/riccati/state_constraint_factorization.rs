use nalgebra::{DMatrix, DMatrixView, DVector};

use crate::robot::RobotDims;

/// Schur-complement data of one impulse-time contact-position constraint
/// `E·δx(τᵢ) + e = 0`.
///
/// The `T` buffers hold, per sub-interval slot, the pullback of `Eᵀ` through
/// the closed-loop dynamics (`T(s) = (A+BK)(s)ᵀ·T(next)`, `T = Eᵀ` at the
/// impulse stage, zero after it); they turn the multiplier `ξ` into the
/// costate corrections of every earlier stage. Allocated only for the
/// impulse slots that are in use.
#[derive(Debug, Clone)]
pub struct StateConstraintFactorization {
    pub t_stages: Vec<DMatrix<f64>>,
    pub t_impulse: Vec<DMatrix<f64>>,
    pub t_aux: Vec<DMatrix<f64>>,
    pub t_lift: Vec<DMatrix<f64>>,
    /// `E = [Pq 0]`, rows `0..dimp` active.
    pub e_mat: DMatrix<f64>,
    /// `E·N`.
    pub en: DMatrix<f64>,
    /// `E·N·Eᵀ`.
    pub enet: DMatrix<f64>,
    /// `e`.
    pub e_vec: DVector<f64>,
    dimv: usize,
    dimp: usize,
}

impl StateConstraintFactorization {
    pub fn new(dims: &RobotDims, n: usize, max_num_impulse: usize) -> Self {
        let (x, fmax) = (dims.dimx(), dims.max_dimf());
        Self {
            t_stages: (0..=n).map(|_| DMatrix::zeros(x, fmax)).collect(),
            t_impulse: (0..max_num_impulse).map(|_| DMatrix::zeros(x, fmax)).collect(),
            t_aux: (0..max_num_impulse).map(|_| DMatrix::zeros(x, fmax)).collect(),
            t_lift: (0..max_num_impulse).map(|_| DMatrix::zeros(x, fmax)).collect(),
            e_mat: DMatrix::zeros(fmax, x),
            en: DMatrix::zeros(fmax, x),
            enet: DMatrix::zeros(fmax, fmax),
            e_vec: DVector::zeros(fmax),
            dimv: dims.dimv,
            dimp: 0,
        }
    }

    /// Active rows of this event's constraint; zero disables it (impulses in
    /// the first grid cell have no optimizable pre-impulse state).
    pub fn set_dimension(&mut self, dimp: usize) {
        self.dimp = dimp;
    }

    pub fn dimp(&self) -> usize {
        self.dimp
    }

    pub fn e_active(&self) -> DMatrixView<'_, f64> {
        self.e_mat.view((0, 0), (self.dimp, 2 * self.dimv))
    }

    pub fn en_active(&self) -> DMatrixView<'_, f64> {
        self.en.view((0, 0), (self.dimp, 2 * self.dimv))
    }

    pub fn enet_active(&self) -> DMatrixView<'_, f64> {
        self.enet.view((0, 0), (self.dimp, self.dimp))
    }

    pub fn zero_t_chains(&mut self) {
        for t in self
            .t_stages
            .iter_mut()
            .chain(self.t_impulse.iter_mut())
            .chain(self.t_aux.iter_mut())
            .chain(self.t_lift.iter_mut())
        {
            t.fill(0.0);
        }
    }
}
