use nalgebra::DVector;

use crate::ocp::split_direction::SplitDirection;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;

use super::ConstraintComponentData;
use super::pdipm;

/// `a ≤ a_max` on the actuated joints. The bound is user-provided; robots
/// rarely publish acceleration limits.
#[derive(Debug, Clone)]
pub struct JointAccelerationUpperLimit {
    amax: DVector<f64>,
}

impl JointAccelerationUpperLimit {
    pub fn new(amax: DVector<f64>) -> Self {
        Self { amax }
    }

    pub fn dimc(&self) -> usize {
        self.amax.len()
    }

    fn a_tail<'a>(&self, s: &'a SplitSolution) -> nalgebra::DVectorView<'a, f64> {
        s.a.rows(s.a.len() - self.dimc(), self.dimc())
    }

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        self.a_tail(s).iter().zip(self.amax.iter()).all(|(a, m)| a < m)
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.slack.copy_from(&(&self.amax - self.a_tail(s)));
    }

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.residual
            .copy_from(&(self.a_tail(s) - &self.amax + &data.slack));
    }

    pub fn augment_dual_residual(
        &self,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let nc = self.dimc();
        let n = kkt_residual.la.len();
        let mut tail = kkt_residual.la.rows_mut(n - nc, nc);
        tail.axpy(dt, &data.dual, 1.0);
    }

    pub fn condense(
        &self,
        data: &mut ConstraintComponentData,
        barrier: f64,
        dt: f64,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let nc = self.dimc();
        let v = kkt_matrix.dimv();
        for i in 0..nc {
            kkt_matrix.qaa[v - nc + i] += dt * data.dual[i] / data.slack[i];
        }
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut tail = kkt_residual.la.rows_mut(v - nc, nc);
        for i in 0..nc {
            tail[i] += dt * (data.dual[i] * data.residual[i] - data.duality[i]) / data.slack[i];
        }
    }

    pub fn expand(&self, data: &mut ConstraintComponentData, d: &SplitDirection) {
        let nc = self.dimc();
        let da = d.da();
        let da_tail = da.rows(da.nrows() - nc, nc);
        data.dslack.copy_from(&(-da_tail - &data.residual));
    }
}

/// `−a_max ≤ a` on the actuated joints.
#[derive(Debug, Clone)]
pub struct JointAccelerationLowerLimit {
    amin: DVector<f64>,
}

impl JointAccelerationLowerLimit {
    pub fn new(amin: DVector<f64>) -> Self {
        Self { amin }
    }

    pub fn dimc(&self) -> usize {
        self.amin.len()
    }

    fn a_tail<'a>(&self, s: &'a SplitSolution) -> nalgebra::DVectorView<'a, f64> {
        s.a.rows(s.a.len() - self.dimc(), self.dimc())
    }

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        self.a_tail(s).iter().zip(self.amin.iter()).all(|(a, m)| a > m)
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.slack.copy_from(&(self.a_tail(s) - &self.amin));
    }

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.residual
            .copy_from(&(&self.amin - self.a_tail(s) + &data.slack));
    }

    pub fn augment_dual_residual(
        &self,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let nc = self.dimc();
        let n = kkt_residual.la.len();
        let mut tail = kkt_residual.la.rows_mut(n - nc, nc);
        tail.axpy(-dt, &data.dual, 1.0);
    }

    pub fn condense(
        &self,
        data: &mut ConstraintComponentData,
        barrier: f64,
        dt: f64,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let nc = self.dimc();
        let v = kkt_matrix.dimv();
        for i in 0..nc {
            kkt_matrix.qaa[v - nc + i] += dt * data.dual[i] / data.slack[i];
        }
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut tail = kkt_residual.la.rows_mut(v - nc, nc);
        for i in 0..nc {
            tail[i] -= dt * (data.dual[i] * data.residual[i] - data.duality[i]) / data.slack[i];
        }
    }

    pub fn expand(&self, data: &mut ConstraintComponentData, d: &SplitDirection) {
        let nc = self.dimc();
        let da = d.da();
        let da_tail = da.rows(da.nrows() - nc, nc);
        data.dslack.copy_from(&(da_tail - &data.residual));
    }
}
