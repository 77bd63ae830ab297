use nalgebra::DVector;

use crate::ocp::split_direction::SplitDirection;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;
use crate::robot::RobotModel;

use super::ConstraintComponentData;
use super::pdipm;

/// `v ≤ v_max` on the actuated joints.
#[derive(Debug, Clone)]
pub struct JointVelocityUpperLimit {
    vmax: DVector<f64>,
}

impl JointVelocityUpperLimit {
    pub fn from_robot<R: RobotModel>(robot: &R) -> Self {
        Self { vmax: robot.joint_velocity_limit() }
    }

    pub fn new(vmax: DVector<f64>) -> Self {
        Self { vmax }
    }

    pub fn dimc(&self) -> usize {
        self.vmax.len()
    }

    fn v_tail<'a>(&self, s: &'a SplitSolution) -> nalgebra::DVectorView<'a, f64> {
        s.v.rows(s.v.len() - self.dimc(), self.dimc())
    }

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        self.v_tail(s).iter().zip(self.vmax.iter()).all(|(v, m)| v < m)
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.slack.copy_from(&(&self.vmax - self.v_tail(s)));
    }

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.residual
            .copy_from(&(self.v_tail(s) - &self.vmax + &data.slack));
    }

    pub fn augment_dual_residual(
        &self,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let nc = self.dimc();
        let mut lv = kkt_residual.lv_mut();
        let mut tail = lv.rows_mut(lv.nrows() - nc, nc);
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
            let r = 2 * v - nc + i;
            kkt_matrix.qxx[(r, r)] += dt * data.dual[i] / data.slack[i];
        }
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut lv = kkt_residual.lv_mut();
        let mut tail = lv.rows_mut(v - nc, nc);
        for i in 0..nc {
            tail[i] += dt * (data.dual[i] * data.residual[i] - data.duality[i]) / data.slack[i];
        }
    }

    pub fn expand(&self, data: &mut ConstraintComponentData, d: &SplitDirection) {
        let nc = self.dimc();
        let dv = d.dv();
        let dv_tail = dv.rows(dv.nrows() - nc, nc);
        data.dslack.copy_from(&(-dv_tail - &data.residual));
    }
}

/// `−v_max ≤ v` on the actuated joints.
#[derive(Debug, Clone)]
pub struct JointVelocityLowerLimit {
    vmin: DVector<f64>,
}

impl JointVelocityLowerLimit {
    pub fn from_robot<R: RobotModel>(robot: &R) -> Self {
        Self { vmin: -robot.joint_velocity_limit() }
    }

    pub fn new(vmin: DVector<f64>) -> Self {
        Self { vmin }
    }

    pub fn dimc(&self) -> usize {
        self.vmin.len()
    }

    fn v_tail<'a>(&self, s: &'a SplitSolution) -> nalgebra::DVectorView<'a, f64> {
        s.v.rows(s.v.len() - self.dimc(), self.dimc())
    }

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        self.v_tail(s).iter().zip(self.vmin.iter()).all(|(v, m)| v > m)
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.slack.copy_from(&(self.v_tail(s) - &self.vmin));
    }

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.residual
            .copy_from(&(&self.vmin - self.v_tail(s) + &data.slack));
    }

    pub fn augment_dual_residual(
        &self,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let nc = self.dimc();
        let mut lv = kkt_residual.lv_mut();
        let mut tail = lv.rows_mut(lv.nrows() - nc, nc);
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
            let r = 2 * v - nc + i;
            kkt_matrix.qxx[(r, r)] += dt * data.dual[i] / data.slack[i];
        }
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut lv = kkt_residual.lv_mut();
        let mut tail = lv.rows_mut(v - nc, nc);
        for i in 0..nc {
            tail[i] -= dt * (data.dual[i] * data.residual[i] - data.duality[i]) / data.slack[i];
        }
    }

    pub fn expand(&self, data: &mut ConstraintComponentData, d: &SplitDirection) {
        let nc = self.dimc();
        let dv = d.dv();
        let dv_tail = dv.rows(dv.nrows() - nc, nc);
        data.dslack.copy_from(&(dv_tail - &data.residual));
    }
}
