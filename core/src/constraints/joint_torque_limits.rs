use nalgebra::DVector;

use crate::ocp::split_direction::SplitDirection;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;
use crate::robot::RobotModel;

use super::ConstraintComponentData;
use super::pdipm;

/// `u ≤ u_max` on the actuated torques.
#[derive(Debug, Clone)]
pub struct JointTorqueUpperLimit {
    umax: DVector<f64>,
}

impl JointTorqueUpperLimit {
    pub fn from_robot<R: RobotModel>(robot: &R) -> Self {
        Self { umax: robot.joint_effort_limit() }
    }

    pub fn new(umax: DVector<f64>) -> Self {
        Self { umax }
    }

    pub fn dimc(&self) -> usize {
        self.umax.len()
    }

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        s.u.iter().zip(self.umax.iter()).all(|(u, m)| u < m)
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.slack.copy_from(&(&self.umax - &s.u));
    }

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.residual.copy_from(&(&s.u - &self.umax + &data.slack));
    }

    pub fn augment_dual_residual(
        &self,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let mut lu = kkt_residual.lu_mut();
        lu.axpy(dt, &data.dual, 1.0);
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
        {
            let mut quu = kkt_matrix.quu_mut();
            for i in 0..nc {
                quu[(i, i)] += dt * data.dual[i] / data.slack[i];
            }
        }
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut lu = kkt_residual.lu_mut();
        for i in 0..nc {
            lu[i] += dt * (data.dual[i] * data.residual[i] - data.duality[i]) / data.slack[i];
        }
    }

    pub fn expand(&self, data: &mut ConstraintComponentData, d: &SplitDirection) {
        data.dslack.copy_from(&(-&d.du - &data.residual));
    }
}

/// `−u_max ≤ u` on the actuated torques.
#[derive(Debug, Clone)]
pub struct JointTorqueLowerLimit {
    umin: DVector<f64>,
}

impl JointTorqueLowerLimit {
    pub fn from_robot<R: RobotModel>(robot: &R) -> Self {
        Self { umin: -robot.joint_effort_limit() }
    }

    pub fn new(umin: DVector<f64>) -> Self {
        Self { umin }
    }

    pub fn dimc(&self) -> usize {
        self.umin.len()
    }

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        s.u.iter().zip(self.umin.iter()).all(|(u, m)| u > m)
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.slack.copy_from(&(&s.u - &self.umin));
    }

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.residual.copy_from(&(&self.umin - &s.u + &data.slack));
    }

    pub fn augment_dual_residual(
        &self,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let mut lu = kkt_residual.lu_mut();
        lu.axpy(-dt, &data.dual, 1.0);
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
        {
            let mut quu = kkt_matrix.quu_mut();
            for i in 0..nc {
                quu[(i, i)] += dt * data.dual[i] / data.slack[i];
            }
        }
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut lu = kkt_residual.lu_mut();
        for i in 0..nc {
            lu[i] -= dt * (data.dual[i] * data.residual[i] - data.duality[i]) / data.slack[i];
        }
    }

    pub fn expand(&self, data: &mut ConstraintComponentData, d: &SplitDirection) {
        data.dslack.copy_from(&(&d.du - &data.residual));
    }
}
