use nalgebra::DVector;

use crate::ocp::split_direction::SplitDirection;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;
use crate::robot::RobotModel;

use super::ConstraintComponentData;
use super::pdipm;

/// `q ≤ q_max` on the actuated joints (the tail of the configuration; the
/// floating-base coordinates are unbounded).
#[derive(Debug, Clone)]
pub struct JointPositionUpperLimit {
    qmax: DVector<f64>,
}

impl JointPositionUpperLimit {
    pub fn from_robot<R: RobotModel>(robot: &R) -> Self {
        let (_, qmax) = robot.joint_position_limits();
        Self { qmax }
    }

    pub fn new(qmax: DVector<f64>) -> Self {
        Self { qmax }
    }

    pub fn dimc(&self) -> usize {
        self.qmax.len()
    }

    fn q_tail<'a>(&self, s: &'a SplitSolution) -> nalgebra::DVectorView<'a, f64> {
        s.q.rows(s.q.len() - self.dimc(), self.dimc())
    }

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        self.q_tail(s).iter().zip(self.qmax.iter()).all(|(q, m)| q < m)
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.slack.copy_from(&(&self.qmax - self.q_tail(s)));
    }

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.residual
            .copy_from(&(self.q_tail(s) - &self.qmax + &data.slack));
    }

    pub fn augment_dual_residual(
        &self,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let nc = self.dimc();
        let mut lq = kkt_residual.lq_mut();
        let mut tail = lq.rows_mut(lq.nrows() - nc, nc);
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
            let r = v - nc + i;
            kkt_matrix.qxx[(r, r)] += dt * data.dual[i] / data.slack[i];
        }
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut lq = kkt_residual.lq_mut();
        let mut tail = lq.rows_mut(v - nc, nc);
        for i in 0..nc {
            tail[i] += dt * (data.dual[i] * data.residual[i] - data.duality[i]) / data.slack[i];
        }
    }

    pub fn expand(&self, data: &mut ConstraintComponentData, d: &SplitDirection) {
        let nc = self.dimc();
        let dq = d.dq();
        let dq_tail = dq.rows(dq.nrows() - nc, nc);
        data.dslack.copy_from(&(-dq_tail - &data.residual));
    }
}

/// `q_min ≤ q` on the actuated joints.
#[derive(Debug, Clone)]
pub struct JointPositionLowerLimit {
    qmin: DVector<f64>,
}

impl JointPositionLowerLimit {
    pub fn from_robot<R: RobotModel>(robot: &R) -> Self {
        let (qmin, _) = robot.joint_position_limits();
        Self { qmin }
    }

    pub fn new(qmin: DVector<f64>) -> Self {
        Self { qmin }
    }

    pub fn dimc(&self) -> usize {
        self.qmin.len()
    }

    fn q_tail<'a>(&self, s: &'a SplitSolution) -> nalgebra::DVectorView<'a, f64> {
        s.q.rows(s.q.len() - self.dimc(), self.dimc())
    }

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        self.q_tail(s).iter().zip(self.qmin.iter()).all(|(q, m)| q > m)
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.slack.copy_from(&(self.q_tail(s) - &self.qmin));
    }

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        data.residual
            .copy_from(&(&self.qmin - self.q_tail(s) + &data.slack));
    }

    pub fn augment_dual_residual(
        &self,
        data: &ConstraintComponentData,
        dt: f64,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let nc = self.dimc();
        let mut lq = kkt_residual.lq_mut();
        let mut tail = lq.rows_mut(lq.nrows() - nc, nc);
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
            let r = v - nc + i;
            kkt_matrix.qxx[(r, r)] += dt * data.dual[i] / data.slack[i];
        }
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut lq = kkt_residual.lq_mut();
        let mut tail = lq.rows_mut(v - nc, nc);
        for i in 0..nc {
            tail[i] -= dt * (data.dual[i] * data.residual[i] - data.duality[i]) / data.slack[i];
        }
    }

    pub fn expand(&self, data: &mut ConstraintComponentData, d: &SplitDirection) {
        let nc = self.dimc();
        let dq = d.dq();
        let dq_tail = dq.rows(dq.nrows() - nc, nc);
        data.dslack.copy_from(&(dq_tail - &data.residual));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::test_harness::ChainModel;

    #[test]
    fn test_slack_positive_after_set_on_feasible_point() {
        let robot = ChainModel::new(4, 0);
        let limit = JointPositionUpperLimit::from_robot(&robot);
        let mut s = SplitSolution::new(&robot);
        s.q.fill(0.1);
        assert!(limit.is_feasible(&s));
        let mut data = ConstraintComponentData::new(limit.dimc());
        limit.set_slack(&mut data, &s);
        pdipm::set_slack_and_dual_positive(&mut data, 1e-4);
        assert!(data.slack.iter().all(|&x| x > 0.0));
        assert!(data.dual.iter().all(|&x| x > 0.0));
    }

    #[test]
    fn test_infeasible_point_is_detected() {
        let robot = ChainModel::new(4, 0);
        let limit = JointPositionUpperLimit::from_robot(&robot);
        let mut s = SplitSolution::new(&robot);
        let (_, qmax) = robot.joint_position_limits();
        s.q.copy_from(&(2.0 * qmax));
        assert!(!limit.is_feasible(&s));
    }
}
