use nalgebra::DVector;

use crate::robot::RobotModel;

use super::split_kkt_matrix::SplitKktMatrix;
use super::split_kkt_residual::SplitKktResidual;
use super::split_solution::SplitSolution;

/// Linearization of the discretized state equation. The forward-Euler form
/// couples a stage to its successor (direct Riccati path); the backward-Euler
/// form couples it to its predecessor (ParNMPC path). On a floating base the
/// configuration blocks are the Lie-group subtraction Jacobians supplied by
/// the robot oracle.

pub fn compute_forward_euler_residual<R: RobotModel>(
    robot: &R,
    dt: f64,
    s: &SplitSolution,
    q_next: &DVector<f64>,
    v_next: &DVector<f64>,
    kkt_residual: &mut SplitKktResidual,
) {
    let mut qdiff = DVector::zeros(robot.dims().dimv);
    robot.subtract_configuration(&s.q, q_next, &mut qdiff);
    kkt_residual.fq_mut().copy_from(&(qdiff + dt * &s.v));
    kkt_residual.fv_mut().copy_from(&(&s.v + dt * &s.a - v_next));
}

#[allow(clippy::too_many_arguments)]
pub fn linearize_forward_euler<R: RobotModel>(
    robot: &R,
    dt: f64,
    q_prev: &DVector<f64>,
    s: &SplitSolution,
    q_next: &DVector<f64>,
    v_next: &DVector<f64>,
    lmd_next: &DVector<f64>,
    gmm_next: &DVector<f64>,
    kkt_matrix: &mut SplitKktMatrix,
    kkt_residual: &mut SplitKktResidual,
) {
    compute_forward_euler_residual(robot, dt, s, q_next, v_next, kkt_residual);
    if robot.dims().has_floating_base {
        robot.dsubtract_configuration_plus(&s.q, q_next, &mut kkt_matrix.fqq);
        robot.dsubtract_configuration_minus(q_prev, &s.q, &mut kkt_matrix.fqq_prev);
        let add = kkt_matrix.fqq.transpose() * lmd_next + kkt_matrix.fqq_prev.transpose() * &s.lmd;
        let mut lq = kkt_residual.lq_mut();
        lq += add;
    } else {
        kkt_matrix.fqq.fill_with_identity();
        kkt_matrix.fqq_prev.fill(0.0);
        kkt_matrix.fqq_prev.fill_diagonal(-1.0);
        let mut lq = kkt_residual.lq_mut();
        lq += lmd_next - &s.lmd;
    }
    {
        let mut lv = kkt_residual.lv_mut();
        lv += dt * lmd_next + gmm_next - &s.gmm;
    }
    kkt_residual.la.axpy(dt, gmm_next, 1.0);
}

/// Terminal stationarity: the terminal costate must match the terminal cost
/// gradient; only `lx` is touched.
pub fn linearize_terminal<R: RobotModel>(
    robot: &R,
    q_prev: &DVector<f64>,
    s: &SplitSolution,
    kkt_matrix: &mut SplitKktMatrix,
    kkt_residual: &mut SplitKktResidual,
) {
    if robot.dims().has_floating_base {
        robot.dsubtract_configuration_minus(q_prev, &s.q, &mut kkt_matrix.fqq_prev);
        let add = kkt_matrix.fqq_prev.transpose() * &s.lmd;
        let mut lq = kkt_residual.lq_mut();
        lq += add;
    } else {
        let mut lq = kkt_residual.lq_mut();
        lq -= &s.lmd;
    }
    let mut lv = kkt_residual.lv_mut();
    lv -= &s.gmm;
}

pub fn compute_backward_euler_residual<R: RobotModel>(
    robot: &R,
    dt: f64,
    q_prev: &DVector<f64>,
    v_prev: &DVector<f64>,
    s: &SplitSolution,
    kkt_residual: &mut SplitKktResidual,
) {
    let mut qdiff = DVector::zeros(robot.dims().dimv);
    robot.subtract_configuration(q_prev, &s.q, &mut qdiff);
    kkt_residual.fq_mut().copy_from(&(qdiff + dt * &s.v));
    kkt_residual.fv_mut().copy_from(&(v_prev - &s.v + dt * &s.a));
}

/// Backward-Euler linearization. `next` carries `(q, lmd, gmm)` of the
/// following stage, absent on the horizon's last stage.
#[allow(clippy::too_many_arguments)]
pub fn linearize_backward_euler<R: RobotModel>(
    robot: &R,
    dt: f64,
    q_prev: &DVector<f64>,
    v_prev: &DVector<f64>,
    s: &SplitSolution,
    next: Option<(&DVector<f64>, &DVector<f64>, &DVector<f64>)>,
    kkt_matrix: &mut SplitKktMatrix,
    kkt_residual: &mut SplitKktResidual,
) {
    compute_backward_euler_residual(robot, dt, q_prev, v_prev, s, kkt_residual);
    if robot.dims().has_floating_base {
        robot.dsubtract_configuration_minus(q_prev, &s.q, &mut kkt_matrix.fqq);
        let mut add = kkt_matrix.fqq.transpose() * &s.lmd;
        if let Some((q_next, lmd_next, _)) = next {
            robot.dsubtract_configuration_plus(&s.q, q_next, &mut kkt_matrix.fqq_prev);
            add += kkt_matrix.fqq_prev.transpose() * lmd_next;
        }
        let mut lq = kkt_residual.lq_mut();
        lq += add;
    } else {
        kkt_matrix.fqq.fill(0.0);
        kkt_matrix.fqq.fill_diagonal(-1.0);
        let mut lq = kkt_residual.lq_mut();
        lq -= &s.lmd;
        if let Some((_, lmd_next, _)) = next {
            let mut lq = kkt_residual.lq_mut();
            lq += lmd_next;
        }
    }
    {
        let mut lv = kkt_residual.lv_mut();
        lv += dt * &s.lmd - &s.gmm;
        if let Some((_, _, gmm_next)) = next {
            lv += gmm_next;
        }
    }
    kkt_residual.la.axpy(dt, &s.gmm, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::test_harness::ChainModel;

    #[test]
    fn test_forward_euler_residual_vanishes_on_consistent_rollout() {
        let robot = ChainModel::new(3, 0);
        let dt = 0.1;
        let mut s = SplitSolution::new(&robot);
        s.q.copy_from_slice(&[0.3, -0.2, 0.1]);
        s.v.copy_from_slice(&[1.0, 0.5, -0.5]);
        s.a.copy_from_slice(&[0.2, 0.0, 0.4]);
        let q_next = &s.q + dt * &s.v;
        let v_next = &s.v + dt * &s.a;
        let mut res = SplitKktResidual::new(robot.dims());
        compute_forward_euler_residual(&robot, dt, &s, &q_next, &v_next, &mut res);
        assert!(res.fx.norm() < 1e-14);
    }

    #[test]
    fn test_forward_euler_costate_terms() {
        let robot = ChainModel::new(2, 0);
        let dt = 0.05;
        let mut s = SplitSolution::new(&robot);
        s.lmd.copy_from_slice(&[1.0, 2.0]);
        s.gmm.copy_from_slice(&[-1.0, 0.5]);
        let lmd_next = DVector::from_vec(vec![3.0, -1.0]);
        let gmm_next = DVector::from_vec(vec![0.5, 0.5]);
        let q_prev = s.q.clone();
        let (q_next, v_next) = (s.q.clone(), s.v.clone());
        let mut mat = SplitKktMatrix::new(robot.dims());
        let mut res = SplitKktResidual::new(robot.dims());
        linearize_forward_euler(
            &robot, dt, &q_prev, &s, &q_next, &v_next, &lmd_next, &gmm_next, &mut mat, &mut res,
        );
        // lq = lmd_next - lmd, lv = dt*lmd_next + gmm_next - gmm, la = dt*gmm_next
        assert!((res.lq()[0] - 2.0).abs() < 1e-14);
        assert!((res.lq()[1] + 3.0).abs() < 1e-14);
        assert!((res.lv()[0] - (0.05 * 3.0 + 0.5 + 1.0)).abs() < 1e-14);
        assert!((res.la[0] - 0.05 * 0.5).abs() < 1e-14);
    }
}
