use nalgebra::DVector;

use crate::robot::RobotModel;

use super::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use super::impulse_split_solution::ImpulseSplitSolution;

/// State equation across an impulse: the configuration is continuous and the
/// velocity jumps by `dv`, so the residual against the following (aux) stage
/// is `(q ⊖ q_next, v + dv − v_next)`.

pub fn compute_impulse_residual<R: RobotModel>(
    robot: &R,
    s: &ImpulseSplitSolution,
    q_next: &DVector<f64>,
    v_next: &DVector<f64>,
    kkt_residual: &mut ImpulseSplitKktResidual,
) {
    let mut qdiff = DVector::zeros(robot.dims().dimv);
    robot.subtract_configuration(&s.q, q_next, &mut qdiff);
    kkt_residual.fq_mut().copy_from(&qdiff);
    kkt_residual.fv_mut().copy_from(&(&s.v + &s.dv - v_next));
}

#[allow(clippy::too_many_arguments)]
pub fn linearize_impulse_state_equation<R: RobotModel>(
    robot: &R,
    q_prev: &DVector<f64>,
    s: &ImpulseSplitSolution,
    q_next: &DVector<f64>,
    v_next: &DVector<f64>,
    lmd_next: &DVector<f64>,
    gmm_next: &DVector<f64>,
    kkt_matrix: &mut ImpulseSplitKktMatrix,
    kkt_residual: &mut ImpulseSplitKktResidual,
) {
    compute_impulse_residual(robot, s, q_next, v_next, kkt_residual);
    if robot.dims().has_floating_base {
        robot.dsubtract_configuration_plus(&s.q, q_next, &mut kkt_matrix.fqq);
        robot.dsubtract_configuration_minus(q_prev, &s.q, &mut kkt_matrix.fqq_prev);
        robot.dsubtract_configuration_invert(&kkt_matrix.fqq_prev, &mut kkt_matrix.fqq_prev_inv);
        let add = kkt_matrix.fqq.transpose() * lmd_next + kkt_matrix.fqq_prev.transpose() * &s.lmd;
        let mut lq = kkt_residual.lq_mut();
        lq += add;
    } else {
        kkt_matrix.fqq.fill_with_identity();
        kkt_matrix.fqq_prev.fill(0.0);
        kkt_matrix.fqq_prev.fill_diagonal(-1.0);
        kkt_matrix.fqq_prev_inv.fill(0.0);
        kkt_matrix.fqq_prev_inv.fill_diagonal(-1.0);
        let mut lq = kkt_residual.lq_mut();
        lq += lmd_next - &s.lmd;
    }
    {
        let mut lv = kkt_residual.lv_mut();
        lv += gmm_next - &s.gmm;
    }
    kkt_residual.ldv += gmm_next;
}
