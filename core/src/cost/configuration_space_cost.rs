use nalgebra::DVector;

use crate::impulse::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use crate::impulse::impulse_split_solution::ImpulseSplitSolution;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;
use crate::robot::{RobotDims, RobotModel};

use super::CostFunctionData;

/// Quadratic tracking cost in configuration space. The configuration error is
/// measured on the manifold (`q ⊖ q_ref`), so the gradient and Hessian pick
/// up the subtraction Jacobian when the base floats.
#[derive(Debug, Clone)]
pub struct ConfigurationSpaceCost {
    q_ref: DVector<f64>,
    v_ref: DVector<f64>,
    u_ref: DVector<f64>,
    q_weight: DVector<f64>,
    v_weight: DVector<f64>,
    a_weight: DVector<f64>,
    u_weight: DVector<f64>,
    qf_weight: DVector<f64>,
    vf_weight: DVector<f64>,
    dv_weight: DVector<f64>,
}

impl ConfigurationSpaceCost {
    pub fn new(dims: &RobotDims) -> Self {
        Self {
            q_ref: DVector::zeros(dims.dimq),
            v_ref: DVector::zeros(dims.dimv),
            u_ref: DVector::zeros(dims.dimu()),
            q_weight: DVector::zeros(dims.dimv),
            v_weight: DVector::zeros(dims.dimv),
            a_weight: DVector::zeros(dims.dimv),
            u_weight: DVector::zeros(dims.dimu()),
            qf_weight: DVector::zeros(dims.dimv),
            vf_weight: DVector::zeros(dims.dimv),
            dv_weight: DVector::zeros(dims.dimv),
        }
    }

    pub fn set_q_ref(&mut self, q_ref: DVector<f64>) {
        self.q_ref = q_ref;
    }

    pub fn set_v_ref(&mut self, v_ref: DVector<f64>) {
        self.v_ref = v_ref;
    }

    pub fn set_u_ref(&mut self, u_ref: DVector<f64>) {
        self.u_ref = u_ref;
    }

    pub fn set_q_weight(&mut self, w: DVector<f64>) {
        self.q_weight = w;
    }

    pub fn set_v_weight(&mut self, w: DVector<f64>) {
        self.v_weight = w;
    }

    pub fn set_a_weight(&mut self, w: DVector<f64>) {
        self.a_weight = w;
    }

    pub fn set_u_weight(&mut self, w: DVector<f64>) {
        self.u_weight = w;
    }

    pub fn set_qf_weight(&mut self, w: DVector<f64>) {
        self.qf_weight = w;
    }

    pub fn set_vf_weight(&mut self, w: DVector<f64>) {
        self.vf_weight = w;
    }

    pub fn set_dv_weight(&mut self, w: DVector<f64>) {
        self.dv_weight = w;
    }

    fn q_error<R: RobotModel>(&self, robot: &R, data: &mut CostFunctionData, q: &DVector<f64>) {
        robot.subtract_configuration(q, &self.q_ref, &mut data.q_diff);
    }

    fn weighted_square(w: &DVector<f64>, e: &DVector<f64>) -> f64 {
        0.5 * e.iter().zip(w.iter()).map(|(e, w)| w * e * e).sum::<f64>()
    }

    pub fn stage_cost<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        _t: f64,
        dt: f64,
        s: &SplitSolution,
    ) -> f64 {
        self.q_error(robot, data, &s.q);
        let v_err = &s.v - &self.v_ref;
        let u_err = &s.u - &self.u_ref;
        dt * (Self::weighted_square(&self.q_weight, &data.q_diff)
            + Self::weighted_square(&self.v_weight, &v_err)
            + Self::weighted_square(&self.a_weight, &s.a)
            + Self::weighted_square(&self.u_weight, &u_err))
    }

    pub fn stage_cost_derivatives<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        _t: f64,
        dt: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        self.q_error(robot, data, &s.q);
        let wq = data.q_diff.component_mul(&self.q_weight);
        if robot.dims().has_floating_base {
            robot.dsubtract_configuration_plus(&s.q, &self.q_ref, &mut data.j_qdiff);
            let mut lq = kkt_residual.lq_mut();
            lq += dt * (data.j_qdiff.transpose() * wq);
        } else {
            let mut lq = kkt_residual.lq_mut();
            lq += dt * wq;
        }
        {
            let mut lv = kkt_residual.lv_mut();
            lv += dt * (&s.v - &self.v_ref).component_mul(&self.v_weight);
        }
        kkt_residual.la += dt * s.a.component_mul(&self.a_weight);
        {
            let mut lu = kkt_residual.lu_mut();
            lu += dt * (&s.u - &self.u_ref).component_mul(&self.u_weight);
        }
    }

    pub fn stage_cost_hessian<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        _t: f64,
        dt: f64,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
    ) {
        let dims = robot.dims();
        let v = dims.dimv;
        if dims.has_floating_base {
            robot.dsubtract_configuration_plus(&s.q, &self.q_ref, &mut data.j_qdiff);
            // JᵀWJ with diagonal W: scale the rows of J by the weights first
            let mut wj = data.j_qdiff.clone();
            for r in 0..v {
                let w = self.q_weight[r];
                let mut row = wj.row_mut(r);
                row *= w;
            }
            let jtwj = data.j_qdiff.transpose() * wj;
            let mut blk = kkt_matrix.qxx.view_mut((0, 0), (v, v));
            blk += dt * jtwj;
        } else {
            for i in 0..v {
                kkt_matrix.qxx[(i, i)] += dt * self.q_weight[i];
            }
        }
        for i in 0..v {
            kkt_matrix.qxx[(v + i, v + i)] += dt * self.v_weight[i];
            kkt_matrix.qaa[i] += dt * self.a_weight[i];
        }
        let p = dims.dim_passive;
        for i in 0..dims.dimu() {
            kkt_matrix.quu_full[(p + i, p + i)] += dt * self.u_weight[i];
        }
    }

    pub fn terminal_cost<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        _t: f64,
        s: &SplitSolution,
    ) -> f64 {
        self.q_error(robot, data, &s.q);
        let v_err = &s.v - &self.v_ref;
        Self::weighted_square(&self.qf_weight, &data.q_diff)
            + Self::weighted_square(&self.vf_weight, &v_err)
    }

    pub fn terminal_cost_derivatives<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        _t: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        self.q_error(robot, data, &s.q);
        let wq = data.q_diff.component_mul(&self.qf_weight);
        if robot.dims().has_floating_base {
            robot.dsubtract_configuration_plus(&s.q, &self.q_ref, &mut data.j_qdiff);
            let mut lq = kkt_residual.lq_mut();
            lq += data.j_qdiff.transpose() * wq;
        } else {
            let mut lq = kkt_residual.lq_mut();
            lq += wq;
        }
        let mut lv = kkt_residual.lv_mut();
        lv += (&s.v - &self.v_ref).component_mul(&self.vf_weight);
    }

    pub fn terminal_cost_hessian<R: RobotModel>(
        &self,
        robot: &R,
        _data: &mut CostFunctionData,
        _t: f64,
        _s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
    ) {
        let v = robot.dims().dimv;
        for i in 0..v {
            kkt_matrix.qxx[(i, i)] += self.qf_weight[i];
            kkt_matrix.qxx[(v + i, v + i)] += self.vf_weight[i];
        }
    }

    pub fn impulse_cost<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        _t: f64,
        s: &ImpulseSplitSolution,
    ) -> f64 {
        self.q_error(robot, data, &s.q);
        let v_err = &s.v - &self.v_ref;
        Self::weighted_square(&self.q_weight, &data.q_diff)
            + Self::weighted_square(&self.v_weight, &v_err)
            + Self::weighted_square(&self.dv_weight, &s.dv)
    }

    pub fn impulse_cost_derivatives<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        _t: f64,
        s: &ImpulseSplitSolution,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) {
        self.q_error(robot, data, &s.q);
        let wq = data.q_diff.component_mul(&self.q_weight);
        if robot.dims().has_floating_base {
            robot.dsubtract_configuration_plus(&s.q, &self.q_ref, &mut data.j_qdiff);
            let mut lq = kkt_residual.lq_mut();
            lq += data.j_qdiff.transpose() * wq;
        } else {
            let mut lq = kkt_residual.lq_mut();
            lq += wq;
        }
        {
            let mut lv = kkt_residual.lv_mut();
            lv += (&s.v - &self.v_ref).component_mul(&self.v_weight);
        }
        kkt_residual.ldv += s.dv.component_mul(&self.dv_weight);
    }

    pub fn impulse_cost_hessian<R: RobotModel>(
        &self,
        robot: &R,
        _data: &mut CostFunctionData,
        _t: f64,
        _s: &ImpulseSplitSolution,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
    ) {
        let v = robot.dims().dimv;
        for i in 0..v {
            kkt_matrix.qxx[(i, i)] += self.q_weight[i];
            kkt_matrix.qxx[(v + i, v + i)] += self.v_weight[i];
            kkt_matrix.qdvdv[i] += self.dv_weight[i];
        }
    }
}
