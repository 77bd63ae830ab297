pub mod configuration_space_cost;
pub mod contact_force_cost;

use nalgebra::{DMatrix, DVector};

use crate::impulse::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use crate::impulse::impulse_split_solution::ImpulseSplitSolution;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;
use crate::robot::contact_status::ImpulseStatus;
use crate::robot::{RobotDims, RobotModel};

pub use self::configuration_space_cost::ConfigurationSpaceCost;
pub use self::contact_force_cost::ContactForceCost;

/// One term of the stage/terminal/impulse cost. The set is closed and
/// dispatched by match, so the hot loops stay monomorphic.
#[derive(Debug, Clone)]
pub enum CostComponent {
    ConfigurationSpace(ConfigurationSpaceCost),
    ContactForce(ContactForceCost),
}

/// Per-sub-interval scratch shared by all cost components.
#[derive(Debug, Clone)]
pub struct CostFunctionData {
    pub q_diff: DVector<f64>,
    pub j_qdiff: DMatrix<f64>,
}

impl CostFunctionData {
    pub fn new(dims: &RobotDims) -> Self {
        Self {
            q_diff: DVector::zeros(dims.dimv),
            j_qdiff: DMatrix::zeros(dims.dimv, dims.dimv),
        }
    }
}

/// Sum of cost components. Components only *augment* KKT blocks; zeroing the
/// buffers is the linearizer's job.
#[derive(Debug, Clone, Default)]
pub struct CostFunction {
    components: Vec<CostComponent>,
}

impl CostFunction {
    pub fn new() -> Self {
        Self { components: Vec::new() }
    }

    pub fn push(&mut self, component: CostComponent) {
        self.components.push(component);
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn eval_stage_cost<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        t: f64,
        dt: f64,
        s: &SplitSolution,
    ) -> f64 {
        self.components
            .iter()
            .map(|c| match c {
                CostComponent::ConfigurationSpace(cost) => cost.stage_cost(robot, data, t, dt, s),
                CostComponent::ContactForce(cost) => cost.stage_cost(t, dt, s),
            })
            .sum()
    }

    pub fn eval_stage_cost_derivatives<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        t: f64,
        dt: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        for c in &self.components {
            match c {
                CostComponent::ConfigurationSpace(cost) => {
                    cost.stage_cost_derivatives(robot, data, t, dt, s, kkt_residual)
                }
                CostComponent::ContactForce(cost) => {
                    cost.stage_cost_derivatives(t, dt, s, kkt_residual)
                }
            }
        }
    }

    pub fn eval_stage_cost_hessian<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        t: f64,
        dt: f64,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
    ) {
        for c in &self.components {
            match c {
                CostComponent::ConfigurationSpace(cost) => {
                    cost.stage_cost_hessian(robot, data, t, dt, s, kkt_matrix)
                }
                CostComponent::ContactForce(cost) => cost.stage_cost_hessian(t, dt, s, kkt_matrix),
            }
        }
    }

    pub fn eval_terminal_cost<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        t: f64,
        s: &SplitSolution,
    ) -> f64 {
        self.components
            .iter()
            .map(|c| match c {
                CostComponent::ConfigurationSpace(cost) => cost.terminal_cost(robot, data, t, s),
                CostComponent::ContactForce(_) => 0.0,
            })
            .sum()
    }

    pub fn eval_terminal_cost_derivatives<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        t: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        for c in &self.components {
            if let CostComponent::ConfigurationSpace(cost) = c {
                cost.terminal_cost_derivatives(robot, data, t, s, kkt_residual);
            }
        }
    }

    pub fn eval_terminal_cost_hessian<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        t: f64,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
    ) {
        for c in &self.components {
            if let CostComponent::ConfigurationSpace(cost) = c {
                cost.terminal_cost_hessian(robot, data, t, s, kkt_matrix);
            }
        }
    }

    pub fn eval_impulse_cost<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        status: &ImpulseStatus,
        t: f64,
        s: &ImpulseSplitSolution,
    ) -> f64 {
        self.components
            .iter()
            .map(|c| match c {
                CostComponent::ConfigurationSpace(cost) => cost.impulse_cost(robot, data, t, s),
                CostComponent::ContactForce(cost) => cost.impulse_cost(status, t, s),
            })
            .sum()
    }

    pub fn eval_impulse_cost_derivatives<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        status: &ImpulseStatus,
        t: f64,
        s: &ImpulseSplitSolution,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) {
        for c in &self.components {
            match c {
                CostComponent::ConfigurationSpace(cost) => {
                    cost.impulse_cost_derivatives(robot, data, t, s, kkt_residual)
                }
                CostComponent::ContactForce(cost) => {
                    cost.impulse_cost_derivatives(status, t, s, kkt_residual)
                }
            }
        }
    }

    pub fn eval_impulse_cost_hessian<R: RobotModel>(
        &self,
        robot: &R,
        data: &mut CostFunctionData,
        status: &ImpulseStatus,
        t: f64,
        s: &ImpulseSplitSolution,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
    ) {
        for c in &self.components {
            match c {
                CostComponent::ConfigurationSpace(cost) => {
                    cost.impulse_cost_hessian(robot, data, t, s, kkt_matrix)
                }
                CostComponent::ContactForce(cost) => {
                    cost.impulse_cost_hessian(status, t, s, kkt_matrix)
                }
            }
        }
    }

}
