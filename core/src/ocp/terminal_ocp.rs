use nalgebra::DVector;

use crate::cost::{CostFunction, CostFunctionData};
use crate::robot::RobotModel;

use super::split_direction::SplitDirection;
use super::split_kkt_matrix::SplitKktMatrix;
use super::split_kkt_residual::SplitKktResidual;
use super::split_solution::SplitSolution;
use super::state_equation;

/// Work unit of the terminal point of the horizon: terminal cost only, no
/// dynamics and no inequality constraints.
pub struct TerminalOcp<R: RobotModel> {
    cost_data: CostFunctionData,
    ws: R::Workspace,
    terminal_cost: f64,
    kkt_error: f64,
}

impl<R: RobotModel> TerminalOcp<R> {
    pub fn new(robot: &R) -> Self {
        Self {
            cost_data: CostFunctionData::new(robot.dims()),
            ws: robot.workspace(),
            terminal_cost: 0.0,
            kkt_error: 0.0,
        }
    }

    pub fn linearize_ocp(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        t: f64,
        q_prev: &DVector<f64>,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        kkt_matrix.set_zero();
        kkt_residual.set_zero();
        robot.update_frame_kinematics(&mut self.ws, &s.q);
        cost.eval_terminal_cost_derivatives(robot, &mut self.cost_data, t, s, kkt_residual);
        state_equation::linearize_terminal(robot, q_prev, s, kkt_matrix, kkt_residual);
        cost.eval_terminal_cost_hessian(robot, &mut self.cost_data, t, s, kkt_matrix);
    }

    pub fn compute_kkt_residual(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        t: f64,
        q_prev: &DVector<f64>,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        kkt_residual.set_zero();
        robot.update_frame_kinematics(&mut self.ws, &s.q);
        cost.eval_terminal_cost_derivatives(robot, &mut self.cost_data, t, s, kkt_residual);
        state_equation::linearize_terminal(robot, q_prev, s, kkt_matrix, kkt_residual);
        self.kkt_error = kkt_residual.lx.norm_squared();
    }

    pub fn kkt_error(&self) -> f64 {
        self.kkt_error
    }

    pub fn update_primal(&mut self, robot: &R, step: f64, d: &SplitDirection, s: &mut SplitSolution) {
        debug_assert!(step > 0.0 && step <= 1.0);
        s.integrate(robot, step, d);
    }

    pub fn eval_cost(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        t: f64,
        s: &SplitSolution,
    ) -> f64 {
        self.terminal_cost = cost.eval_terminal_cost(robot, &mut self.cost_data, t, s);
        self.terminal_cost
    }

    pub fn terminal_cost(&self) -> f64 {
        self.terminal_cost
    }
}
