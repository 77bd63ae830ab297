use nalgebra::DVector;

use crate::constraints::{Constraints, ConstraintsData};
use crate::cost::{CostFunction, CostFunctionData};
use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::robot::RobotModel;
use crate::robot::contact_status::ImpulseStatus;

use super::impulse_dynamics::ImpulseDynamics;
use super::impulse_split_direction::ImpulseSplitDirection;
use super::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use super::impulse_split_solution::ImpulseSplitSolution;
use super::impulse_state_equation;

/// Work unit of one impulse stage. Mirrors the ordinary `SplitOcp` with the
/// impulse dynamics condenser, impulse cost terms and the impulse-only
/// constraint components; additionally fills the contact-position constraint
/// (`pq`, `p`) consumed by the Schur solve.
pub struct ImpulseSplitOcp<R: RobotModel> {
    cost_data: CostFunctionData,
    constraints_data: ConstraintsData,
    dynamics: ImpulseDynamics,
    ws: R::Workspace,
    kkt_error: f64,
    scratch_p: DVector<f64>,
}

impl<R: RobotModel> ImpulseSplitOcp<R> {
    pub fn new(robot: &R, constraints: &Constraints) -> Self {
        let dims = robot.dims();
        Self {
            cost_data: CostFunctionData::new(dims),
            constraints_data: constraints.create_data(),
            dynamics: ImpulseDynamics::new(dims),
            ws: robot.workspace(),
            kkt_error: 0.0,
            scratch_p: DVector::zeros(dims.max_dimf()),
        }
    }

    pub fn init_constraints(&mut self, constraints: &Constraints, s: &ImpulseSplitSolution) {
        constraints.set_slack_and_dual_impulse(&mut self.constraints_data, s);
    }

    pub fn is_feasible(&self, constraints: &Constraints, s: &ImpulseSplitSolution) -> bool {
        constraints.is_feasible_impulse(s)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn linearize_ocp(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        status: &ImpulseStatus,
        grid: GridIndex,
        t: f64,
        q_prev: &DVector<f64>,
        s: &ImpulseSplitSolution,
        q_next: &DVector<f64>,
        v_next: &DVector<f64>,
        lmd_next: &DVector<f64>,
        gmm_next: &DVector<f64>,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) -> Result<(), SolverError> {
        kkt_matrix.set_impulse_status(status);
        kkt_residual.set_impulse_status(status);
        kkt_matrix.set_zero();
        kkt_residual.set_zero();
        robot.update_kinematics(&mut self.ws, &s.q, &s.v, &s.dv);
        cost.eval_impulse_cost_derivatives(
            robot,
            &mut self.cost_data,
            status,
            t,
            s,
            kkt_residual,
        );
        constraints.augment_dual_residual_impulse(&self.constraints_data, s, kkt_residual);
        impulse_state_equation::linearize_impulse_state_equation(
            robot, q_prev, s, q_next, v_next, lmd_next, gmm_next, kkt_matrix, kkt_residual,
        );
        self.dynamics.linearize(robot, &mut self.ws, status, s, kkt_residual);
        self.linearize_impulse_condition(robot, status, s, kkt_matrix, kkt_residual);
        cost.eval_impulse_cost_hessian(robot, &mut self.cost_data, status, t, s, kkt_matrix);
        constraints.condense_slack_and_dual_impulse(
            &mut self.constraints_data,
            s,
            kkt_matrix,
            kkt_residual,
        );
        self.dynamics.condense(robot, grid, kkt_matrix, kkt_residual)?;
        Ok(())
    }

    /// Contact-position constraint at touch-down: residual into `p`,
    /// Jacobian into `pq`, and the multiplier term into `lq`.
    fn linearize_impulse_condition(
        &mut self,
        robot: &R,
        status: &ImpulseStatus,
        s: &ImpulseSplitSolution,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) {
        let np = status.dimp();
        if np == 0 {
            return;
        }
        robot.compute_impulse_condition_residual(&self.ws, status, &mut self.scratch_p);
        kkt_residual
            .p_active_mut()
            .copy_from(&self.scratch_p.rows(0, np));
        robot.compute_impulse_condition_derivative(&self.ws, status, &mut kkt_matrix.pq);
        let dimv = robot.dims().dimv;
        let xi = s.xi_stack().into_owned();
        let mut lq = kkt_residual.lq_mut();
        lq += kkt_matrix.pq.view((0, 0), (np, dimv)).transpose() * xi;
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compute_kkt_residual(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        status: &ImpulseStatus,
        t: f64,
        q_prev: &DVector<f64>,
        s: &ImpulseSplitSolution,
        q_next: &DVector<f64>,
        v_next: &DVector<f64>,
        lmd_next: &DVector<f64>,
        gmm_next: &DVector<f64>,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
        kkt_residual: &mut ImpulseSplitKktResidual,
        state_constraint_valid: bool,
    ) {
        kkt_matrix.set_impulse_status(status);
        kkt_residual.set_impulse_status(status);
        kkt_residual.set_zero();
        robot.update_kinematics(&mut self.ws, &s.q, &s.v, &s.dv);
        cost.eval_impulse_cost_derivatives(
            robot,
            &mut self.cost_data,
            status,
            t,
            s,
            kkt_residual,
        );
        constraints.eval_constraint_impulse(&mut self.constraints_data, s);
        constraints.augment_dual_residual_impulse(&self.constraints_data, s, kkt_residual);
        impulse_state_equation::linearize_impulse_state_equation(
            robot, q_prev, s, q_next, v_next, lmd_next, gmm_next, kkt_matrix, kkt_residual,
        );
        self.dynamics.linearize(robot, &mut self.ws, status, s, kkt_residual);
        self.linearize_impulse_condition(robot, status, s, kkt_matrix, kkt_residual);
        self.kkt_error = kkt_residual.kkt_error_squared_norm(state_constraint_valid)
            + self.dynamics.squared_norm_residual()
            + constraints.squared_norm_residual(&self.constraints_data);
    }

    pub fn kkt_error(&self) -> f64 {
        self.kkt_error
    }

    pub fn expand_primal(
        &mut self,
        constraints: &Constraints,
        s: &ImpulseSplitSolution,
        d: &mut ImpulseSplitDirection,
    ) {
        self.dynamics.compute_condensed_primal_direction(d);
        constraints.compute_slack_and_dual_direction_impulse(&mut self.constraints_data, s, d);
    }

    pub fn expand_dual(&mut self, dgmm: &DVector<f64>, d: &mut ImpulseSplitDirection) {
        self.dynamics.compute_condensed_dual_direction(dgmm, d);
    }

    pub fn max_primal_step_size(&self, constraints: &Constraints) -> f64 {
        constraints.max_slack_step_size(&self.constraints_data)
    }

    pub fn max_dual_step_size(&self, constraints: &Constraints) -> f64 {
        constraints.max_dual_step_size(&self.constraints_data)
    }

    pub fn update_primal(
        &mut self,
        robot: &R,
        constraints: &Constraints,
        step: f64,
        d: &ImpulseSplitDirection,
        s: &mut ImpulseSplitSolution,
    ) {
        debug_assert!(step > 0.0 && step <= 1.0);
        s.integrate(robot, step, d);
        constraints.update_slack(&mut self.constraints_data, step);
    }

    pub fn update_dual(&mut self, constraints: &Constraints, step: f64) {
        constraints.update_dual(&mut self.constraints_data, step);
    }

    /// Cost + violation at a trial point (filter line search).
    #[allow(clippy::too_many_arguments)]
    pub fn eval_cost_and_violation(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        status: &ImpulseStatus,
        t: f64,
        s_trial: &ImpulseSplitSolution,
        next: Option<(&DVector<f64>, &DVector<f64>)>,
        slack_step: f64,
    ) -> (f64, f64) {
        robot.update_kinematics(&mut self.ws, &s_trial.q, &s_trial.v, &s_trial.dv);
        let mut c = cost.eval_impulse_cost(robot, &mut self.cost_data, status, t, s_trial);
        c += constraints.cost_slack_barrier_trial(&self.constraints_data, slack_step);
        constraints.eval_constraint_impulse(&mut self.constraints_data, s_trial);
        let mut viol = constraints.l1_norm_residual(&self.constraints_data);
        self.dynamics.compute_residual(robot, &mut self.ws, status, s_trial);
        viol += self.dynamics.l1_norm_residual();
        if let Some((q_next, v_next)) = next {
            let mut qdiff = DVector::zeros(robot.dims().dimv);
            robot.subtract_configuration(&s_trial.q, q_next, &mut qdiff);
            viol += qdiff.lp_norm(1);
            viol += (&s_trial.v + &s_trial.dv - v_next).lp_norm(1);
        }
        (c, viol)
    }
}
