use nalgebra::DVector;

use crate::constraints::{Constraints, ConstraintsData};
use crate::cost::{CostFunction, CostFunctionData};
use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::robot::RobotModel;
use crate::robot::contact_status::ContactStatus;

use super::contact_dynamics::{ContactDynamics, min_dt};
use super::split_direction::SplitDirection;
use super::split_kkt_matrix::SplitKktMatrix;
use super::split_kkt_residual::SplitKktResidual;
use super::split_solution::SplitSolution;
use super::state_equation;
use super::unconstrained_dynamics::UnconstrainedDynamics;

/// Borrowed view of the neighboring sub-interval's solution used by the
/// state-equation linearization.
#[derive(Clone, Copy)]
pub struct NextStageRef<'a> {
    pub q: &'a DVector<f64>,
    pub v: &'a DVector<f64>,
    pub lmd: &'a DVector<f64>,
    pub gmm: &'a DVector<f64>,
}

#[derive(Debug, Clone)]
enum StageDynamics {
    Contact(ContactDynamics),
    Unconstrained(UnconstrainedDynamics),
}

/// Work unit of one ordinary sub-interval: owns the cost/constraint scratch,
/// the dynamics condenser and the oracle workspace of its slot, and runs the
/// per-stage protocol in the order the condensation requires (cost and
/// constraint augmentation first, then dynamics condensation).
pub struct SplitOcp<R: RobotModel> {
    cost_data: CostFunctionData,
    constraints_data: ConstraintsData,
    dynamics: StageDynamics,
    ws: R::Workspace,
    stage_cost: f64,
    constraint_violation: f64,
    kkt_error: f64,
}

impl<R: RobotModel> SplitOcp<R> {
    pub fn new(
        robot: &R,
        constraints: &Constraints,
        baumgarte_time_step: f64,
    ) -> Result<Self, SolverError> {
        let dims = robot.dims();
        let dynamics = if dims.max_point_contacts == 0 && !dims.has_floating_base {
            StageDynamics::Unconstrained(UnconstrainedDynamics::new(dims))
        } else {
            StageDynamics::Contact(ContactDynamics::new(dims, baumgarte_time_step)?)
        };
        Ok(Self {
            cost_data: CostFunctionData::new(dims),
            constraints_data: constraints.create_data(),
            dynamics,
            ws: robot.workspace(),
            stage_cost: 0.0,
            constraint_violation: 0.0,
            kkt_error: 0.0,
        })
    }

    pub fn init_constraints(&mut self, constraints: &Constraints, s: &SplitSolution) {
        constraints.set_slack_and_dual(&mut self.constraints_data, s);
    }

    pub fn is_feasible(&self, constraints: &Constraints, s: &SplitSolution) -> bool {
        constraints.is_feasible(s)
    }

    /// Full linearization + condensation of this sub-interval (Riccati path).
    #[allow(clippy::too_many_arguments)]
    pub fn linearize_ocp(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        status: &ContactStatus,
        grid: GridIndex,
        t: f64,
        dt: f64,
        q_prev: &DVector<f64>,
        s: &SplitSolution,
        next: NextStageRef<'_>,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), SolverError> {
        debug_assert!(dt >= 0.0);
        kkt_matrix.set_contact_status(status);
        kkt_residual.set_contact_status(status);
        kkt_matrix.set_zero();
        kkt_residual.set_zero();
        if dt < min_dt() {
            return Ok(());
        }
        if status.has_active_contacts() {
            robot.update_kinematics(&mut self.ws, &s.q, &s.v, &s.a);
        }
        cost.eval_stage_cost_derivatives(robot, &mut self.cost_data, t, dt, s, kkt_residual);
        constraints.augment_dual_residual(&self.constraints_data, dt, s, kkt_residual);
        state_equation::linearize_forward_euler(
            robot, dt, q_prev, s, next.q, next.v, next.lmd, next.gmm, kkt_matrix, kkt_residual,
        );
        match &mut self.dynamics {
            StageDynamics::Contact(dyn_) => {
                dyn_.linearize(robot, &mut self.ws, status, dt, s, kkt_residual);
            }
            StageDynamics::Unconstrained(dyn_) => {
                dyn_.linearize(robot, &mut self.ws, dt, s, kkt_residual);
            }
        }
        cost.eval_stage_cost_hessian(robot, &mut self.cost_data, t, dt, s, kkt_matrix);
        constraints.condense_slack_and_dual(
            &mut self.constraints_data,
            dt,
            s,
            kkt_matrix,
            kkt_residual,
        );
        match &mut self.dynamics {
            StageDynamics::Contact(dyn_) => {
                dyn_.condense_forward_euler(robot, dt, grid, kkt_matrix, kkt_residual)?;
            }
            StageDynamics::Unconstrained(dyn_) => {
                dyn_.condense(
                    robot,
                    &mut self.ws,
                    &s.q,
                    dt,
                    grid,
                    false,
                    kkt_matrix,
                    kkt_residual,
                )?;
            }
        }
        Ok(())
    }

    /// ParNMPC variant: backward-Euler state equation + backward-Euler
    /// condensation. `next` is absent on the horizon's last stage, where the
    /// terminal cost is folded in by the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn linearize_parnmpc(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        status: &ContactStatus,
        grid: GridIndex,
        t: f64,
        dt: f64,
        q_prev: &DVector<f64>,
        v_prev: &DVector<f64>,
        s: &SplitSolution,
        next: Option<NextStageRef<'_>>,
        terminal: bool,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) -> Result<(), SolverError> {
        kkt_matrix.set_contact_status(status);
        kkt_residual.set_contact_status(status);
        kkt_matrix.set_zero();
        kkt_residual.set_zero();
        if status.has_active_contacts() {
            robot.update_kinematics(&mut self.ws, &s.q, &s.v, &s.a);
        }
        cost.eval_stage_cost_derivatives(robot, &mut self.cost_data, t, dt, s, kkt_residual);
        if terminal {
            cost.eval_terminal_cost_derivatives(robot, &mut self.cost_data, t, s, kkt_residual);
        }
        constraints.augment_dual_residual(&self.constraints_data, dt, s, kkt_residual);
        state_equation::linearize_backward_euler(
            robot,
            dt,
            q_prev,
            v_prev,
            s,
            next.map(|n| (n.q, n.lmd, n.gmm)),
            kkt_matrix,
            kkt_residual,
        );
        match &mut self.dynamics {
            StageDynamics::Contact(dyn_) => {
                dyn_.linearize(robot, &mut self.ws, status, dt, s, kkt_residual);
            }
            StageDynamics::Unconstrained(dyn_) => {
                dyn_.linearize(robot, &mut self.ws, dt, s, kkt_residual);
            }
        }
        cost.eval_stage_cost_hessian(robot, &mut self.cost_data, t, dt, s, kkt_matrix);
        if terminal {
            cost.eval_terminal_cost_hessian(robot, &mut self.cost_data, t, s, kkt_matrix);
        }
        constraints.condense_slack_and_dual(
            &mut self.constraints_data,
            dt,
            s,
            kkt_matrix,
            kkt_residual,
        );
        match &mut self.dynamics {
            StageDynamics::Contact(dyn_) => {
                dyn_.condense_backward_euler(robot, dt, grid, kkt_matrix, kkt_residual)?;
            }
            StageDynamics::Unconstrained(dyn_) => {
                dyn_.condense(
                    robot,
                    &mut self.ws,
                    &s.q,
                    dt,
                    grid,
                    true,
                    kkt_matrix,
                    kkt_residual,
                )?;
            }
        }
        Ok(())
    }

    /// Residual-only evaluation: same pre-condensation residual as
    /// `linearize_ocp`, plus the dynamics/constraint residual norms folded
    /// into this stage's KKT error.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_kkt_residual(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        status: &ContactStatus,
        t: f64,
        dt: f64,
        q_prev: &DVector<f64>,
        s: &SplitSolution,
        next: NextStageRef<'_>,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        kkt_matrix.set_contact_status(status);
        kkt_residual.set_contact_status(status);
        kkt_residual.set_zero();
        if dt < min_dt() {
            self.kkt_error = 0.0;
            return;
        }
        if status.has_active_contacts() {
            robot.update_kinematics(&mut self.ws, &s.q, &s.v, &s.a);
        }
        cost.eval_stage_cost_derivatives(robot, &mut self.cost_data, t, dt, s, kkt_residual);
        constraints.eval_constraint(&mut self.constraints_data, s);
        constraints.augment_dual_residual(&self.constraints_data, dt, s, kkt_residual);
        state_equation::linearize_forward_euler(
            robot, dt, q_prev, s, next.q, next.v, next.lmd, next.gmm, kkt_matrix, kkt_residual,
        );
        let dyn_sq = match &mut self.dynamics {
            StageDynamics::Contact(dyn_) => {
                dyn_.linearize(robot, &mut self.ws, status, dt, s, kkt_residual);
                dyn_.squared_norm_residual(dt)
            }
            StageDynamics::Unconstrained(dyn_) => {
                dyn_.linearize(robot, &mut self.ws, dt, s, kkt_residual);
                dyn_.squared_norm_residual(dt)
            }
        };
        self.kkt_error = kkt_residual.kkt_error_squared_norm()
            + dyn_sq
            + constraints.squared_norm_residual(&self.constraints_data);
    }

    /// Residual-only evaluation of the ParNMPC (backward-Euler) stage.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_kkt_residual_parnmpc(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        status: &ContactStatus,
        t: f64,
        dt: f64,
        q_prev: &DVector<f64>,
        v_prev: &DVector<f64>,
        s: &SplitSolution,
        next: Option<NextStageRef<'_>>,
        terminal: bool,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        kkt_matrix.set_contact_status(status);
        kkt_residual.set_contact_status(status);
        kkt_residual.set_zero();
        if status.has_active_contacts() {
            robot.update_kinematics(&mut self.ws, &s.q, &s.v, &s.a);
        }
        cost.eval_stage_cost_derivatives(robot, &mut self.cost_data, t, dt, s, kkt_residual);
        if terminal {
            cost.eval_terminal_cost_derivatives(robot, &mut self.cost_data, t, s, kkt_residual);
        }
        constraints.eval_constraint(&mut self.constraints_data, s);
        constraints.augment_dual_residual(&self.constraints_data, dt, s, kkt_residual);
        state_equation::linearize_backward_euler(
            robot,
            dt,
            q_prev,
            v_prev,
            s,
            next.map(|n| (n.q, n.lmd, n.gmm)),
            kkt_matrix,
            kkt_residual,
        );
        let dyn_sq = match &mut self.dynamics {
            StageDynamics::Contact(dyn_) => {
                dyn_.linearize(robot, &mut self.ws, status, dt, s, kkt_residual);
                dyn_.squared_norm_residual(dt)
            }
            StageDynamics::Unconstrained(dyn_) => {
                dyn_.linearize(robot, &mut self.ws, dt, s, kkt_residual);
                dyn_.squared_norm_residual(dt)
            }
        };
        self.kkt_error = kkt_residual.kkt_error_squared_norm()
            + dyn_sq
            + constraints.squared_norm_residual(&self.constraints_data);
    }

    /// Squared KKT error of this stage from the last `compute_kkt_residual`.
    pub fn kkt_error(&self) -> f64 {
        self.kkt_error
    }

    /// Recover the condensed primal variables and the slack/dual directions.
    /// Zero-length pieces carry no condensed data; their directions are
    /// pinned to zero instead.
    pub fn expand_primal(
        &mut self,
        dt: f64,
        constraints: &Constraints,
        s: &SplitSolution,
        d: &mut SplitDirection,
    ) {
        if dt < min_dt() {
            d.du.fill(0.0);
            d.du_passive.fill(0.0);
            d.daf.fill(0.0);
            for cd in &mut self.constraints_data.components {
                cd.dslack.fill(0.0);
                cd.ddual.fill(0.0);
            }
            return;
        }
        match &mut self.dynamics {
            StageDynamics::Contact(dyn_) => dyn_.compute_condensed_primal_direction(d),
            StageDynamics::Unconstrained(dyn_) => dyn_.compute_condensed_primal_direction(d),
        }
        constraints.compute_slack_and_dual_direction(&mut self.constraints_data, s, d);
    }

    /// Recover the condensed dual variables; `dgmm` is the velocity-costate
    /// direction of the next sub-interval.
    pub fn expand_dual(
        &mut self,
        dt: f64,
        kkt_matrix: &SplitKktMatrix,
        kkt_residual: &SplitKktResidual,
        dgmm: &DVector<f64>,
        d: &mut SplitDirection,
    ) {
        match &mut self.dynamics {
            StageDynamics::Contact(dyn_) => {
                dyn_.compute_condensed_dual_direction(dt, kkt_matrix, kkt_residual, dgmm, d);
            }
            StageDynamics::Unconstrained(dyn_) => {
                dyn_.compute_condensed_dual_direction(dt, dgmm, d);
            }
        }
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
        d: &SplitDirection,
        s: &mut SplitSolution,
    ) {
        debug_assert!(step > 0.0 && step <= 1.0);
        s.integrate(robot, step, d);
        constraints.update_slack(&mut self.constraints_data, step);
    }

    pub fn update_dual(&mut self, constraints: &Constraints, step: f64) {
        constraints.update_dual(&mut self.constraints_data, step);
    }

    /// Cost (including the barrier of the trial slack) and ℓ1 constraint
    /// violation at a trial point; used by the filter line search.
    #[allow(clippy::too_many_arguments)]
    pub fn eval_cost_and_violation(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        status: &ContactStatus,
        t: f64,
        dt: f64,
        s_trial: &SplitSolution,
        next: Option<(&DVector<f64>, &DVector<f64>)>,
        slack_step: f64,
    ) -> (f64, f64) {
        if dt < min_dt() {
            self.stage_cost = 0.0;
            self.constraint_violation = 0.0;
            return (0.0, 0.0);
        }
        if status.has_active_contacts() {
            robot.update_kinematics(&mut self.ws, &s_trial.q, &s_trial.v, &s_trial.a);
        }
        let mut c = cost.eval_stage_cost(robot, &mut self.cost_data, t, dt, s_trial);
        c += constraints.cost_slack_barrier_trial(&self.constraints_data, slack_step);
        constraints.eval_constraint(&mut self.constraints_data, s_trial);
        let mut viol = constraints.l1_norm_residual(&self.constraints_data);
        match &mut self.dynamics {
            StageDynamics::Contact(dyn_) => {
                dyn_.compute_residual(robot, &mut self.ws, status, s_trial);
                viol += dyn_.l1_norm_residual(dt);
            }
            StageDynamics::Unconstrained(dyn_) => {
                dyn_.compute_residual(robot, &mut self.ws, s_trial);
                viol += dyn_.l1_norm_residual(dt);
            }
        }
        if let Some((q_next, v_next)) = next {
            let mut qdiff = DVector::zeros(robot.dims().dimv);
            robot.subtract_configuration(&s_trial.q, q_next, &mut qdiff);
            viol += (qdiff + dt * &s_trial.v).lp_norm(1);
            viol += (&s_trial.v + dt * &s_trial.a - v_next).lp_norm(1);
        }
        self.stage_cost = c;
        self.constraint_violation = viol;
        (c, viol)
    }

    pub fn stage_cost(&self) -> f64 {
        self.stage_cost
    }

    pub fn constraint_violation(&self) -> f64 {
        self.constraint_violation
    }
}
