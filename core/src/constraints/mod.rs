pub mod pdipm;
pub mod joint_position_limits;
pub mod joint_velocity_limits;
pub mod joint_torque_limits;
pub mod joint_acceleration_limits;
pub mod friction_cone;
pub mod impulse_friction_cone;

use nalgebra::DVector;

use crate::impulse::impulse_split_direction::ImpulseSplitDirection;
use crate::impulse::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use crate::impulse::impulse_split_solution::ImpulseSplitSolution;
use crate::ocp::split_direction::SplitDirection;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;

pub use self::friction_cone::FrictionCone;
pub use self::impulse_friction_cone::ImpulseFrictionCone;
pub use self::joint_acceleration_limits::{JointAccelerationLowerLimit, JointAccelerationUpperLimit};
pub use self::joint_position_limits::{JointPositionLowerLimit, JointPositionUpperLimit};
pub use self::joint_torque_limits::{JointTorqueLowerLimit, JointTorqueUpperLimit};
pub use self::joint_velocity_limits::{JointVelocityLowerLimit, JointVelocityUpperLimit};

/// Barrier / fraction-to-boundary data of one inequality component at one
/// sub-interval. `slack` and `dual` stay strictly positive between public
/// calls.
#[derive(Debug, Clone)]
pub struct ConstraintComponentData {
    pub slack: DVector<f64>,
    pub dual: DVector<f64>,
    pub residual: DVector<f64>,
    pub duality: DVector<f64>,
    pub dslack: DVector<f64>,
    pub ddual: DVector<f64>,
}

impl ConstraintComponentData {
    pub fn new(dimc: usize) -> Self {
        Self {
            slack: DVector::from_element(dimc, 1.0),
            dual: DVector::from_element(dimc, 1.0),
            residual: DVector::zeros(dimc),
            duality: DVector::zeros(dimc),
            dslack: DVector::zeros(dimc),
            ddual: DVector::zeros(dimc),
        }
    }

    pub fn dimc(&self) -> usize {
        self.slack.len()
    }

    pub fn squared_norm_residual(&self) -> f64 {
        self.residual.norm_squared() + self.duality.norm_squared()
    }

    pub fn l1_norm_residual(&self) -> f64 {
        self.residual.lp_norm(1)
    }
}

/// One inequality component. Closed set, match-dispatched.
#[derive(Debug, Clone)]
pub enum ConstraintComponent {
    JointPositionUpper(JointPositionUpperLimit),
    JointPositionLower(JointPositionLowerLimit),
    JointVelocityUpper(JointVelocityUpperLimit),
    JointVelocityLower(JointVelocityLowerLimit),
    JointTorqueUpper(JointTorqueUpperLimit),
    JointTorqueLower(JointTorqueLowerLimit),
    JointAccelerationUpper(JointAccelerationUpperLimit),
    JointAccelerationLower(JointAccelerationLowerLimit),
    FrictionCone(FrictionCone),
    ImpulseFrictionCone(ImpulseFrictionCone),
}

impl ConstraintComponent {
    pub fn dimc(&self) -> usize {
        match self {
            Self::JointPositionUpper(c) => c.dimc(),
            Self::JointPositionLower(c) => c.dimc(),
            Self::JointVelocityUpper(c) => c.dimc(),
            Self::JointVelocityLower(c) => c.dimc(),
            Self::JointTorqueUpper(c) => c.dimc(),
            Self::JointTorqueLower(c) => c.dimc(),
            Self::JointAccelerationUpper(c) => c.dimc(),
            Self::JointAccelerationLower(c) => c.dimc(),
            Self::FrictionCone(c) => c.dimc(),
            Self::ImpulseFrictionCone(c) => c.dimc(),
        }
    }

    fn applies_to_stage(&self) -> bool {
        !matches!(self, Self::ImpulseFrictionCone(_))
    }

    fn applies_to_impulse(&self) -> bool {
        matches!(self, Self::ImpulseFrictionCone(_))
    }
}

/// Inequality-constraint engine: the component list plus the process-level
/// interior-point constants.
#[derive(Debug, Clone)]
pub struct Constraints {
    components: Vec<ConstraintComponent>,
    barrier: f64,
    fraction_to_boundary_rate: f64,
}

/// Per-sub-interval data of the whole component list.
#[derive(Debug, Clone)]
pub struct ConstraintsData {
    pub components: Vec<ConstraintComponentData>,
}

impl Constraints {
    pub fn new(barrier: f64, fraction_to_boundary_rate: f64) -> Self {
        debug_assert!(barrier > 0.0);
        debug_assert!(fraction_to_boundary_rate > 0.0 && fraction_to_boundary_rate < 1.0);
        Self {
            components: Vec::new(),
            barrier,
            fraction_to_boundary_rate,
        }
    }

    pub fn push(&mut self, component: ConstraintComponent) {
        self.components.push(component);
    }

    pub fn barrier(&self) -> f64 {
        self.barrier
    }

    pub fn create_data(&self) -> ConstraintsData {
        ConstraintsData {
            components: self
                .components
                .iter()
                .map(|c| ConstraintComponentData::new(c.dimc()))
                .collect(),
        }
    }

    // --- ordinary stages ----------------------------------------------------

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        self.components.iter().all(|c| {
            !c.applies_to_stage()
                || match c {
                    ConstraintComponent::JointPositionUpper(c) => c.is_feasible(s),
                    ConstraintComponent::JointPositionLower(c) => c.is_feasible(s),
                    ConstraintComponent::JointVelocityUpper(c) => c.is_feasible(s),
                    ConstraintComponent::JointVelocityLower(c) => c.is_feasible(s),
                    ConstraintComponent::JointTorqueUpper(c) => c.is_feasible(s),
                    ConstraintComponent::JointTorqueLower(c) => c.is_feasible(s),
                    ConstraintComponent::JointAccelerationUpper(c) => c.is_feasible(s),
                    ConstraintComponent::JointAccelerationLower(c) => c.is_feasible(s),
                    ConstraintComponent::FrictionCone(c) => c.is_feasible(s),
                    ConstraintComponent::ImpulseFrictionCone(_) => true,
                }
        })
    }

    pub fn set_slack_and_dual(&self, data: &mut ConstraintsData, s: &SplitSolution) {
        for (c, d) in self.components.iter().zip(data.components.iter_mut()) {
            if !c.applies_to_stage() {
                continue;
            }
            match c {
                ConstraintComponent::JointPositionUpper(c) => c.set_slack(d, s),
                ConstraintComponent::JointPositionLower(c) => c.set_slack(d, s),
                ConstraintComponent::JointVelocityUpper(c) => c.set_slack(d, s),
                ConstraintComponent::JointVelocityLower(c) => c.set_slack(d, s),
                ConstraintComponent::JointTorqueUpper(c) => c.set_slack(d, s),
                ConstraintComponent::JointTorqueLower(c) => c.set_slack(d, s),
                ConstraintComponent::JointAccelerationUpper(c) => c.set_slack(d, s),
                ConstraintComponent::JointAccelerationLower(c) => c.set_slack(d, s),
                ConstraintComponent::FrictionCone(c) => c.set_slack(d, s),
                ConstraintComponent::ImpulseFrictionCone(_) => unreachable!(),
            }
            pdipm::set_slack_and_dual_positive(d, self.barrier);
        }
    }

    /// Refresh primal residual and duality at the current iterate.
    pub fn eval_constraint(&self, data: &mut ConstraintsData, s: &SplitSolution) {
        for (c, d) in self.components.iter().zip(data.components.iter_mut()) {
            if !c.applies_to_stage() {
                continue;
            }
            match c {
                ConstraintComponent::JointPositionUpper(c) => c.eval_constraint(d, s),
                ConstraintComponent::JointPositionLower(c) => c.eval_constraint(d, s),
                ConstraintComponent::JointVelocityUpper(c) => c.eval_constraint(d, s),
                ConstraintComponent::JointVelocityLower(c) => c.eval_constraint(d, s),
                ConstraintComponent::JointTorqueUpper(c) => c.eval_constraint(d, s),
                ConstraintComponent::JointTorqueLower(c) => c.eval_constraint(d, s),
                ConstraintComponent::JointAccelerationUpper(c) => c.eval_constraint(d, s),
                ConstraintComponent::JointAccelerationLower(c) => c.eval_constraint(d, s),
                ConstraintComponent::FrictionCone(c) => c.eval_constraint(d, s),
                ConstraintComponent::ImpulseFrictionCone(_) => unreachable!(),
            }
            pdipm::compute_duality(d, self.barrier);
        }
    }

    /// Augment the KKT residual with `dt · ∇gᵀ z`.
    pub fn augment_dual_residual(
        &self,
        data: &ConstraintsData,
        dt: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        for (c, d) in self.components.iter().zip(data.components.iter()) {
            if !c.applies_to_stage() {
                continue;
            }
            match c {
                ConstraintComponent::JointPositionUpper(c) => {
                    c.augment_dual_residual(d, dt, kkt_residual)
                }
                ConstraintComponent::JointPositionLower(c) => {
                    c.augment_dual_residual(d, dt, kkt_residual)
                }
                ConstraintComponent::JointVelocityUpper(c) => {
                    c.augment_dual_residual(d, dt, kkt_residual)
                }
                ConstraintComponent::JointVelocityLower(c) => {
                    c.augment_dual_residual(d, dt, kkt_residual)
                }
                ConstraintComponent::JointTorqueUpper(c) => {
                    c.augment_dual_residual(d, dt, kkt_residual)
                }
                ConstraintComponent::JointTorqueLower(c) => {
                    c.augment_dual_residual(d, dt, kkt_residual)
                }
                ConstraintComponent::JointAccelerationUpper(c) => {
                    c.augment_dual_residual(d, dt, kkt_residual)
                }
                ConstraintComponent::JointAccelerationLower(c) => {
                    c.augment_dual_residual(d, dt, kkt_residual)
                }
                ConstraintComponent::FrictionCone(c) => {
                    c.augment_dual_residual(d, dt, s, kkt_residual)
                }
                ConstraintComponent::ImpulseFrictionCone(_) => unreachable!(),
            }
        }
    }

    /// Eliminate `(Δslack, Δdual)`: barrier curvature onto the primal Hessian
    /// blocks and the shifted residual onto the gradients.
    pub fn condense_slack_and_dual(
        &self,
        data: &mut ConstraintsData,
        dt: f64,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        for (c, d) in self.components.iter().zip(data.components.iter_mut()) {
            if !c.applies_to_stage() {
                continue;
            }
            match c {
                ConstraintComponent::JointPositionUpper(c) => {
                    c.condense(d, self.barrier, dt, s, kkt_matrix, kkt_residual)
                }
                ConstraintComponent::JointPositionLower(c) => {
                    c.condense(d, self.barrier, dt, s, kkt_matrix, kkt_residual)
                }
                ConstraintComponent::JointVelocityUpper(c) => {
                    c.condense(d, self.barrier, dt, s, kkt_matrix, kkt_residual)
                }
                ConstraintComponent::JointVelocityLower(c) => {
                    c.condense(d, self.barrier, dt, s, kkt_matrix, kkt_residual)
                }
                ConstraintComponent::JointTorqueUpper(c) => {
                    c.condense(d, self.barrier, dt, s, kkt_matrix, kkt_residual)
                }
                ConstraintComponent::JointTorqueLower(c) => {
                    c.condense(d, self.barrier, dt, s, kkt_matrix, kkt_residual)
                }
                ConstraintComponent::JointAccelerationUpper(c) => {
                    c.condense(d, self.barrier, dt, s, kkt_matrix, kkt_residual)
                }
                ConstraintComponent::JointAccelerationLower(c) => {
                    c.condense(d, self.barrier, dt, s, kkt_matrix, kkt_residual)
                }
                ConstraintComponent::FrictionCone(c) => {
                    c.condense(d, self.barrier, dt, s, kkt_matrix, kkt_residual)
                }
                ConstraintComponent::ImpulseFrictionCone(_) => unreachable!(),
            }
        }
    }

    /// Recover `(Δslack, Δdual)` from the primal direction.
    pub fn compute_slack_and_dual_direction(
        &self,
        data: &mut ConstraintsData,
        s: &SplitSolution,
        d: &SplitDirection,
    ) {
        for (c, cd) in self.components.iter().zip(data.components.iter_mut()) {
            if !c.applies_to_stage() {
                continue;
            }
            match c {
                ConstraintComponent::JointPositionUpper(c) => c.expand(cd, d),
                ConstraintComponent::JointPositionLower(c) => c.expand(cd, d),
                ConstraintComponent::JointVelocityUpper(c) => c.expand(cd, d),
                ConstraintComponent::JointVelocityLower(c) => c.expand(cd, d),
                ConstraintComponent::JointTorqueUpper(c) => c.expand(cd, d),
                ConstraintComponent::JointTorqueLower(c) => c.expand(cd, d),
                ConstraintComponent::JointAccelerationUpper(c) => c.expand(cd, d),
                ConstraintComponent::JointAccelerationLower(c) => c.expand(cd, d),
                ConstraintComponent::FrictionCone(c) => c.expand(cd, s, d),
                ConstraintComponent::ImpulseFrictionCone(_) => unreachable!(),
            }
            pdipm::compute_dual_direction(cd);
        }
    }

    // --- impulse stages -----------------------------------------------------

    pub fn is_feasible_impulse(&self, s: &ImpulseSplitSolution) -> bool {
        self.components.iter().all(|c| {
            !c.applies_to_impulse()
                || match c {
                    ConstraintComponent::ImpulseFrictionCone(c) => c.is_feasible(s),
                    _ => true,
                }
        })
    }

    pub fn set_slack_and_dual_impulse(&self, data: &mut ConstraintsData, s: &ImpulseSplitSolution) {
        for (c, d) in self.components.iter().zip(data.components.iter_mut()) {
            if let ConstraintComponent::ImpulseFrictionCone(c) = c {
                c.set_slack(d, s);
                pdipm::set_slack_and_dual_positive(d, self.barrier);
            }
        }
    }

    pub fn eval_constraint_impulse(&self, data: &mut ConstraintsData, s: &ImpulseSplitSolution) {
        for (c, d) in self.components.iter().zip(data.components.iter_mut()) {
            if let ConstraintComponent::ImpulseFrictionCone(c) = c {
                c.eval_constraint(d, s);
                pdipm::compute_duality(d, self.barrier);
            }
        }
    }

    pub fn augment_dual_residual_impulse(
        &self,
        data: &ConstraintsData,
        s: &ImpulseSplitSolution,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) {
        for (c, d) in self.components.iter().zip(data.components.iter()) {
            if let ConstraintComponent::ImpulseFrictionCone(c) = c {
                c.augment_dual_residual(d, s, kkt_residual);
            }
        }
    }

    pub fn condense_slack_and_dual_impulse(
        &self,
        data: &mut ConstraintsData,
        s: &ImpulseSplitSolution,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) {
        for (c, d) in self.components.iter().zip(data.components.iter_mut()) {
            if let ConstraintComponent::ImpulseFrictionCone(c) = c {
                c.condense(d, self.barrier, s, kkt_matrix, kkt_residual);
            }
        }
    }

    pub fn compute_slack_and_dual_direction_impulse(
        &self,
        data: &mut ConstraintsData,
        s: &ImpulseSplitSolution,
        d: &ImpulseSplitDirection,
    ) {
        for (c, cd) in self.components.iter().zip(data.components.iter_mut()) {
            if let ConstraintComponent::ImpulseFrictionCone(c) = c {
                c.expand(cd, s, d);
                pdipm::compute_dual_direction(cd);
            }
        }
    }

    // --- step sizes, updates, cost ------------------------------------------

    pub fn max_slack_step_size(&self, data: &ConstraintsData) -> f64 {
        data.components
            .iter()
            .map(|d| pdipm::fraction_to_boundary(self.fraction_to_boundary_rate, &d.slack, &d.dslack))
            .fold(1.0, f64::min)
    }

    pub fn max_dual_step_size(&self, data: &ConstraintsData) -> f64 {
        data.components
            .iter()
            .map(|d| pdipm::fraction_to_boundary(self.fraction_to_boundary_rate, &d.dual, &d.ddual))
            .fold(1.0, f64::min)
    }

    pub fn update_slack(&self, data: &mut ConstraintsData, step: f64) {
        debug_assert!(step > 0.0 && step <= 1.0);
        for d in &mut data.components {
            d.slack.axpy(step, &d.dslack, 1.0);
        }
    }

    pub fn update_dual(&self, data: &mut ConstraintsData, step: f64) {
        debug_assert!(step > 0.0 && step <= 1.0);
        for d in &mut data.components {
            d.dual.axpy(step, &d.ddual, 1.0);
        }
    }

    pub fn cost_slack_barrier(&self, data: &ConstraintsData) -> f64 {
        data.components
            .iter()
            .map(|d| pdipm::cost_barrier(d, self.barrier))
            .sum()
    }

    pub fn cost_slack_barrier_trial(&self, data: &ConstraintsData, step: f64) -> f64 {
        data.components
            .iter()
            .map(|d| pdipm::cost_barrier_trial(d, self.barrier, step))
            .sum()
    }

    pub fn squared_norm_residual(&self, data: &ConstraintsData) -> f64 {
        data.components.iter().map(|d| d.squared_norm_residual()).sum()
    }

    pub fn l1_norm_residual(&self, data: &ConstraintsData) -> f64 {
        data.components.iter().map(|d| d.l1_norm_residual()).sum()
    }
}
