//! End-to-end tests of the direct-Riccati solver on the analytic chain model.

use std::f64::consts::FRAC_PI_2;

use nalgebra::DVector;
use strider_core::constraints::{
    ConstraintComponent, Constraints, JointPositionLowerLimit, JointPositionUpperLimit,
    JointTorqueLowerLimit, JointTorqueUpperLimit, JointVelocityLowerLimit,
    JointVelocityUpperLimit,
};
use strider_core::cost::{ConfigurationSpaceCost, CostComponent, CostFunction};
use strider_core::robot::RobotModel;
use strider_core::robot::test_harness::ChainModel;
use strider_core::solver::{OcpSolver, SolverOptions};

fn regulator_robot() -> ChainModel {
    let mut robot = ChainModel::new(7, 0);
    robot.set_joint_limits(
        DVector::from_element(7, -2.5),
        DVector::from_element(7, 2.5),
        DVector::from_element(7, FRAC_PI_2),
        DVector::from_element(7, 50.0),
    );
    robot
}

fn alternating(first: f64, second: f64) -> DVector<f64> {
    DVector::from_fn(7, |i, _| if i % 2 == 0 { first } else { second })
}

fn regulator_cost(robot: &ChainModel) -> CostFunction {
    let mut config = ConfigurationSpaceCost::new(robot.dims());
    config.set_q_ref(alternating(0.0, FRAC_PI_2));
    config.set_q_weight(DVector::from_element(7, 10.0));
    config.set_v_weight(DVector::from_element(7, 0.01));
    config.set_a_weight(DVector::from_element(7, 0.01));
    config.set_u_weight(DVector::from_element(7, 0.001));
    config.set_qf_weight(DVector::from_element(7, 10.0));
    config.set_vf_weight(DVector::from_element(7, 0.01));
    let mut cost = CostFunction::new();
    cost.push(CostComponent::ConfigurationSpace(config));
    cost
}

fn regulator_constraints(robot: &ChainModel) -> Constraints {
    let mut constraints = Constraints::new(1e-4, 0.995);
    constraints.push(ConstraintComponent::JointPositionUpper(
        JointPositionUpperLimit::from_robot(robot),
    ));
    constraints.push(ConstraintComponent::JointPositionLower(
        JointPositionLowerLimit::from_robot(robot),
    ));
    constraints.push(ConstraintComponent::JointVelocityUpper(
        JointVelocityUpperLimit::from_robot(robot),
    ));
    constraints.push(ConstraintComponent::JointVelocityLower(
        JointVelocityLowerLimit::from_robot(robot),
    ));
    constraints.push(ConstraintComponent::JointTorqueUpper(
        JointTorqueUpperLimit::from_robot(robot),
    ));
    constraints.push(ConstraintComponent::JointTorqueLower(
        JointTorqueLowerLimit::from_robot(robot),
    ));
    constraints
}

fn regulator_options() -> SolverOptions {
    SolverOptions {
        horizon: 3.0,
        n_stages: 60,
        max_num_impulse: 0,
        nthreads: 4,
        ..Default::default()
    }
}

// =========================================================================
// Configuration-space regulator
// =========================================================================

#[test]
fn test_regulator_converges() {
    let robot = regulator_robot();
    let cost = regulator_cost(&robot);
    let constraints = regulator_constraints(&robot);
    let q0 = alternating(FRAC_PI_2, 0.0);
    let v0 = DVector::zeros(7);
    let mut solver =
        OcpSolver::new(robot, cost, constraints, regulator_options()).unwrap();
    solver.set_solution("q", &q0).unwrap();
    solver.set_solution("v", &v0).unwrap();
    assert!(solver.is_current_solution_feasible());
    solver.compute_kkt_residual(0.0, &q0, &v0);
    let initial_error = solver.kkt_error();
    assert!(initial_error > 1.0);
    for _ in 0..30 {
        solver.update_solution(0.0, &q0, &v0, false).unwrap();
    }
    solver.compute_kkt_residual(0.0, &q0, &v0);
    assert!(
        solver.kkt_error() < 1e-6,
        "KKT error {} after 30 iterations",
        solver.kkt_error()
    );
    let q_ref = alternating(0.0, FRAC_PI_2);
    let q_terminal = &solver.get_solution(60).q;
    assert!(
        (q_terminal - &q_ref).norm() < 1e-3,
        "terminal distance {}",
        (q_terminal - &q_ref).norm()
    );
}

#[test]
fn test_kkt_error_drops_sharply_near_solution() {
    // quadratic regulator without inequality constraints: one Newton
    // iteration from a feasible seed must collapse the KKT error
    let robot = regulator_robot();
    let cost = regulator_cost(&robot);
    let constraints = Constraints::new(1e-4, 0.995);
    let q0 = alternating(0.3, -0.2);
    let v0 = DVector::zeros(7);
    let mut solver =
        OcpSolver::new(robot, cost, constraints, regulator_options()).unwrap();
    solver.set_solution("q", &q0).unwrap();
    solver.set_solution("v", &v0).unwrap();
    solver.compute_kkt_residual(0.0, &q0, &v0);
    let e0 = solver.kkt_error();
    solver.update_solution(0.0, &q0, &v0, false).unwrap();
    solver.compute_kkt_residual(0.0, &q0, &v0);
    let e1 = solver.kkt_error();
    assert!(
        e1 < 1e-3 * e0,
        "expected three orders of magnitude, got {e0} -> {e1}"
    );
}

#[test]
fn test_line_search_regulator_still_converges() {
    let robot = regulator_robot();
    let cost = regulator_cost(&robot);
    let constraints = regulator_constraints(&robot);
    let q0 = alternating(FRAC_PI_2, 0.0);
    let v0 = DVector::zeros(7);
    let mut solver =
        OcpSolver::new(robot, cost, constraints, regulator_options()).unwrap();
    solver.set_solution("q", &q0).unwrap();
    solver.set_solution("v", &v0).unwrap();
    for _ in 0..40 {
        solver.update_solution(0.0, &q0, &v0, true).unwrap();
    }
    solver.compute_kkt_residual(0.0, &q0, &v0);
    assert!(solver.kkt_error() < 1e-4);
}

// =========================================================================
// Feasibility screening
// =========================================================================

#[test]
fn test_infeasible_seed_is_rejected() {
    let robot = regulator_robot();
    let (_, qmax) = robot.joint_position_limits();
    let cost = regulator_cost(&robot);
    let constraints = regulator_constraints(&robot);
    let mut solver =
        OcpSolver::new(robot, cost, constraints, regulator_options()).unwrap();
    let q_bad = 2.0 * qmax;
    solver.set_solution("q", &q_bad).unwrap();
    assert!(!solver.is_current_solution_feasible());
}

// =========================================================================
// Solver accessors
// =========================================================================

#[test]
fn test_solution_broadcast_and_trajectory_query() {
    let robot = regulator_robot();
    let cost = regulator_cost(&robot);
    let constraints = Constraints::new(1e-4, 0.995);
    let mut solver =
        OcpSolver::new(robot, cost, constraints, regulator_options()).unwrap();
    let q = alternating(0.5, -0.5);
    solver.set_solution("q", &q).unwrap();
    let traj = solver.get_solution_trajectory("q").unwrap();
    assert_eq!(traj.len(), 61);
    for qk in &traj {
        assert!((qk - &q).norm() < 1e-14);
    }
    assert!(solver.set_solution("nonsense", &q).is_err());
    assert!(solver.get_solution_trajectory("nonsense").is_err());
}

#[test]
fn test_state_feedback_gain_shapes() {
    let robot = regulator_robot();
    let cost = regulator_cost(&robot);
    let constraints = Constraints::new(1e-4, 0.995);
    let q0 = alternating(0.2, 0.1);
    let v0 = DVector::zeros(7);
    let mut solver =
        OcpSolver::new(robot, cost, constraints, regulator_options()).unwrap();
    solver.set_solution("q", &q0).unwrap();
    solver.update_solution(0.0, &q0, &v0, false).unwrap();
    let (kq, kv) = solver.get_state_feedback_gain(0);
    assert_eq!(kq.shape(), (7, 7));
    assert_eq!(kv.shape(), (7, 7));
    assert!(kq.norm() > 0.0);
}

// =========================================================================
// Construction-time validation
// =========================================================================

#[test]
fn test_invalid_options_abort_construction() {
    let robot = regulator_robot();
    let cost = regulator_cost(&robot);
    let constraints = Constraints::new(1e-4, 0.995);
    let mut options = regulator_options();
    options.horizon = -1.0;
    assert!(OcpSolver::new(robot, cost, constraints, options).is_err());
}
