//! Tests of the backward-correction (ParNMPC) driver and its agreement with
//! the direct-Riccati path on smooth problems.

use nalgebra::DVector;
use strider_core::constraints::Constraints;
use strider_core::cost::{ConfigurationSpaceCost, CostComponent, CostFunction};
use strider_core::robot::RobotModel;
use strider_core::robot::test_harness::{ChainModel, FloatingChainModel};
use strider_core::solver::{OcpSolver, ParnmpcSolver, SolverOptions};

const NJ: usize = 4;

fn smooth_cost(robot: &ChainModel) -> CostFunction {
    let mut config = ConfigurationSpaceCost::new(robot.dims());
    config.set_q_ref(DVector::from_fn(NJ, |i, _| 0.3 - 0.1 * i as f64));
    config.set_q_weight(DVector::from_element(NJ, 5.0));
    config.set_v_weight(DVector::from_element(NJ, 0.1));
    config.set_a_weight(DVector::from_element(NJ, 0.02));
    config.set_u_weight(DVector::from_element(NJ, 0.01));
    config.set_qf_weight(DVector::from_element(NJ, 5.0));
    config.set_vf_weight(DVector::from_element(NJ, 0.1));
    let mut cost = CostFunction::new();
    cost.push(CostComponent::ConfigurationSpace(config));
    cost
}

fn smooth_options(n: usize) -> SolverOptions {
    SolverOptions {
        horizon: 0.5,
        n_stages: n,
        max_num_impulse: 0,
        nthreads: 4,
        ..Default::default()
    }
}

// =========================================================================
// Convergence of the backward-correction iteration
// =========================================================================

#[test]
fn test_parnmpc_converges_on_regulator() {
    let robot = ChainModel::new(NJ, 0);
    let cost = smooth_cost(&robot);
    let constraints = Constraints::new(1e-4, 0.995);
    let q0 = DVector::from_element(NJ, 0.5);
    let v0 = DVector::zeros(NJ);
    let mut solver = ParnmpcSolver::new(robot, cost, constraints, smooth_options(20)).unwrap();
    solver.set_solution("q", &q0).unwrap();
    solver.set_solution("v", &v0).unwrap();
    solver.compute_kkt_residual(0.0, &q0, &v0);
    let e0 = solver.kkt_error();
    assert!(e0 > 1e-3);
    for _ in 0..100 {
        solver.update_solution(0.0, &q0, &v0).unwrap();
    }
    solver.compute_kkt_residual(0.0, &q0, &v0);
    assert!(
        solver.kkt_error() < 1e-4,
        "ParNMPC stalled at KKT error {}",
        solver.kkt_error()
    );
}

// =========================================================================
// Agreement with the direct-Riccati path
// =========================================================================

/// The two drivers discretize differently (forward vs. backward Euler), so
/// the converged trajectories agree to the discretization error, not
/// bitwise.
#[test]
fn test_parnmpc_and_riccati_agree_within_discretization_error() {
    let n = 100;
    let q0 = DVector::from_element(NJ, 0.5);
    let v0 = DVector::zeros(NJ);

    let robot = ChainModel::new(NJ, 0);
    let cost = smooth_cost(&robot);
    let mut riccati =
        OcpSolver::new(robot, cost, Constraints::new(1e-4, 0.995), smooth_options(n)).unwrap();
    riccati.set_solution("q", &q0).unwrap();
    riccati.set_solution("v", &v0).unwrap();
    for _ in 0..30 {
        riccati.update_solution(0.0, &q0, &v0, false).unwrap();
    }
    riccati.compute_kkt_residual(0.0, &q0, &v0);
    assert!(riccati.kkt_error() < 1e-8);

    let robot = ChainModel::new(NJ, 0);
    let cost = smooth_cost(&robot);
    let mut parnmpc =
        ParnmpcSolver::new(robot, cost, Constraints::new(1e-4, 0.995), smooth_options(n)).unwrap();
    parnmpc.set_solution("q", &q0).unwrap();
    parnmpc.set_solution("v", &v0).unwrap();
    for _ in 0..200 {
        parnmpc.update_solution(0.0, &q0, &v0).unwrap();
    }
    parnmpc.compute_kkt_residual(0.0, &q0, &v0);
    assert!(parnmpc.kkt_error() < 1e-6);

    // ParNMPC stage i lives at t_{i+1}; compare against Riccati stage i+1
    let h = 0.5 / n as f64;
    for i in (9..n).step_by(10) {
        let s_p = parnmpc.get_solution(i);
        let s_r = riccati.get_solution(i + 1);
        let dq = (&s_p.q - &s_r.q).norm();
        assert!(
            dq < 20.0 * h,
            "stage {i}: trajectories differ by {dq} (h = {h})"
        );
    }
}

// =========================================================================
// Configuration errors
// =========================================================================

#[test]
fn test_parnmpc_rejects_floating_base_and_events() {
    let robot = FloatingChainModel::new(3, 0);
    let dims = robot.dims().clone();
    let mut config = ConfigurationSpaceCost::new(&dims);
    config.set_q_weight(DVector::from_element(dims.dimv, 1.0));
    let mut cost = CostFunction::new();
    cost.push(CostComponent::ConfigurationSpace(config));
    assert!(
        ParnmpcSolver::new(robot, cost, Constraints::new(1e-4, 0.995), smooth_options(10))
            .is_err()
    );

    let robot = ChainModel::new(NJ, 0);
    let cost = smooth_cost(&robot);
    let mut options = smooth_options(10);
    options.max_num_impulse = 2;
    assert!(ParnmpcSolver::new(robot, cost, Constraints::new(1e-4, 0.995), options).is_err());
}
