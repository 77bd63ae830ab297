//! End-to-end tests of hybrid horizons: impulse and lift events on the
//! analytic chain model with point contacts.

use nalgebra::{DVector, Vector3};
use strider_core::constraints::{ConstraintComponent, Constraints, FrictionCone, ImpulseFrictionCone};
use strider_core::cost::{ConfigurationSpaceCost, ContactForceCost, CostComponent, CostFunction};
use strider_core::hybrid::discrete_event::DiscreteEvent;
use strider_core::robot::RobotModel;
use strider_core::robot::contact_status::ContactStatus;
use strider_core::robot::test_harness::ChainModel;
use strider_core::solver::{OcpSolver, SolverOptions};

const NJ: usize = 5;
const NC: usize = 2;

fn hybrid_robot() -> ChainModel {
    ChainModel::new(NJ, NC)
}

fn hybrid_cost(robot: &ChainModel) -> CostFunction {
    let mut config = ConfigurationSpaceCost::new(robot.dims());
    config.set_q_ref(DVector::from_element(NJ, 0.2));
    config.set_q_weight(DVector::from_element(NJ, 2.0));
    config.set_v_weight(DVector::from_element(NJ, 0.1));
    config.set_a_weight(DVector::from_element(NJ, 0.05));
    config.set_u_weight(DVector::from_element(NJ, 0.01));
    config.set_qf_weight(DVector::from_element(NJ, 2.0));
    config.set_vf_weight(DVector::from_element(NJ, 0.1));
    config.set_dv_weight(DVector::from_element(NJ, 0.1));
    let mut force = ContactForceCost::new(NC);
    force.set_f_weight(vec![Vector3::new(0.01, 0.01, 0.01); NC]);
    force.set_f_ref(vec![Vector3::new(0.0, 0.0, 5.0); NC]);
    let mut cost = CostFunction::new();
    cost.push(CostComponent::ConfigurationSpace(config));
    cost.push(CostComponent::ContactForce(force));
    cost
}

fn hybrid_constraints() -> Constraints {
    let mut constraints = Constraints::new(1e-4, 0.995);
    constraints.push(ConstraintComponent::FrictionCone(FrictionCone::new(0.7, NC)));
    constraints.push(ConstraintComponent::ImpulseFrictionCone(
        ImpulseFrictionCone::new(0.7, NC),
    ));
    constraints
}

fn hybrid_options() -> SolverOptions {
    SolverOptions {
        horizon: 1.0,
        n_stages: 20,
        max_num_impulse: 4,
        nthreads: 4,
        baumgarte_time_step: 0.05,
        ..Default::default()
    }
}

fn seeded_solver(impulse_time: f64, lift_time: Option<f64>) -> OcpSolver<ChainModel> {
    let robot = hybrid_robot();
    let cost = hybrid_cost(&robot);
    let constraints = hybrid_constraints();
    let mut solver = OcpSolver::new(robot, cost, constraints, hybrid_options()).unwrap();
    // contact point consistent with the seed configuration
    let q0 = DVector::from_element(NJ, 0.1);
    let open = ContactStatus::new(NC);
    let mut closed = ContactStatus::new(NC);
    closed.activate_contact(0);
    let mut contact_points = vec![Vector3::zeros(); NC];
    {
        let robot = solver.robot();
        let mut ws = robot.workspace();
        robot.update_frame_kinematics(&mut ws, &q0);
        contact_points[0] = robot.frame_position(&ws, 0);
        contact_points[1] = robot.frame_position(&ws, 1);
    }
    solver.set_contact_status_uniformly(open.clone());
    solver.set_contact_points(&contact_points);
    let mut touchdown = open.clone();
    let mut post = closed.clone();
    touchdown.set_contact_points(&contact_points);
    post.set_contact_points(&contact_points);
    let event = DiscreteEvent::new(touchdown, post.clone(), impulse_time).unwrap();
    solver.set_discrete_event(event).unwrap();
    if let Some(tl) = lift_time {
        let mut lifted = ContactStatus::new(NC);
        lifted.set_contact_points(&contact_points);
        let event = DiscreteEvent::new(post, lifted, tl).unwrap();
        solver.set_discrete_event(event).unwrap();
    }
    solver.set_solution("q", &q0).unwrap();
    solver.set_solution("v", &DVector::zeros(NJ)).unwrap();
    solver.set_solution("f", &DVector::from_vec(vec![0.0, 0.0, 5.0])).unwrap();
    solver
}

// =========================================================================
// Hybrid horizon with an impulse (and a lift)
// =========================================================================

#[test]
fn test_hybrid_horizon_kkt_error_decreases() {
    let q0 = DVector::from_element(NJ, 0.1);
    let v0 = DVector::zeros(NJ);
    let mut solver = seeded_solver(0.33, Some(0.62));
    assert_eq!(solver.contact_sequence().total_num_impulse_stages(), 1);
    assert_eq!(solver.contact_sequence().total_num_lift_stages(), 1);
    solver.compute_kkt_residual(0.0, &q0, &v0);
    let e0 = solver.kkt_error();
    assert!(e0.is_finite() && e0 > 0.0);
    for _ in 0..15 {
        solver.update_solution(0.0, &q0, &v0, false).unwrap();
    }
    solver.compute_kkt_residual(0.0, &q0, &v0);
    let e1 = solver.kkt_error();
    assert!(e1.is_finite());
    assert!(e1 < 1e-2 * e0, "KKT error {e0} -> {e1}");
}

#[test]
fn test_impulse_only_horizon_converges() {
    let q0 = DVector::from_element(NJ, 0.1);
    let v0 = DVector::zeros(NJ);
    let mut solver = seeded_solver(0.47, None);
    solver.compute_kkt_residual(0.0, &q0, &v0);
    let e0 = solver.kkt_error();
    for _ in 0..20 {
        solver.update_solution(0.0, &q0, &v0, false).unwrap();
    }
    solver.compute_kkt_residual(0.0, &q0, &v0);
    assert!(solver.kkt_error() < 1e-2 * e0);
}

// =========================================================================
// Event exactly on a grid node
// =========================================================================

#[test]
fn test_event_on_grid_node_matches_perturbed_event() {
    let q0 = DVector::from_element(NJ, 0.1);
    let v0 = DVector::zeros(NJ);
    // impulse exactly at the first grid node vs. a hair before it
    let h = 1.0 / 20.0;
    let mut on_node = seeded_solver(2.0 * h, None);
    let mut off_node = seeded_solver(2.0 * h - 1e-13, None);
    let cs = on_node.contact_sequence();
    assert_eq!(cs.time_stage_before_impulse(0), 1);
    assert!((cs.dtau(1) - h).abs() < 1e-12);
    assert!(cs.dtau_impulse(0) < 1e-12);
    on_node.update_solution(0.0, &q0, &v0, false).unwrap();
    off_node.update_solution(0.0, &q0, &v0, false).unwrap();
    on_node.compute_kkt_residual(0.0, &q0, &v0);
    off_node.compute_kkt_residual(0.0, &q0, &v0);
    let e_on = on_node.kkt_error();
    let e_off = off_node.kkt_error();
    assert!(
        (e_on - e_off).abs() < 1e-6 * (1.0 + e_on.max(e_off)),
        "zero-length aux piece changed the result: {e_on} vs {e_off}"
    );
}
