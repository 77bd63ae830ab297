use std::time::Instant;

use anyhow::bail;
use nalgebra::{DVector, Vector3};
use strider_core::constraints::{
    ConstraintComponent, Constraints, FrictionCone, ImpulseFrictionCone,
};
use strider_core::cost::{ConfigurationSpaceCost, ContactForceCost, CostComponent, CostFunction};
use strider_core::hybrid::discrete_event::DiscreteEvent;
use strider_core::robot::RobotModel;
use strider_core::robot::contact_status::ContactStatus;
use strider_core::robot::test_harness::ChainModel;
use strider_core::solver::{OcpSolver, SolverOptions};

const NJ: usize = 5;
const NC: usize = 2;

pub fn run(
    iterations: usize,
    threads: usize,
    impulse_time: f64,
    lift_time: f64,
) -> anyhow::Result<()> {
    if !(0.0 < impulse_time && impulse_time < lift_time && lift_time < 1.0) {
        bail!("need 0 < impulse_time < lift_time < 1");
    }
    let options = SolverOptions {
        horizon: 1.0,
        n_stages: 20,
        max_num_impulse: 4,
        nthreads: threads,
        baumgarte_time_step: 0.05,
        ..Default::default()
    };

    let robot = ChainModel::new(NJ, NC);
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

    let mut constraints = Constraints::new(options.barrier, options.fraction_to_boundary_rate);
    constraints.push(ConstraintComponent::FrictionCone(FrictionCone::new(0.7, NC)));
    constraints.push(ConstraintComponent::ImpulseFrictionCone(
        ImpulseFrictionCone::new(0.7, NC),
    ));

    let mut solver = OcpSolver::new(robot, cost, constraints, options)?;
    let q0 = DVector::from_element(NJ, 0.1);
    let v0 = DVector::zeros(NJ);

    // pin the touch-down point to the seed configuration's frame position
    let mut contact_points = vec![Vector3::zeros(); NC];
    {
        let robot = solver.robot();
        let mut ws = robot.workspace();
        robot.update_frame_kinematics(&mut ws, &q0);
        for (i, p) in contact_points.iter_mut().enumerate() {
            *p = robot.frame_position(&ws, i);
        }
    }
    solver.set_contact_points(&contact_points);

    let open = {
        let mut s = ContactStatus::new(NC);
        s.set_contact_points(&contact_points);
        s
    };
    let closed = {
        let mut s = open.clone();
        s.activate_contact(0);
        s
    };
    solver.set_discrete_event(DiscreteEvent::new(open.clone(), closed.clone(), impulse_time)?)?;
    solver.set_discrete_event(DiscreteEvent::new(closed, open, lift_time)?)?;

    solver.set_solution("q", &q0)?;
    solver.set_solution("v", &v0)?;
    solver.set_solution("f", &DVector::from_vec(vec![0.0, 0.0, 5.0]))?;
    println!(
        "hybrid benchmark: touch-down at {impulse_time} s, lift-off at {lift_time} s, {threads} threads"
    );

    let start = Instant::now();
    for i in 0..iterations {
        solver.update_solution(0.0, &q0, &v0, false)?;
        solver.compute_kkt_residual(0.0, &q0, &v0);
        println!("  iter {:>3}  KKT error {:.6e}", i + 1, solver.kkt_error());
    }
    let elapsed = start.elapsed();
    println!(
        "total {:.3} ms ({:.3} ms / iteration)",
        elapsed.as_secs_f64() * 1e3,
        elapsed.as_secs_f64() * 1e3 / iterations as f64
    );
    Ok(())
}
