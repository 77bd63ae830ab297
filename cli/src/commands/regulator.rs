use std::f64::consts::FRAC_PI_2;
use std::time::Instant;

use anyhow::Context;
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

const NJ: usize = 7;

pub fn run(
    iterations: usize,
    threads: usize,
    line_search: bool,
    options_path: Option<String>,
) -> anyhow::Result<()> {
    let mut options = match options_path {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read options file {path}"))?;
            serde_json::from_str::<SolverOptions>(&text)
                .with_context(|| format!("cannot parse options file {path}"))?
        }
        None => SolverOptions {
            horizon: 3.0,
            n_stages: 60,
            ..Default::default()
        },
    };
    options.nthreads = threads;
    options.use_line_search = line_search;

    let mut robot = ChainModel::new(NJ, 0);
    robot.set_joint_limits(
        DVector::from_element(NJ, -2.5),
        DVector::from_element(NJ, 2.5),
        DVector::from_element(NJ, FRAC_PI_2),
        DVector::from_element(NJ, 50.0),
    );
    let alternating = |first: f64, second: f64| {
        DVector::from_fn(NJ, |i, _| if i % 2 == 0 { first } else { second })
    };
    let q0 = alternating(FRAC_PI_2, 0.0);
    let q_ref = alternating(0.0, FRAC_PI_2);
    let v0 = DVector::zeros(NJ);

    let mut config = ConfigurationSpaceCost::new(robot.dims());
    config.set_q_ref(q_ref.clone());
    config.set_q_weight(DVector::from_element(NJ, 10.0));
    config.set_v_weight(DVector::from_element(NJ, 0.01));
    config.set_a_weight(DVector::from_element(NJ, 0.01));
    config.set_u_weight(DVector::from_element(NJ, 0.001));
    config.set_qf_weight(DVector::from_element(NJ, 10.0));
    config.set_vf_weight(DVector::from_element(NJ, 0.01));
    let mut cost = CostFunction::new();
    cost.push(CostComponent::ConfigurationSpace(config));

    let mut constraints = Constraints::new(options.barrier, options.fraction_to_boundary_rate);
    constraints.push(ConstraintComponent::JointPositionUpper(
        JointPositionUpperLimit::from_robot(&robot),
    ));
    constraints.push(ConstraintComponent::JointPositionLower(
        JointPositionLowerLimit::from_robot(&robot),
    ));
    constraints.push(ConstraintComponent::JointVelocityUpper(
        JointVelocityUpperLimit::from_robot(&robot),
    ));
    constraints.push(ConstraintComponent::JointVelocityLower(
        JointVelocityLowerLimit::from_robot(&robot),
    ));
    constraints.push(ConstraintComponent::JointTorqueUpper(
        JointTorqueUpperLimit::from_robot(&robot),
    ));
    constraints.push(ConstraintComponent::JointTorqueLower(
        JointTorqueLowerLimit::from_robot(&robot),
    ));

    let use_line_search = options.use_line_search;
    let mut solver = OcpSolver::new(robot, cost, constraints, options)?;
    solver.set_solution("q", &q0)?;
    solver.set_solution("v", &v0)?;
    println!("regulator benchmark: {NJ} joints, {iterations} iterations, {threads} threads");

    let start = Instant::now();
    for i in 0..iterations {
        solver.update_solution(0.0, &q0, &v0, use_line_search)?;
        solver.compute_kkt_residual(0.0, &q0, &v0);
        println!("  iter {:>3}  KKT error {:.6e}", i + 1, solver.kkt_error());
    }
    let elapsed = start.elapsed();
    println!(
        "total {:.3} ms ({:.3} ms / iteration)",
        elapsed.as_secs_f64() * 1e3,
        elapsed.as_secs_f64() * 1e3 / iterations as f64
    );
    let q_terminal = &solver.get_solution(solver.contact_sequence().num_grid_stages()).q;
    println!("terminal tracking error {:.3e}", (q_terminal - &q_ref).norm());
    Ok(())
}
