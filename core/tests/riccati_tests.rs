//! Component-level tests of the Riccati machinery and the dynamics
//! condensation on the analytic models.

use nalgebra::{DMatrix, DVector, linalg::Cholesky};
use rand::{Rng, SeedableRng, rngs::StdRng};
use strider_core::hybrid::GridIndex;
use strider_core::ocp::contact_dynamics::ContactDynamics;
use strider_core::ocp::split_direction::SplitDirection;
use strider_core::ocp::split_kkt_matrix::SplitKktMatrix;
use strider_core::ocp::split_kkt_residual::SplitKktResidual;
use strider_core::ocp::split_solution::SplitSolution;
use strider_core::riccati::riccati_factorizer::RiccatiFactorizer;
use strider_core::riccati::split_riccati_factorization::SplitRiccatiFactorization;
use strider_core::robot::RobotModel;
use strider_core::robot::contact_status::ContactStatus;
use strider_core::robot::test_harness::ChainModel;

fn random_vector(rng: &mut StdRng, n: usize) -> DVector<f64> {
    DVector::from_fn(n, |_, _| rng.gen_range(-1.0..1.0))
}

/// A positive-definite KKT matrix with consistent dimensions, as the
/// linearizer would produce it for a contact-free stage.
fn seeded_kkt(rng: &mut StdRng, robot: &ChainModel, dt: f64) -> (SplitKktMatrix, SplitKktResidual) {
    let dims = robot.dims();
    let v = dims.dimv;
    let mut m = SplitKktMatrix::new(dims);
    let mut r = SplitKktResidual::new(dims);
    let a = DMatrix::<f64>::from_fn(2 * v, 2 * v, |i, j| {
        0.2 * (((i + 2 * j) as f64) * 0.33).sin()
    });
    m.qxx = &a * a.transpose() + DMatrix::identity(2 * v, 2 * v);
    {
        let mut quu = m.quu_mut();
        for i in 0..v {
            quu[(i, i)] = 1.0 + 0.1 * i as f64;
        }
    }
    m.fvq = DMatrix::from_fn(v, v, |i, j| 0.1 * ((i + j) as f64 * 0.5).cos());
    m.fvv = DMatrix::identity(v, v) + 0.05 * DMatrix::from_fn(v, v, |i, j| ((i * j) as f64).sin());
    m.fvu = dt * DMatrix::identity(v, v);
    r.fx = random_vector(rng, 2 * v);
    r.lx = random_vector(rng, 2 * v);
    let lu = random_vector(rng, v);
    r.lu_mut().copy_from(&lu);
    (m, r)
}

// =========================================================================
// Backward recursion
// =========================================================================

#[test]
fn test_backward_recursion_keeps_p_symmetric_psd() {
    let robot = ChainModel::new(5, 0);
    let dims = robot.dims();
    let v = dims.dimv;
    let mut rng = StdRng::seed_from_u64(17);
    let mut factorizer = RiccatiFactorizer::new(dims);
    let mut next = SplitRiccatiFactorization::new(dims);
    // terminal cost-to-go
    next.pqq = DMatrix::identity(v, v) * 10.0;
    next.pvv = DMatrix::identity(v, v) * 1.0;
    let mut current = SplitRiccatiFactorization::new(dims);
    for step in 0..25 {
        let (mut m, mut r) = seeded_kkt(&mut rng, &robot, 0.05);
        factorizer
            .backward_riccati_recursion(
                &next,
                0.05,
                GridIndex::Stage(step),
                &mut m,
                &mut r,
                &mut current,
            )
            .unwrap();
        // symmetry within tolerance
        let asym_q = (&current.pqq - current.pqq.transpose()).norm();
        let asym_v = (&current.pvv - current.pvv.transpose()).norm();
        assert!(asym_q < 1e-12 * (1.0 + current.pqq.norm()));
        assert!(asym_v < 1e-12 * (1.0 + current.pvv.norm()));
        // PSD via Cholesky of the full 2v block
        let mut p = DMatrix::zeros(2 * v, 2 * v);
        p.view_mut((0, 0), (v, v)).copy_from(&current.pqq);
        p.view_mut((0, v), (v, v)).copy_from(&current.pqv);
        p.view_mut((v, 0), (v, v)).copy_from(&current.pvq);
        p.view_mut((v, v), (v, v)).copy_from(&current.pvv);
        let sym = 0.5 * (&p + p.transpose());
        assert!(
            Cholesky::new(sym).is_some(),
            "cost-to-go lost positive definiteness at step {step}"
        );
        std::mem::swap(&mut next, &mut current);
    }
}

#[test]
fn test_lqr_gain_solves_input_stationarity() {
    let robot = ChainModel::new(3, 0);
    let dims = robot.dims();
    let v = dims.dimv;
    let mut rng = StdRng::seed_from_u64(3);
    let mut factorizer = RiccatiFactorizer::new(dims);
    let mut next = SplitRiccatiFactorization::new(dims);
    next.pqq = DMatrix::identity(v, v) * 4.0;
    next.pvv = DMatrix::identity(v, v) * 2.0;
    let mut current = SplitRiccatiFactorization::new(dims);
    let (mut m, mut r) = seeded_kkt(&mut rng, &robot, 0.1);
    factorizer
        .backward_riccati_recursion(&next, 0.1, GridIndex::Stage(0), &mut m, &mut r, &mut current)
        .unwrap();
    // after factorization: Quu·K = −Qxuᵀ and Quu·k = −lu
    let gain_res = m.quu().into_owned() * &current.k_gain + m.qxu().transpose();
    assert!(gain_res.norm() < 1e-9);
    let ff_res = m.quu().into_owned() * &current.k_ff + r.lu().into_owned();
    assert!(ff_res.norm() < 1e-9);
}

// =========================================================================
// Contact-dynamics condensation round trip
// =========================================================================

#[test]
fn test_condensed_primal_direction_satisfies_dynamics() {
    let robot = ChainModel::new(5, 2);
    let dims = robot.dims().clone();
    let v = dims.dimv;
    let mut rng = StdRng::seed_from_u64(11);
    let mut status = ContactStatus::new(2);
    status.activate_contact(0);
    status.activate_contact(1);
    let nf = status.dimf();
    let dt = 0.04;
    let bg_dt = 0.04;

    let mut s = SplitSolution::new(&robot);
    s.set_contact_status(&status);
    s.q.copy_from(&random_vector(&mut rng, v));
    s.v.copy_from(&random_vector(&mut rng, v));
    s.a.copy_from(&random_vector(&mut rng, v));
    s.u.copy_from(&random_vector(&mut rng, v));
    s.beta.copy_from(&random_vector(&mut rng, v));
    for i in 0..2 {
        s.f[i] = nalgebra::Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(1.0..2.0),
        );
    }
    s.set_f_stack();

    let mut ws = robot.workspace();
    robot.update_kinematics(&mut ws, &s.q, &s.v, &s.a);
    let mut dynamics = ContactDynamics::new(&dims, bg_dt).unwrap();
    let mut kkt_matrix = SplitKktMatrix::new(&dims);
    let mut kkt_residual = SplitKktResidual::new(&dims);
    kkt_matrix.set_contact_status(&status);
    kkt_residual.set_contact_status(&status);
    // cost curvature on the eliminated variables must be positive
    for i in 0..v {
        kkt_matrix.qaa[i] = 1.0;
    }
    for i in 0..nf {
        kkt_matrix.qff[(i, i)] = 1.0;
    }
    dynamics.linearize(&robot, &mut ws, &status, dt, &s, &mut kkt_residual);
    dynamics
        .condense_forward_euler(&robot, dt, GridIndex::Stage(0), &mut kkt_matrix, &mut kkt_residual)
        .unwrap();

    let mut d = SplitDirection::new(&dims);
    d.set_contact_status(&status);
    d.dx.copy_from(&random_vector(&mut rng, 2 * v));
    d.du.copy_from(&random_vector(&mut rng, v));
    dynamics.compute_condensed_primal_direction(&mut d);

    // step the primal variables by the expanded direction; the model is
    // affine, so the updated point must satisfy ID = 0 and C = 0 exactly
    let q1 = &s.q + d.dq().into_owned();
    let v1 = &s.v + d.dv().into_owned();
    let a1 = &s.a + d.da().into_owned();
    let u1 = &s.u + &d.du;
    let df = d.df().into_owned();
    let mut f1 = s.f.clone();
    for (rank, i) in [0usize, 1usize].iter().enumerate() {
        for k in 0..3 {
            f1[*i][k] += df[3 * rank + k];
        }
    }
    robot.update_kinematics(&mut ws, &q1, &v1, &a1);
    robot.set_contact_forces(&mut ws, &status, &f1);
    let mut id = DVector::zeros(v);
    robot.rnea(&ws, &q1, &v1, &a1, &mut id);
    id -= &u1;
    assert!(id.norm() < 1e-8, "inverse-dynamics residual {}", id.norm());
    let mut c = DVector::zeros(nf);
    robot.compute_baumgarte_residual(&ws, &status, bg_dt, &mut c);
    assert!(c.norm() < 1e-8, "contact residual {}", c.norm());
}

// =========================================================================
// Linearize / KKT-residual parity
// =========================================================================

/// Both drivers assemble the same pre-condensation residual; condensation
/// rewrites only `lx`, `lu` and `Fv`, so `Fq`, `la` and `lf` must match
/// between `linearize_ocp` and `compute_kkt_residual` (the constraint shift
/// vanishes at a freshly initialized slack point).
#[test]
fn test_linearize_and_residual_paths_assemble_identical_blocks() {
    use strider_core::constraints::{ConstraintComponent, Constraints, FrictionCone};
    use strider_core::cost::{
        ConfigurationSpaceCost, ContactForceCost, CostComponent, CostFunction,
    };
    use strider_core::ocp::split_ocp::{NextStageRef, SplitOcp};
    use strider_core::ocp::split_solution::SplitSolution;

    let robot = ChainModel::new(4, 1);
    let dims = robot.dims().clone();
    let v = dims.dimv;
    let mut status = ContactStatus::new(1);
    status.activate_contact(0);

    let mut config = ConfigurationSpaceCost::new(&dims);
    config.set_q_weight(DVector::from_element(v, 2.0));
    config.set_v_weight(DVector::from_element(v, 0.5));
    config.set_a_weight(DVector::from_element(v, 0.1));
    config.set_u_weight(DVector::from_element(v, 0.1));
    let mut force = ContactForceCost::new(1);
    force.set_f_weight(vec![nalgebra::Vector3::new(0.1, 0.1, 0.1)]);
    let mut cost = CostFunction::new();
    cost.push(CostComponent::ConfigurationSpace(config));
    cost.push(CostComponent::ContactForce(force));
    let mut constraints = Constraints::new(1e-4, 0.995);
    constraints.push(ConstraintComponent::FrictionCone(FrictionCone::new(0.7, 1)));

    let mut rng = StdRng::seed_from_u64(23);
    let mut s = SplitSolution::new(&robot);
    s.set_contact_status(&status);
    s.q.copy_from(&random_vector(&mut rng, v));
    s.v.copy_from(&random_vector(&mut rng, v));
    s.a.copy_from(&random_vector(&mut rng, v));
    s.u.copy_from(&random_vector(&mut rng, v));
    s.beta.copy_from(&random_vector(&mut rng, v));
    s.lmd.copy_from(&random_vector(&mut rng, v));
    s.gmm.copy_from(&random_vector(&mut rng, v));
    s.f[0] = nalgebra::Vector3::new(0.2, -0.1, 6.0);
    s.set_f_stack();
    let mut s_next = s.clone();
    s_next.q += random_vector(&mut rng, v) * 0.1;
    s_next.v += random_vector(&mut rng, v) * 0.1;

    let mut ocp: SplitOcp<ChainModel> = SplitOcp::new(&robot, &constraints, 0.05).unwrap();
    ocp.init_constraints(&constraints, &s);
    let next = NextStageRef { q: &s_next.q, v: &s_next.v, lmd: &s_next.lmd, gmm: &s_next.gmm };
    let dt = 0.05;
    let q_prev = s.q.clone();

    let mut m1 = SplitKktMatrix::new(&dims);
    let mut r1 = SplitKktResidual::new(&dims);
    ocp.linearize_ocp(
        &robot,
        &cost,
        &constraints,
        &status,
        GridIndex::Stage(1),
        0.0,
        dt,
        &q_prev,
        &s,
        next,
        &mut m1,
        &mut r1,
    )
    .unwrap();

    let mut m2 = SplitKktMatrix::new(&dims);
    let mut r2 = SplitKktResidual::new(&dims);
    ocp.compute_kkt_residual(
        &robot, &cost, &constraints, &status, 0.0, dt, &q_prev, &s, next, &mut m2, &mut r2,
    );
    let e_first = ocp.kkt_error();

    assert!((r1.fq().into_owned() - r2.fq().into_owned()).norm() < 1e-14);
    assert!((&r1.la - &r2.la).norm() < 1e-14);
    assert!((r1.lf_active().into_owned() - r2.lf_active().into_owned()).norm() < 1e-14);

    // the residual-only path is reproducible bit-for-bit
    let mut r3 = SplitKktResidual::new(&dims);
    let mut m3 = SplitKktMatrix::new(&dims);
    ocp.compute_kkt_residual(
        &robot, &cost, &constraints, &status, 0.0, dt, &q_prev, &s, next, &mut m3, &mut r3,
    );
    assert_eq!(ocp.kkt_error(), e_first);
    assert!((&r2.lx - &r3.lx).norm() == 0.0);
    assert!((&r2.fx - &r3.fx).norm() == 0.0);
}
