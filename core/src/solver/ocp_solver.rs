use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Vector3};
use rayon::prelude::*;

use crate::constraints::Constraints;
use crate::cost::CostFunction;
use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::hybrid::contact_sequence::ContactSequence;
use crate::hybrid::discrete_event::DiscreteEvent;
use crate::ocp::contact_dynamics::min_dt;
use crate::ocp::{Direction, KktMatrix, KktResidual, Solution, SplitSolution};
use crate::riccati::RiccatiFactorization;
use crate::riccati::riccati_factorizer::RiccatiFactorizer;
use crate::riccati::impulse_riccati_factorizer::ImpulseRiccatiFactorizer;
use crate::riccati::riccati_recursion::{RiccatiRecursion, grid_sequence, slot_dt};
use crate::riccati::state_constraint_factorization::StateConstraintFactorization;
use crate::riccati::state_constraint_factorizer::StateConstraintRiccatiFactorizer;
use crate::robot::RobotModel;
use crate::robot::contact_status::ContactStatus;

use super::OcpStages;
use super::line_search::LineSearch;
use super::ocp_linearizer::OcpLinearizer;
use super::solver_options::SolverOptions;

/// Direct-Riccati solver shell. One `update_solution` call performs one
/// Newton iteration: parallel linearization, serial backward recursion, the
/// Schur solve over impulse-time state constraints when events are present,
/// forward recursion, fraction-to-boundary step sizes and the primal/dual
/// update.
pub struct OcpSolver<R: RobotModel> {
    robot: R,
    cost: CostFunction,
    constraints: Constraints,
    contact_sequence: ContactSequence,
    stages: OcpStages<R>,
    linearizer: OcpLinearizer,
    recursion: RiccatiRecursion,
    sc_factorizer: StateConstraintRiccatiFactorizer,
    s: Solution,
    d: Direction,
    kkt_matrix: KktMatrix,
    kkt_residual: KktResidual,
    riccati: RiccatiFactorization,
    constraint_factorization: Vec<StateConstraintFactorization>,
    line_search: LineSearch,
    pool: rayon::ThreadPool,
    options: SolverOptions,
    initial_state_sq: f64,
    dgmm_stages: Vec<DVector<f64>>,
    dgmm_impulse: Vec<DVector<f64>>,
    dgmm_aux: Vec<DVector<f64>>,
    dgmm_lift: Vec<DVector<f64>>,
    n: usize,
}

impl<R: RobotModel> OcpSolver<R> {
    pub fn new(
        robot: R,
        cost: CostFunction,
        constraints: Constraints,
        options: SolverOptions,
    ) -> Result<Self, SolverError> {
        options.validate()?;
        let dims = robot.dims().clone();
        let n = options.n_stages;
        let max_imp = options.max_num_impulse;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.nthreads)
            .build()
            .map_err(|e| SolverError::config(format!("thread pool construction failed: {e}")))?;
        let contact_sequence = ContactSequence::new(
            options.horizon,
            n,
            max_imp,
            ContactStatus::new(dims.max_point_contacts),
        )?;
        let stages = OcpStages::new(&robot, &constraints, options.baumgarte_time_step, n, max_imp)?;
        let s = Solution::new(&robot, n, max_imp);
        let d = Direction::new(&robot, n, max_imp);
        let kkt_matrix = KktMatrix::new(&robot, n, max_imp);
        let kkt_residual = KktResidual::new(&robot, n, max_imp);
        let riccati = RiccatiFactorization::new(&robot, n, max_imp);
        let constraint_factorization = (0..max_imp)
            .map(|_| StateConstraintFactorization::new(&dims, n, max_imp))
            .collect();
        let line_search = LineSearch::new(
            &robot,
            n,
            max_imp,
            options.line_search_reduction_rate,
            options.min_line_search_step,
        );
        let dgmm = |count: usize| (0..count).map(|_| DVector::zeros(dims.dimv)).collect();
        let mut solver = Self {
            linearizer: OcpLinearizer::new(n),
            recursion: RiccatiRecursion::new(&dims, n),
            sc_factorizer: StateConstraintRiccatiFactorizer::new(&dims),
            robot,
            cost,
            constraints,
            contact_sequence,
            stages,
            s,
            d,
            kkt_matrix,
            kkt_residual,
            riccati,
            constraint_factorization,
            line_search,
            pool,
            options,
            initial_state_sq: 0.0,
            dgmm_stages: dgmm(n),
            dgmm_impulse: dgmm(max_imp),
            dgmm_aux: dgmm(max_imp),
            dgmm_lift: dgmm(max_imp),
            n,
        };
        solver.init_constraints();
        Ok(solver)
    }

    pub fn robot(&self) -> &R {
        &self.robot
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn contact_sequence(&self) -> &ContactSequence {
        &self.contact_sequence
    }

    // --- schedule edits -----------------------------------------------------

    pub fn set_contact_status_uniformly(&mut self, status: ContactStatus) {
        self.contact_sequence.set_contact_status_uniformly(status);
        self.sync_statuses();
    }

    pub fn set_discrete_event(&mut self, event: DiscreteEvent) -> Result<(), SolverError> {
        self.contact_sequence.set_discrete_event(event)?;
        self.sync_statuses();
        Ok(())
    }

    pub fn shift_impulse(&mut self, impulse_index: usize, time: f64) -> Result<(), SolverError> {
        self.contact_sequence.shift_impulse(impulse_index, time)?;
        self.sync_statuses();
        Ok(())
    }

    pub fn shift_lift(&mut self, lift_index: usize, time: f64) -> Result<(), SolverError> {
        self.contact_sequence.shift_lift(lift_index, time)?;
        self.sync_statuses();
        Ok(())
    }

    pub fn set_contact_points(&mut self, points: &[Vector3<f64>]) {
        self.contact_sequence.set_contact_points(points);
        self.sync_statuses();
    }

    /// Propagate the schedule's activation masks into every solution,
    /// direction and stacked-view buffer.
    fn sync_statuses(&mut self) {
        let cs = &self.contact_sequence;
        for k in 0..=self.n {
            let status = cs.contact_status(k);
            self.s.stages[k].set_contact_status(status);
            self.s.stages[k].set_f_stack();
            self.s.stages[k].set_mu_stack();
            self.d.stages[k].set_contact_status(status);
        }
        for i in 0..cs.total_num_impulse_stages() {
            let imp = cs.impulse_status(i);
            self.s.impulse[i].set_impulse_status(imp);
            self.s.impulse[i].set_f_stack();
            self.s.impulse[i].set_mu_stack();
            self.d.impulse[i].set_impulse_status(imp);
            let aux_status = cs.contact_status_after_impulse(i);
            self.s.aux[i].set_contact_status(aux_status);
            self.s.aux[i].set_f_stack();
            self.s.aux[i].set_mu_stack();
            self.d.aux[i].set_contact_status(aux_status);
        }
        for l in 0..cs.total_num_lift_stages() {
            let status = cs.contact_status_after_lift(l);
            self.s.lift[l].set_contact_status(status);
            self.s.lift[l].set_f_stack();
            self.s.lift[l].set_mu_stack();
            self.d.lift[l].set_contact_status(status);
        }
    }

    // --- warm start ---------------------------------------------------------

    /// Seed the slacks and duals of every inequality component from the
    /// current iterate.
    pub fn init_constraints(&mut self) {
        self.sync_statuses();
        self.linearizer.init_constraints(
            &self.pool,
            &self.constraints,
            &self.contact_sequence,
            &self.s,
            &mut self.stages,
        );
        self.line_search.clear_filter();
    }

    pub fn is_current_solution_feasible(&self) -> bool {
        self.linearizer.is_feasible(
            &self.constraints,
            &self.contact_sequence,
            &self.s,
            &self.stages,
        )
    }

    /// Broadcast one value over every slot of the named field and
    /// re-initialize the constraints.
    pub fn set_solution(&mut self, name: &str, value: &DVector<f64>) -> Result<(), SolverError> {
        let dims = self.robot.dims().clone();
        let check = |expected: usize| -> Result<(), SolverError> {
            if value.len() != expected {
                return Err(SolverError::config(format!(
                    "set_solution(\"{name}\"): expected length {expected}, got {}",
                    value.len()
                )));
            }
            Ok(())
        };
        let mut each_split = |f: &mut dyn FnMut(&mut SplitSolution)| {
            for s_k in &mut self.s.stages {
                f(s_k);
            }
            for s_a in &mut self.s.aux {
                f(s_a);
            }
            for s_l in &mut self.s.lift {
                f(s_l);
            }
        };
        match name {
            "q" => {
                check(dims.dimq)?;
                let mut q = value.clone();
                self.robot.normalize_configuration(&mut q);
                each_split(&mut |s| s.q.copy_from(&q));
                for s_i in &mut self.s.impulse {
                    s_i.q.copy_from(&q);
                }
            }
            "v" => {
                check(dims.dimv)?;
                each_split(&mut |s| s.v.copy_from(value));
                for s_i in &mut self.s.impulse {
                    s_i.v.copy_from(value);
                }
            }
            "a" => {
                check(dims.dimv)?;
                each_split(&mut |s| s.a.copy_from(value));
                for s_i in &mut self.s.impulse {
                    s_i.dv.fill(0.0);
                }
            }
            "u" => {
                check(dims.dimu())?;
                each_split(&mut |s| s.u.copy_from(value));
            }
            "f" => {
                check(3)?;
                let f = Vector3::new(value[0], value[1], value[2]);
                each_split(&mut |s| {
                    for fi in &mut s.f {
                        fi.copy_from(&f);
                    }
                    s.set_f_stack();
                });
                for s_i in &mut self.s.impulse {
                    for fi in &mut s_i.f {
                        fi.copy_from(&f);
                    }
                    s_i.set_f_stack();
                }
            }
            "lmd" => {
                check(dims.dimv)?;
                each_split(&mut |s| s.lmd.copy_from(value));
                for s_i in &mut self.s.impulse {
                    s_i.lmd.copy_from(value);
                }
            }
            "gmm" => {
                check(dims.dimv)?;
                each_split(&mut |s| s.gmm.copy_from(value));
                for s_i in &mut self.s.impulse {
                    s_i.gmm.copy_from(value);
                }
            }
            "beta" => {
                check(dims.dimv)?;
                each_split(&mut |s| s.beta.copy_from(value));
                for s_i in &mut self.s.impulse {
                    s_i.beta.copy_from(value);
                }
            }
            _ => {
                return Err(SolverError::config(format!(
                    "set_solution: unknown field \"{name}\""
                )));
            }
        }
        self.init_constraints();
        Ok(())
    }

    /// Constant-state warm start; returns the feasibility of the seeded
    /// iterate.
    pub fn set_state_trajectory(
        &mut self,
        q: &DVector<f64>,
        v: &DVector<f64>,
    ) -> Result<bool, SolverError> {
        self.set_solution("q", q)?;
        self.set_solution("v", v)?;
        Ok(self.is_current_solution_feasible())
    }

    /// Linear-interpolation warm start between `(q0, v0)` and `(qn, vn)`.
    pub fn set_state_trajectory_interpolated(
        &mut self,
        q0: &DVector<f64>,
        v0: &DVector<f64>,
        qn: &DVector<f64>,
        vn: &DVector<f64>,
    ) -> Result<bool, SolverError> {
        let dims = self.robot.dims().clone();
        if q0.len() != dims.dimq || qn.len() != dims.dimq {
            return Err(SolverError::config("state trajectory: configuration size"));
        }
        if v0.len() != dims.dimv || vn.len() != dims.dimv {
            return Err(SolverError::config("state trajectory: velocity size"));
        }
        let mut q0n = q0.clone();
        self.robot.normalize_configuration(&mut q0n);
        let mut dq = DVector::zeros(dims.dimv);
        self.robot.subtract_configuration(qn, &q0n, &mut dq);
        let n = self.n as f64;
        let step = &dq / n;
        for k in 0..=self.n {
            let frac = k as f64;
            self.robot
                .integrate_configuration(&q0n, &step, frac, &mut self.s.stages[k].q);
            self.s.stages[k].v.copy_from(&(v0 + (frac / n) * (vn - v0)));
        }
        self.init_constraints();
        Ok(self.is_current_solution_feasible())
    }

    // --- queries ------------------------------------------------------------

    pub fn get_solution(&self, stage: usize) -> &SplitSolution {
        assert!(stage <= self.n, "stage {stage} out of range");
        &self.s.stages[stage]
    }

    /// Concatenated trajectory of the named field over the ordinary stages.
    pub fn get_solution_trajectory(&self, name: &str) -> Result<Vec<DVector<f64>>, SolverError> {
        let out = match name {
            "q" => self.s.stages.iter().map(|s| s.q.clone()).collect(),
            "v" => self.s.stages.iter().map(|s| s.v.clone()).collect(),
            "a" => self.s.stages.iter().map(|s| s.a.clone()).collect(),
            "u" => self.s.stages.iter().map(|s| s.u.clone()).collect(),
            "f" => self
                .s
                .stages
                .iter()
                .map(|s| s.f_stack().into_owned())
                .collect(),
            _ => {
                return Err(SolverError::config(format!(
                    "get_solution_trajectory: unknown field \"{name}\""
                )));
            }
        };
        Ok(out)
    }

    /// LQR state-feedback gain `(Kq, Kv)` of the given stage.
    pub fn get_state_feedback_gain(&self, stage: usize) -> (DMatrix<f64>, DMatrix<f64>) {
        assert!(stage < self.n, "stage {stage} out of range");
        let v = self.robot.dims().dimv;
        let k = &self.riccati.stages[stage].k_gain;
        (k.columns(0, v).into_owned(), k.columns(v, v).into_owned())
    }

    // --- iteration ----------------------------------------------------------

    /// One Newton iteration of the whole horizon.
    pub fn update_solution(
        &mut self,
        t: f64,
        q: &DVector<f64>,
        v: &DVector<f64>,
        use_line_search: bool,
    ) -> Result<(), SolverError> {
        assert_eq!(q.len(), self.robot.dims().dimq);
        assert_eq!(v.len(), self.robot.dims().dimv);
        self.sync_statuses();
        self.linearizer.linearize_ocp(
            &self.pool,
            &self.robot,
            &self.cost,
            &self.constraints,
            &self.contact_sequence,
            t,
            q,
            &self.s,
            &mut self.stages,
            &mut self.kkt_matrix,
            &mut self.kkt_residual,
        )?;
        self.recursion.backward_riccati_recursion(
            &self.contact_sequence,
            &mut self.kkt_matrix,
            &mut self.kkt_residual,
            &mut self.riccati,
        )?;
        // initial-state direction
        let dimv = self.robot.dims().dimv;
        let mut dx0 = DVector::zeros(2 * dimv);
        {
            let mut dq0 = DVector::zeros(dimv);
            self.robot.subtract_configuration(q, &self.s.stages[0].q, &mut dq0);
            dx0.rows_mut(0, dimv).copy_from(&dq0);
            dx0.rows_mut(dimv, dimv).copy_from(&(v - &self.s.stages[0].v));
        }
        self.d.stages[0].dx.copy_from(&dx0);
        let num_impulse = self.contact_sequence.total_num_impulse_stages();
        if num_impulse > 0 {
            self.compute_direction_with_state_constraints(&dx0)?;
        } else {
            let seq = grid_sequence(&self.contact_sequence);
            for slot in &seq {
                self.riccati.get_mut(*slot).n_vec.fill(0.0);
            }
            self.recursion.forward_riccati_recursion(
                &self.contact_sequence,
                &self.kkt_matrix,
                &self.kkt_residual,
                &self.riccati,
                &mut self.d,
            );
        }
        self.expand_directions();
        // fraction-to-boundary step sizes
        let mut primal_step = self.max_primal_step_size();
        let dual_step = self.max_dual_step_size();
        if use_line_search {
            match self.line_search.compute_step_size(
                &self.robot,
                &self.cost,
                &self.constraints,
                &self.contact_sequence,
                t,
                &self.s,
                &self.d,
                &mut self.stages,
                primal_step,
            ) {
                Some(step) => primal_step = step,
                None => {
                    warn!("line search starved; iterate left unchanged");
                    return Ok(());
                }
            }
        }
        debug!("primal step {primal_step:.3e}, dual step {dual_step:.3e}");
        self.update_primal_dual(primal_step, dual_step);
        Ok(())
    }

    /// Directions through the sensitivity factors when impulse-time state
    /// constraints are present.
    fn compute_direction_with_state_constraints(
        &mut self,
        dx0: &DVector<f64>,
    ) -> Result<(), SolverError> {
        let cs = &self.contact_sequence;
        self.recursion.factorize_state_constraint_parallel(
            cs,
            &self.kkt_matrix,
            &self.kkt_residual,
            &mut self.riccati,
        );
        self.recursion
            .factorize_state_constraint_serial(cs, &mut self.riccati);
        self.sc_factorizer.factorize_linear_problems(
            cs,
            &self.kkt_matrix,
            &self.kkt_residual,
            &self.riccati,
            dx0,
            &mut self.constraint_factorization,
        );
        self.recursion
            .backward_t_chains(cs, &self.riccati, &mut self.constraint_factorization);
        self.sc_factorizer.compute_lagrange_multiplier_direction(
            cs,
            &mut self.constraint_factorization,
            &mut self.d.impulse,
        )?;
        let seq = grid_sequence(cs);
        for slot in &seq {
            let mut n_vec = self.riccati.get(*slot).n_vec.clone();
            self.sc_factorizer.aggregate_lagrange_multiplier_direction(
                cs,
                &self.constraint_factorization,
                &self.d.impulse,
                *slot,
                &mut n_vec,
            );
            self.riccati.get_mut(*slot).n_vec.copy_from(&n_vec);
        }
        // dx = Π·dx0 + π − N·n per slot; du = K·dx + k − G⁻¹Bᵀ·n_next
        for (idx, slot) in seq.iter().enumerate() {
            let rc = self.riccati.get(*slot);
            let dx = &rc.pi * dx0 + &rc.pi_res - &rc.n_mat * &rc.n_vec;
            match *slot {
                GridIndex::Stage(k) => self.d.stages[k].dx.copy_from(&dx),
                GridIndex::Terminal => self.d.stages[self.n].dx.copy_from(&dx),
                GridIndex::Impulse(i) => self.d.impulse[i].dx.copy_from(&dx),
                GridIndex::Aux(i) => self.d.aux[i].dx.copy_from(&dx),
                GridIndex::Lift(l) => self.d.lift[l].dx.copy_from(&dx),
            }
            if idx + 1 < seq.len() && slot_dt(cs, *slot) >= min_dt() {
                let n_next = self.riccati.get(seq[idx + 1]).n_vec.clone();
                match *slot {
                    GridIndex::Stage(k) => RiccatiFactorizer::compute_input_direction(
                        &self.riccati.stages[k],
                        Some(&n_next),
                        &mut self.d.stages[k],
                    ),
                    GridIndex::Aux(i) => RiccatiFactorizer::compute_input_direction(
                        &self.riccati.aux[i],
                        Some(&n_next),
                        &mut self.d.aux[i],
                    ),
                    GridIndex::Lift(l) => RiccatiFactorizer::compute_input_direction(
                        &self.riccati.lift[l],
                        Some(&n_next),
                        &mut self.d.lift[l],
                    ),
                    GridIndex::Impulse(_) | GridIndex::Terminal => {}
                }
            }
        }
        Ok(())
    }

    /// Costate directions, condensed primal expansion, then the dual
    /// expansion; each phase is a parallel region over disjoint slots.
    fn expand_directions(&mut self) {
        let cs = &self.contact_sequence;
        let num_impulse = cs.total_num_impulse_stages();
        let num_lift = cs.total_num_lift_stages();
        let constraints = &self.constraints;
        let riccati = &self.riccati;
        let s = &self.s;
        self.pool.install(|| {
            self.stages
                .stages
                .par_iter_mut()
                .zip(self.d.stages.par_iter_mut())
                .zip(riccati.stages.par_iter())
                .zip(s.stages.par_iter())
                .enumerate()
                .for_each(|(k, (((ocp, d_k), rc), s_k))| {
                    RiccatiFactorizer::compute_costate_direction(rc, d_k);
                    ocp.expand_primal(cs.dtau(k), constraints, s_k, d_k);
                });
            self.stages.impulse[..num_impulse]
                .par_iter_mut()
                .zip(self.d.impulse[..num_impulse].par_iter_mut())
                .zip(riccati.impulse[..num_impulse].par_iter())
                .zip(s.impulse[..num_impulse].par_iter())
                .for_each(|(((ocp, d_i), rc), s_i)| {
                    ImpulseRiccatiFactorizer::compute_costate_direction(rc, d_i);
                    ocp.expand_primal(constraints, s_i, d_i);
                });
            self.stages.aux[..num_impulse]
                .par_iter_mut()
                .zip(self.d.aux[..num_impulse].par_iter_mut())
                .zip(riccati.aux[..num_impulse].par_iter())
                .zip(s.aux[..num_impulse].par_iter())
                .enumerate()
                .for_each(|(i, (((ocp, d_a), rc), s_a))| {
                    RiccatiFactorizer::compute_costate_direction(rc, d_a);
                    ocp.expand_primal(cs.dtau_impulse(i), constraints, s_a, d_a);
                });
            self.stages.lift[..num_lift]
                .par_iter_mut()
                .zip(self.d.lift[..num_lift].par_iter_mut())
                .zip(riccati.lift[..num_lift].par_iter())
                .zip(s.lift[..num_lift].par_iter())
                .enumerate()
                .for_each(|(l, (((ocp, d_l), rc), s_l))| {
                    RiccatiFactorizer::compute_costate_direction(rc, d_l);
                    ocp.expand_primal(cs.dtau_lift(l), constraints, s_l, d_l);
                });
        });
        // terminal costate
        RiccatiFactorizer::compute_costate_direction(
            &riccati.stages[self.n],
            &mut self.d.stages[self.n],
        );
        // gather the next-slot velocity-costate directions, then expand duals
        for k in 0..self.n {
            let dgmm = if let Some(i) = cs.impulse_index_after_stage(k) {
                self.d.impulse[i].dgmm()
            } else if let Some(l) = cs.lift_index_after_stage(k) {
                self.d.lift[l].dgmm()
            } else {
                self.d.stages[k + 1].dgmm()
            };
            self.dgmm_stages[k].copy_from(&dgmm.into_owned());
        }
        for i in 0..num_impulse {
            self.dgmm_impulse[i].copy_from(&self.d.aux[i].dgmm().into_owned());
            let k_next = cs.time_stage_after_impulse(i);
            self.dgmm_aux[i].copy_from(&self.d.stages[k_next].dgmm().into_owned());
        }
        for l in 0..num_lift {
            let k_next = cs.time_stage_after_lift(l);
            self.dgmm_lift[l].copy_from(&self.d.stages[k_next].dgmm().into_owned());
        }
        let dgmm_stages = &self.dgmm_stages;
        let dgmm_impulse = &self.dgmm_impulse;
        let dgmm_aux = &self.dgmm_aux;
        let dgmm_lift = &self.dgmm_lift;
        self.pool.install(|| {
            self.stages
                .stages
                .par_iter_mut()
                .zip(self.d.stages.par_iter_mut())
                .zip(self.kkt_matrix.stages.par_iter())
                .zip(self.kkt_residual.stages.par_iter())
                .enumerate()
                .for_each(|(k, (((ocp, d_k), km), kr))| {
                    ocp.expand_dual(cs.dtau(k), km, kr, &dgmm_stages[k], d_k);
                });
            self.stages.impulse[..num_impulse]
                .par_iter_mut()
                .zip(self.d.impulse[..num_impulse].par_iter_mut())
                .enumerate()
                .for_each(|(i, (ocp, d_i))| {
                    ocp.expand_dual(&dgmm_impulse[i], d_i);
                });
            self.stages.aux[..num_impulse]
                .par_iter_mut()
                .zip(self.d.aux[..num_impulse].par_iter_mut())
                .zip(self.kkt_matrix.aux[..num_impulse].par_iter())
                .zip(self.kkt_residual.aux[..num_impulse].par_iter())
                .enumerate()
                .for_each(|(i, (((ocp, d_a), km), kr))| {
                    ocp.expand_dual(cs.dtau_impulse(i), km, kr, &dgmm_aux[i], d_a);
                });
            self.stages.lift[..num_lift]
                .par_iter_mut()
                .zip(self.d.lift[..num_lift].par_iter_mut())
                .zip(self.kkt_matrix.lift[..num_lift].par_iter())
                .zip(self.kkt_residual.lift[..num_lift].par_iter())
                .enumerate()
                .for_each(|(l, (((ocp, d_l), km), kr))| {
                    ocp.expand_dual(cs.dtau_lift(l), km, kr, &dgmm_lift[l], d_l);
                });
        });
    }

    fn max_primal_step_size(&self) -> f64 {
        let cs = &self.contact_sequence;
        let mut step = 1.0f64;
        for ocp in &self.stages.stages {
            step = step.min(ocp.max_primal_step_size(&self.constraints));
        }
        for i in 0..cs.total_num_impulse_stages() {
            step = step.min(self.stages.impulse[i].max_primal_step_size(&self.constraints));
            step = step.min(self.stages.aux[i].max_primal_step_size(&self.constraints));
        }
        for l in 0..cs.total_num_lift_stages() {
            step = step.min(self.stages.lift[l].max_primal_step_size(&self.constraints));
        }
        step
    }

    fn max_dual_step_size(&self) -> f64 {
        let cs = &self.contact_sequence;
        let mut step = 1.0f64;
        for ocp in &self.stages.stages {
            step = step.min(ocp.max_dual_step_size(&self.constraints));
        }
        for i in 0..cs.total_num_impulse_stages() {
            step = step.min(self.stages.impulse[i].max_dual_step_size(&self.constraints));
            step = step.min(self.stages.aux[i].max_dual_step_size(&self.constraints));
        }
        for l in 0..cs.total_num_lift_stages() {
            step = step.min(self.stages.lift[l].max_dual_step_size(&self.constraints));
        }
        step
    }

    fn update_primal_dual(&mut self, primal_step: f64, dual_step: f64) {
        let cs = &self.contact_sequence;
        let num_impulse = cs.total_num_impulse_stages();
        let num_lift = cs.total_num_lift_stages();
        let robot = &self.robot;
        let constraints = &self.constraints;
        self.pool.install(|| {
            self.stages
                .stages
                .par_iter_mut()
                .zip(self.s.stages.par_iter_mut())
                .zip(self.d.stages.par_iter())
                .for_each(|((ocp, s_k), d_k)| {
                    ocp.update_primal(robot, constraints, primal_step, d_k, s_k);
                    ocp.update_dual(constraints, dual_step);
                });
            self.stages.impulse[..num_impulse]
                .par_iter_mut()
                .zip(self.s.impulse[..num_impulse].par_iter_mut())
                .zip(self.d.impulse[..num_impulse].par_iter())
                .for_each(|((ocp, s_i), d_i)| {
                    ocp.update_primal(robot, constraints, primal_step, d_i, s_i);
                    ocp.update_dual(constraints, dual_step);
                });
            self.stages.aux[..num_impulse]
                .par_iter_mut()
                .zip(self.s.aux[..num_impulse].par_iter_mut())
                .zip(self.d.aux[..num_impulse].par_iter())
                .for_each(|((ocp, s_a), d_a)| {
                    ocp.update_primal(robot, constraints, primal_step, d_a, s_a);
                    ocp.update_dual(constraints, dual_step);
                });
            self.stages.lift[..num_lift]
                .par_iter_mut()
                .zip(self.s.lift[..num_lift].par_iter_mut())
                .zip(self.d.lift[..num_lift].par_iter())
                .for_each(|((ocp, s_l), d_l)| {
                    ocp.update_primal(robot, constraints, primal_step, d_l, s_l);
                    ocp.update_dual(constraints, dual_step);
                });
        });
        self.stages.terminal.update_primal(
            robot,
            primal_step,
            &self.d.stages[self.n],
            &mut self.s.stages[self.n],
        );
    }

    /// Evaluate the KKT residual of the current iterate (no update).
    pub fn compute_kkt_residual(&mut self, t: f64, q: &DVector<f64>, v: &DVector<f64>) {
        self.sync_statuses();
        let dimv = self.robot.dims().dimv;
        let mut dq0 = DVector::zeros(dimv);
        self.robot.subtract_configuration(q, &self.s.stages[0].q, &mut dq0);
        self.initial_state_sq = dq0.norm_squared() + (v - &self.s.stages[0].v).norm_squared();
        self.linearizer.compute_kkt_residual(
            &self.pool,
            &self.robot,
            &self.cost,
            &self.constraints,
            &self.contact_sequence,
            t,
            q,
            &self.s,
            &mut self.stages,
            &mut self.kkt_matrix,
            &mut self.kkt_residual,
        );
    }

    /// KKT error of the last `compute_kkt_residual` call.
    pub fn kkt_error(&self) -> f64 {
        self.linearizer
            .kkt_error(&self.contact_sequence, &self.stages, self.initial_state_sq)
    }
}
