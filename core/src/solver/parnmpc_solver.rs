use log::{debug, warn};
use nalgebra::DVector;
use rayon::prelude::*;

use crate::constraints::Constraints;
use crate::cost::CostFunction;
use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::ocp::split_direction::SplitDirection;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_ocp::{NextStageRef, SplitOcp};
use crate::ocp::split_solution::SplitSolution;
use crate::parnmpc::BackwardCorrection;
use crate::robot::RobotModel;
use crate::robot::contact_status::ContactStatus;

use super::solver_options::SolverOptions;

/// Backward-correction (ParNMPC) solver shell for smooth horizons: per-stage
/// local KKT inversions run in parallel, the correction sweeps serialize only
/// cheap matrix-vector products. Preferred over the direct Riccati path when
/// many workers are available and no discrete events are scheduled; discrete
/// events are not supported here.
pub struct ParnmpcSolver<R: RobotModel> {
    robot: R,
    cost: CostFunction,
    constraints: Constraints,
    contact_status: ContactStatus,
    stages: Vec<SplitOcp<R>>,
    correction: BackwardCorrection,
    s: Vec<SplitSolution>,
    s_new: Vec<SplitSolution>,
    d: Vec<SplitDirection>,
    kkt_matrix: Vec<SplitKktMatrix>,
    kkt_residual: Vec<SplitKktResidual>,
    pool: rayon::ThreadPool,
    options: SolverOptions,
    n: usize,
    dt: f64,
}

impl<R: RobotModel> ParnmpcSolver<R> {
    pub fn new(
        robot: R,
        cost: CostFunction,
        constraints: Constraints,
        options: SolverOptions,
    ) -> Result<Self, SolverError> {
        options.validate()?;
        let dims = robot.dims().clone();
        if dims.has_floating_base {
            return Err(SolverError::config(
                "the backward-correction solver supports fixed-base robots only",
            ));
        }
        if options.max_num_impulse > 0 {
            return Err(SolverError::config(
                "the backward-correction solver does not handle discrete events",
            ));
        }
        let n = options.n_stages;
        let dt = options.dt_nominal();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.nthreads)
            .build()
            .map_err(|e| SolverError::config(format!("thread pool construction failed: {e}")))?;
        let mut stages = Vec::with_capacity(n);
        for _ in 0..n {
            stages.push(SplitOcp::new(&robot, &constraints, options.baumgarte_time_step)?);
        }
        let s: Vec<_> = (0..n).map(|_| SplitSolution::new(&robot)).collect();
        let mut solver = Self {
            correction: BackwardCorrection::new(&dims, n),
            contact_status: ContactStatus::new(dims.max_point_contacts),
            stages,
            s_new: s.clone(),
            d: (0..n).map(|_| SplitDirection::new(&dims)).collect(),
            kkt_matrix: (0..n).map(|_| SplitKktMatrix::new(&dims)).collect(),
            kkt_residual: (0..n).map(|_| SplitKktResidual::new(&dims)).collect(),
            s,
            robot,
            cost,
            constraints,
            pool,
            options,
            n,
            dt,
        };
        solver.init_constraints();
        Ok(solver)
    }

    pub fn set_contact_status_uniformly(&mut self, status: ContactStatus) {
        self.contact_status = status;
        self.sync_statuses();
        self.correction.reset_aux_mat();
    }

    fn sync_statuses(&mut self) {
        for i in 0..self.n {
            self.s[i].set_contact_status(&self.contact_status);
            self.s[i].set_f_stack();
            self.s[i].set_mu_stack();
            self.s_new[i].set_contact_status(&self.contact_status);
            self.d[i].set_contact_status(&self.contact_status);
        }
    }

    pub fn init_constraints(&mut self) {
        self.sync_statuses();
        let constraints = &self.constraints;
        let s = &self.s;
        self.pool.install(|| {
            self.stages
                .par_iter_mut()
                .zip(s.par_iter())
                .for_each(|(ocp, s_i)| ocp.init_constraints(constraints, s_i));
        });
    }

    pub fn is_current_solution_feasible(&self) -> bool {
        for (i, (ocp, s_i)) in self.stages.iter().zip(self.s.iter()).enumerate() {
            if !ocp.is_feasible(&self.constraints, s_i) {
                warn!("infeasible solution at {:?}", GridIndex::Stage(i));
                return false;
            }
        }
        true
    }

    pub fn get_solution(&self, stage: usize) -> &SplitSolution {
        assert!(stage < self.n, "stage {stage} out of range");
        &self.s[stage]
    }

    /// Broadcast one value over every stage of the named field and
    /// re-initialize the constraints.
    pub fn set_solution(&mut self, name: &str, value: &DVector<f64>) -> Result<(), SolverError> {
        let dims = self.robot.dims().clone();
        match name {
            "q" => {
                if value.len() != dims.dimq {
                    return Err(SolverError::config("set_solution(\"q\"): size"));
                }
                let mut q = value.clone();
                self.robot.normalize_configuration(&mut q);
                for s_i in &mut self.s {
                    s_i.q.copy_from(&q);
                }
            }
            "v" => {
                if value.len() != dims.dimv {
                    return Err(SolverError::config("set_solution(\"v\"): size"));
                }
                for s_i in &mut self.s {
                    s_i.v.copy_from(value);
                }
            }
            "a" => {
                if value.len() != dims.dimv {
                    return Err(SolverError::config("set_solution(\"a\"): size"));
                }
                for s_i in &mut self.s {
                    s_i.a.copy_from(value);
                }
            }
            "u" => {
                if value.len() != dims.dimu() {
                    return Err(SolverError::config("set_solution(\"u\"): size"));
                }
                for s_i in &mut self.s {
                    s_i.u.copy_from(value);
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

    /// One Newton-type iteration: parallel coarse update, backward and
    /// forward correction sweeps, then the interior-point update.
    pub fn update_solution(
        &mut self,
        t: f64,
        q: &DVector<f64>,
        v: &DVector<f64>,
    ) -> Result<(), SolverError> {
        assert_eq!(q.len(), self.robot.dims().dimq);
        assert_eq!(v.len(), self.robot.dims().dimv);
        self.sync_statuses();
        if self.correction.aux_mat().is_none() {
            self.correction.init_aux_mat(
                &self.robot,
                &self.cost,
                t + self.options.horizon,
                &self.s[self.n - 1],
            );
        }
        self.coarse_update(t, q, v)?;
        self.correction
            .backward_correction(&self.pool, &self.robot, &self.s, &mut self.s_new);
        self.correction
            .forward_correction(&self.pool, &self.robot, &self.s, &mut self.s_new);
        self.compute_directions();
        let mut primal_step = 1.0f64;
        let mut dual_step = 1.0f64;
        for ocp in &self.stages {
            primal_step = primal_step.min(ocp.max_primal_step_size(&self.constraints));
            dual_step = dual_step.min(ocp.max_dual_step_size(&self.constraints));
        }
        debug!("parnmpc primal step {primal_step:.3e}, dual step {dual_step:.3e}");
        let robot = &self.robot;
        let constraints = &self.constraints;
        self.pool.install(|| {
            self.stages
                .par_iter_mut()
                .zip(self.s.par_iter_mut())
                .zip(self.d.par_iter())
                .for_each(|((ocp, s_i), d_i)| {
                    ocp.update_primal(robot, constraints, primal_step, d_i, s_i);
                    ocp.update_dual(constraints, dual_step);
                });
        });
        Ok(())
    }

    fn coarse_update(
        &mut self,
        t: f64,
        q: &DVector<f64>,
        v: &DVector<f64>,
    ) -> Result<(), SolverError> {
        let n = self.n;
        let dt = self.dt;
        let robot = &self.robot;
        let cost = &self.cost;
        let constraints = &self.constraints;
        let status = &self.contact_status;
        let s = &self.s;
        let aux = self.correction.aux_mat().cloned();
        let err = self.pool.install(|| {
            self.stages
                .par_iter_mut()
                .zip(self.correction.corrections.par_iter_mut())
                .zip(self.kkt_matrix.par_iter_mut())
                .zip(self.kkt_residual.par_iter_mut())
                .zip(self.s_new.par_iter_mut())
                .enumerate()
                .filter_map(|(i, ((((ocp, corr), km), kr), s_new))| {
                    let grid = GridIndex::Stage(i);
                    let (q_prev, v_prev) = if i == 0 { (q, v) } else { (&s[i - 1].q, &s[i - 1].v) };
                    let terminal = i == n - 1;
                    let next = if terminal {
                        None
                    } else {
                        let nxt = &s[i + 1];
                        Some(NextStageRef { q: &nxt.q, v: &nxt.v, lmd: &nxt.lmd, gmm: &nxt.gmm })
                    };
                    let res = ocp
                        .linearize_parnmpc(
                            robot,
                            cost,
                            constraints,
                            status,
                            grid,
                            t + (i as f64 + 1.0) * dt,
                            dt,
                            q_prev,
                            v_prev,
                            &s[i],
                            next,
                            terminal,
                            km,
                            kr,
                        )
                        .and_then(|()| {
                            corr.coarse_update(
                                robot,
                                grid,
                                dt,
                                if terminal { None } else { aux.as_ref() },
                                km,
                                kr,
                                &s[i],
                                s_new,
                            )
                        });
                    res.err().map(|e| (i, e))
                })
                .min_by_key(|(i, _)| *i)
        });
        if let Some((_, e)) = err {
            return Err(e);
        }
        Ok(())
    }

    fn compute_directions(&mut self) {
        let robot = &self.robot;
        let constraints = &self.constraints;
        let dt = self.dt;
        let s = &self.s;
        let s_new = &self.s_new;
        self.pool.install(|| {
            self.stages
                .par_iter_mut()
                .zip(self.correction.corrections.par_iter())
                .zip(self.d.par_iter_mut())
                .zip(self.kkt_matrix.par_iter())
                .zip(self.kkt_residual.par_iter())
                .enumerate()
                .for_each(|(i, ((((ocp, corr), d_i), km), kr))| {
                    corr.compute_direction(robot, &s[i], &s_new[i], d_i);
                    ocp.expand_primal(dt, constraints, &s[i], d_i);
                    // backward Euler: the stage's own costate multiplies its
                    // state equation
                    let dgmm = d_i.dgmm().into_owned();
                    ocp.expand_dual(dt, km, kr, &dgmm, d_i);
                });
        });
    }

    /// Evaluate the KKT residual of the current iterate.
    pub fn compute_kkt_residual(&mut self, t: f64, q: &DVector<f64>, v: &DVector<f64>) {
        self.sync_statuses();
        let n = self.n;
        let dt = self.dt;
        let robot = &self.robot;
        let cost = &self.cost;
        let constraints = &self.constraints;
        let status = &self.contact_status;
        let s = &self.s;
        self.pool.install(|| {
            self.stages
                .par_iter_mut()
                .zip(self.kkt_matrix.par_iter_mut())
                .zip(self.kkt_residual.par_iter_mut())
                .enumerate()
                .for_each(|(i, ((ocp, km), kr))| {
                    let (q_prev, v_prev) = if i == 0 { (q, v) } else { (&s[i - 1].q, &s[i - 1].v) };
                    let terminal = i == n - 1;
                    let next = if terminal {
                        None
                    } else {
                        let nxt = &s[i + 1];
                        Some(NextStageRef { q: &nxt.q, v: &nxt.v, lmd: &nxt.lmd, gmm: &nxt.gmm })
                    };
                    ocp.compute_kkt_residual_parnmpc(
                        robot,
                        cost,
                        constraints,
                        status,
                        t + (i as f64 + 1.0) * dt,
                        dt,
                        q_prev,
                        v_prev,
                        &s[i],
                        next,
                        terminal,
                        km,
                        kr,
                    );
                });
        });
    }

    /// KKT error of the last `compute_kkt_residual` call.
    pub fn kkt_error(&self) -> f64 {
        self.stages.iter().map(|ocp| ocp.kkt_error()).sum::<f64>().sqrt()
    }
}
