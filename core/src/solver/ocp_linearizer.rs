use nalgebra::DVector;
use rayon::prelude::*;

use crate::constraints::Constraints;
use crate::cost::CostFunction;
use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::hybrid::contact_sequence::ContactSequence;
use crate::ocp::split_ocp::NextStageRef;
use crate::ocp::{KktMatrix, KktResidual, Solution};
use crate::robot::RobotModel;

use super::OcpStages;

/// Parallel fan-out over the `N+1+2K+L` sub-intervals: every slot is mutated
/// by exactly one worker per region (chosen by slot index), neighbor values
/// are read through the shared solution, and errors are collected to the one
/// with the lowest slot index after the region.
pub struct OcpLinearizer {
    n: usize,
}

impl OcpLinearizer {
    pub fn new(n: usize) -> Self {
        Self { n }
    }

    /// Configuration of the previous sub-interval of ordinary stage `k`,
    /// accounting for events inside cell `k-1`.
    fn q_prev<'a>(
        cs: &ContactSequence,
        s: &'a Solution,
        q0: &'a DVector<f64>,
        k: usize,
    ) -> &'a DVector<f64> {
        if k == 0 {
            q0
        } else if let Some(i) = cs.impulse_index_after_stage(k - 1) {
            &s.aux[i].q
        } else if let Some(l) = cs.lift_index_after_stage(k - 1) {
            &s.lift[l].q
        } else {
            &s.stages[k - 1].q
        }
    }

    fn next_of_stage<'a>(cs: &ContactSequence, s: &'a Solution, k: usize) -> NextStageRef<'a> {
        if let Some(i) = cs.impulse_index_after_stage(k) {
            let imp = &s.impulse[i];
            NextStageRef { q: &imp.q, v: &imp.v, lmd: &imp.lmd, gmm: &imp.gmm }
        } else if let Some(l) = cs.lift_index_after_stage(k) {
            let lift = &s.lift[l];
            NextStageRef { q: &lift.q, v: &lift.v, lmd: &lift.lmd, gmm: &lift.gmm }
        } else {
            let nxt = &s.stages[k + 1];
            NextStageRef { q: &nxt.q, v: &nxt.v, lmd: &nxt.lmd, gmm: &nxt.gmm }
        }
    }

    pub fn init_constraints<R: RobotModel>(
        &self,
        pool: &rayon::ThreadPool,
        constraints: &Constraints,
        cs: &ContactSequence,
        s: &Solution,
        stages: &mut OcpStages<R>,
    ) {
        let num_impulse = cs.total_num_impulse_stages();
        let num_lift = cs.total_num_lift_stages();
        pool.install(|| {
            stages
                .stages
                .par_iter_mut()
                .zip(s.stages.par_iter())
                .for_each(|(ocp, s_k)| ocp.init_constraints(constraints, s_k));
            stages.impulse[..num_impulse]
                .par_iter_mut()
                .zip(s.impulse[..num_impulse].par_iter())
                .for_each(|(ocp, s_i)| ocp.init_constraints(constraints, s_i));
            stages.aux[..num_impulse]
                .par_iter_mut()
                .zip(s.aux[..num_impulse].par_iter())
                .for_each(|(ocp, s_i)| ocp.init_constraints(constraints, s_i));
            stages.lift[..num_lift]
                .par_iter_mut()
                .zip(s.lift[..num_lift].par_iter())
                .for_each(|(ocp, s_l)| ocp.init_constraints(constraints, s_l));
        });
    }

    /// True when every slot passes the primal-feasibility screen; the first
    /// offending slot is logged.
    pub fn is_feasible<R: RobotModel>(
        &self,
        constraints: &Constraints,
        cs: &ContactSequence,
        s: &Solution,
        stages: &OcpStages<R>,
    ) -> bool {
        for (k, (ocp, s_k)) in stages.stages.iter().zip(s.stages.iter()).enumerate() {
            if !ocp.is_feasible(constraints, s_k) {
                log::warn!("infeasible solution at {:?}", GridIndex::Stage(k));
                return false;
            }
        }
        for i in 0..cs.total_num_impulse_stages() {
            if !stages.impulse[i].is_feasible(constraints, &s.impulse[i]) {
                log::warn!("infeasible solution at {:?}", GridIndex::Impulse(i));
                return false;
            }
            if !stages.aux[i].is_feasible(constraints, &s.aux[i]) {
                log::warn!("infeasible solution at {:?}", GridIndex::Aux(i));
                return false;
            }
        }
        for l in 0..cs.total_num_lift_stages() {
            if !stages.lift[l].is_feasible(constraints, &s.lift[l]) {
                log::warn!("infeasible solution at {:?}", GridIndex::Lift(l));
                return false;
            }
        }
        true
    }

    /// Full linearization + condensation of every sub-interval.
    #[allow(clippy::too_many_arguments)]
    pub fn linearize_ocp<R: RobotModel>(
        &self,
        pool: &rayon::ThreadPool,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        cs: &ContactSequence,
        t: f64,
        q0: &DVector<f64>,
        s: &Solution,
        stages: &mut OcpStages<R>,
        kkt_matrix: &mut KktMatrix,
        kkt_residual: &mut KktResidual,
    ) -> Result<(), SolverError> {
        let num_impulse = cs.total_num_impulse_stages();
        let num_lift = cs.total_num_lift_stages();
        let err = pool.install(|| {
            let stage_err = stages
                .stages
                .par_iter_mut()
                .zip(kkt_matrix.stages.par_iter_mut())
                .zip(kkt_residual.stages.par_iter_mut())
                .enumerate()
                .filter_map(|(k, ((ocp, km), kr))| {
                    let grid = GridIndex::Stage(k);
                    ocp.linearize_ocp(
                        robot,
                        cost,
                        constraints,
                        cs.contact_status(k),
                        grid,
                        t + cs.stage_time(k),
                        cs.dtau(k),
                        Self::q_prev(cs, s, q0, k),
                        &s.stages[k],
                        Self::next_of_stage(cs, s, k),
                        km,
                        kr,
                    )
                    .err()
                    .map(|e| (k, e))
                })
                .min_by_key(|(k, _)| *k);
            let impulse_err = stages.impulse[..num_impulse]
                .par_iter_mut()
                .zip(kkt_matrix.impulse[..num_impulse].par_iter_mut())
                .zip(kkt_residual.impulse[..num_impulse].par_iter_mut())
                .enumerate()
                .filter_map(|(i, ((ocp, km), kr))| {
                    let k = cs.time_stage_before_impulse(i);
                    ocp.linearize_ocp(
                        robot,
                        cost,
                        constraints,
                        cs.impulse_status(i),
                        GridIndex::Impulse(i),
                        t + cs.impulse_time(i),
                        &s.stages[k].q,
                        &s.impulse[i],
                        &s.aux[i].q,
                        &s.aux[i].v,
                        &s.aux[i].lmd,
                        &s.aux[i].gmm,
                        km,
                        kr,
                    )
                    .err()
                    .map(|e| (i, e))
                })
                .min_by_key(|(i, _)| *i);
            let aux_err = stages.aux[..num_impulse]
                .par_iter_mut()
                .zip(kkt_matrix.aux[..num_impulse].par_iter_mut())
                .zip(kkt_residual.aux[..num_impulse].par_iter_mut())
                .enumerate()
                .filter_map(|(i, ((ocp, km), kr))| {
                    let k_next = cs.time_stage_after_impulse(i);
                    let nxt = &s.stages[k_next];
                    ocp.linearize_ocp(
                        robot,
                        cost,
                        constraints,
                        cs.contact_status_after_impulse(i),
                        GridIndex::Aux(i),
                        t + cs.impulse_time(i),
                        cs.dtau_impulse(i),
                        &s.impulse[i].q,
                        &s.aux[i],
                        NextStageRef { q: &nxt.q, v: &nxt.v, lmd: &nxt.lmd, gmm: &nxt.gmm },
                        km,
                        kr,
                    )
                    .err()
                    .map(|e| (i, e))
                })
                .min_by_key(|(i, _)| *i);
            let lift_err = stages.lift[..num_lift]
                .par_iter_mut()
                .zip(kkt_matrix.lift[..num_lift].par_iter_mut())
                .zip(kkt_residual.lift[..num_lift].par_iter_mut())
                .enumerate()
                .filter_map(|(l, ((ocp, km), kr))| {
                    let k = cs.time_stage_before_lift(l);
                    let nxt = &s.stages[k + 1];
                    ocp.linearize_ocp(
                        robot,
                        cost,
                        constraints,
                        cs.contact_status_after_lift(l),
                        GridIndex::Lift(l),
                        t + cs.lift_time(l),
                        cs.dtau_lift(l),
                        &s.stages[k].q,
                        &s.lift[l],
                        NextStageRef { q: &nxt.q, v: &nxt.v, lmd: &nxt.lmd, gmm: &nxt.gmm },
                        km,
                        kr,
                    )
                    .err()
                    .map(|e| (l, e))
                })
                .min_by_key(|(l, _)| *l);
            stage_err.or(impulse_err).or(aux_err).or(lift_err)
        });
        if let Some((_, e)) = err {
            return Err(e);
        }
        let n = self.n;
        stages.terminal.linearize_ocp(
            robot,
            cost,
            t + cs.horizon(),
            Self::q_prev(cs, s, q0, n),
            &s.stages[n],
            &mut kkt_matrix.stages[n],
            &mut kkt_residual.stages[n],
        );
        Ok(())
    }

    /// Residual-only evaluation of every sub-interval; stores the per-slot
    /// squared KKT errors in the stage work units.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_kkt_residual<R: RobotModel>(
        &self,
        pool: &rayon::ThreadPool,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        cs: &ContactSequence,
        t: f64,
        q0: &DVector<f64>,
        s: &Solution,
        stages: &mut OcpStages<R>,
        kkt_matrix: &mut KktMatrix,
        kkt_residual: &mut KktResidual,
    ) {
        let num_impulse = cs.total_num_impulse_stages();
        let num_lift = cs.total_num_lift_stages();
        pool.install(|| {
            stages
                .stages
                .par_iter_mut()
                .zip(kkt_matrix.stages.par_iter_mut())
                .zip(kkt_residual.stages.par_iter_mut())
                .enumerate()
                .for_each(|(k, ((ocp, km), kr))| {
                    ocp.compute_kkt_residual(
                        robot,
                        cost,
                        constraints,
                        cs.contact_status(k),
                        t + cs.stage_time(k),
                        cs.dtau(k),
                        Self::q_prev(cs, s, q0, k),
                        &s.stages[k],
                        Self::next_of_stage(cs, s, k),
                        km,
                        kr,
                    );
                });
            stages.impulse[..num_impulse]
                .par_iter_mut()
                .zip(kkt_matrix.impulse[..num_impulse].par_iter_mut())
                .zip(kkt_residual.impulse[..num_impulse].par_iter_mut())
                .enumerate()
                .for_each(|(i, ((ocp, km), kr))| {
                    let k = cs.time_stage_before_impulse(i);
                    ocp.compute_kkt_residual(
                        robot,
                        cost,
                        constraints,
                        cs.impulse_status(i),
                        t + cs.impulse_time(i),
                        &s.stages[k].q,
                        &s.impulse[i],
                        &s.aux[i].q,
                        &s.aux[i].v,
                        &s.aux[i].lmd,
                        &s.aux[i].gmm,
                        km,
                        kr,
                        k > 0,
                    );
                });
            stages.aux[..num_impulse]
                .par_iter_mut()
                .zip(kkt_matrix.aux[..num_impulse].par_iter_mut())
                .zip(kkt_residual.aux[..num_impulse].par_iter_mut())
                .enumerate()
                .for_each(|(i, ((ocp, km), kr))| {
                    let k_next = cs.time_stage_after_impulse(i);
                    let nxt = &s.stages[k_next];
                    ocp.compute_kkt_residual(
                        robot,
                        cost,
                        constraints,
                        cs.contact_status_after_impulse(i),
                        t + cs.impulse_time(i),
                        cs.dtau_impulse(i),
                        &s.impulse[i].q,
                        &s.aux[i],
                        NextStageRef { q: &nxt.q, v: &nxt.v, lmd: &nxt.lmd, gmm: &nxt.gmm },
                        km,
                        kr,
                    );
                });
            stages.lift[..num_lift]
                .par_iter_mut()
                .zip(kkt_matrix.lift[..num_lift].par_iter_mut())
                .zip(kkt_residual.lift[..num_lift].par_iter_mut())
                .enumerate()
                .for_each(|(l, ((ocp, km), kr))| {
                    let k = cs.time_stage_before_lift(l);
                    let nxt = &s.stages[k + 1];
                    ocp.compute_kkt_residual(
                        robot,
                        cost,
                        constraints,
                        cs.contact_status_after_lift(l),
                        t + cs.lift_time(l),
                        cs.dtau_lift(l),
                        &s.stages[k].q,
                        &s.lift[l],
                        NextStageRef { q: &nxt.q, v: &nxt.v, lmd: &nxt.lmd, gmm: &nxt.gmm },
                        km,
                        kr,
                    );
                });
        });
        let n = self.n;
        stages.terminal.compute_kkt_residual(
            robot,
            cost,
            t + cs.horizon(),
            Self::q_prev(cs, s, q0, n),
            &s.stages[n],
            &mut kkt_matrix.stages[n],
            &mut kkt_residual.stages[n],
        );
    }

    /// `√(Σ per-slot squared errors)`; the per-slot terms come from the last
    /// `compute_kkt_residual` and the reduction order is fixed.
    pub fn kkt_error<R: RobotModel>(
        &self,
        cs: &ContactSequence,
        stages: &OcpStages<R>,
        initial_state_sq: f64,
    ) -> f64 {
        let mut sum = initial_state_sq;
        for ocp in &stages.stages {
            sum += ocp.kkt_error();
        }
        sum += stages.terminal.kkt_error();
        for i in 0..cs.total_num_impulse_stages() {
            sum += stages.impulse[i].kkt_error();
            sum += stages.aux[i].kkt_error();
        }
        for l in 0..cs.total_num_lift_stages() {
            sum += stages.lift[l].kkt_error();
        }
        sum.sqrt()
    }
}
