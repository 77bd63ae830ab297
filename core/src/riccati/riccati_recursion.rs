use nalgebra::DVector;

use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::hybrid::contact_sequence::ContactSequence;
use crate::ocp::contact_dynamics::min_dt;
use crate::ocp::{Direction, KktMatrix, KktResidual};
use crate::robot::RobotDims;

use super::RiccatiFactorization;
use super::impulse_riccati_factorizer::ImpulseRiccatiFactorizer;
use super::riccati_factorizer::RiccatiFactorizer;
use super::split_riccati_factorization::SplitRiccatiFactorization;
use super::state_constraint_factorization::StateConstraintFactorization;

/// Sub-interval slots in time order. A cell with an impulse contributes
/// `Stage(k), Impulse(i), Aux(i)`; one with a lift `Stage(k), Lift(l)`.
pub fn grid_sequence(cs: &ContactSequence) -> Vec<GridIndex> {
    let n = cs.num_grid_stages();
    let mut seq =
        Vec::with_capacity(n + 1 + 2 * cs.total_num_impulse_stages() + cs.total_num_lift_stages());
    for k in 0..n {
        seq.push(GridIndex::Stage(k));
        if let Some(i) = cs.impulse_index_after_stage(k) {
            seq.push(GridIndex::Impulse(i));
            seq.push(GridIndex::Aux(i));
        } else if let Some(l) = cs.lift_index_after_stage(k) {
            seq.push(GridIndex::Lift(l));
        }
    }
    seq.push(GridIndex::Stage(n));
    seq
}

/// Propagation interval from a slot to its successor.
pub fn slot_dt(cs: &ContactSequence, slot: GridIndex) -> f64 {
    match slot {
        GridIndex::Stage(k) => cs.dtau(k),
        GridIndex::Terminal => 0.0,
        GridIndex::Impulse(_) => 0.0,
        GridIndex::Aux(i) => cs.dtau_impulse(i),
        GridIndex::Lift(l) => cs.dtau_lift(l),
    }
}

impl RiccatiFactorization {
    pub fn get(&self, idx: GridIndex) -> &SplitRiccatiFactorization {
        match idx {
            GridIndex::Stage(k) => &self.stages[k],
            GridIndex::Terminal => self.stages.last().unwrap(),
            GridIndex::Impulse(i) => &self.impulse[i],
            GridIndex::Aux(i) => &self.aux[i],
            GridIndex::Lift(l) => &self.lift[l],
        }
    }

    pub fn get_mut(&mut self, idx: GridIndex) -> &mut SplitRiccatiFactorization {
        match idx {
            GridIndex::Stage(k) => &mut self.stages[k],
            GridIndex::Terminal => self.stages.last_mut().unwrap(),
            GridIndex::Impulse(i) => &mut self.impulse[i],
            GridIndex::Aux(i) => &mut self.aux[i],
            GridIndex::Lift(l) => &mut self.lift[l],
        }
    }
}

/// Serial backward sweep, serial sensitivity chains, and the serial parts of
/// the forward sweep over the hybrid grid. The per-slot parallel pieces
/// (direction expansion, closed-loop factor fill) are driven by the solver.
pub struct RiccatiRecursion {
    factorizer: RiccatiFactorizer,
    impulse_factorizer: ImpulseRiccatiFactorizer,
    next_scratch: SplitRiccatiFactorization,
    n: usize,
}

impl RiccatiRecursion {
    pub fn new(dims: &RobotDims, n: usize) -> Self {
        Self {
            factorizer: RiccatiFactorizer::new(dims),
            impulse_factorizer: ImpulseRiccatiFactorizer::new(dims),
            next_scratch: SplitRiccatiFactorization::new(dims),
            n,
        }
    }

    /// Backward Riccati sweep from the terminal stage down to stage 0.
    pub fn backward_riccati_recursion(
        &mut self,
        cs: &ContactSequence,
        kkt_matrix: &mut KktMatrix,
        kkt_residual: &mut KktResidual,
        factorization: &mut RiccatiFactorization,
    ) -> Result<(), SolverError> {
        let n = self.n;
        // terminal: P = Qxx, s = -lx
        {
            let f = &mut factorization.stages[n];
            let m = &kkt_matrix.stages[n];
            let r = &kkt_residual.stages[n];
            let v = f.sq.len();
            f.pqq.copy_from(&m.qxx.view((0, 0), (v, v)));
            f.pqv.copy_from(&m.qxx.view((0, v), (v, v)));
            f.pvq.copy_from(&m.qxx.view((v, 0), (v, v)));
            f.pvv.copy_from(&m.qxx.view((v, v), (v, v)));
            f.sq.copy_from(&(-r.lq().into_owned()));
            f.sv.copy_from(&(-r.lv().into_owned()));
        }
        let seq = grid_sequence(cs);
        for idx in (0..seq.len() - 1).rev() {
            let slot = seq[idx];
            self.copy_cost_to_go(factorization.get(seq[idx + 1]));
            match slot {
                GridIndex::Stage(k) => {
                    let dt = cs.dtau(k);
                    if dt < min_dt() {
                        let src = self.next_scratch.clone();
                        factorization.stages[k].set_passthrough(&src);
                    } else {
                        self.factorizer.backward_riccati_recursion(
                            &self.next_scratch,
                            dt,
                            slot,
                            &mut kkt_matrix.stages[k],
                            &mut kkt_residual.stages[k],
                            &mut factorization.stages[k],
                        )?;
                    }
                }
                GridIndex::Impulse(i) => {
                    self.impulse_factorizer.backward_riccati_recursion(
                        &self.next_scratch,
                        &mut kkt_matrix.impulse[i],
                        &mut kkt_residual.impulse[i],
                        &mut factorization.impulse[i],
                    );
                }
                GridIndex::Aux(i) => {
                    let dt = cs.dtau_impulse(i);
                    if dt < min_dt() {
                        let src = self.next_scratch.clone();
                        factorization.aux[i].set_passthrough(&src);
                    } else {
                        self.factorizer.backward_riccati_recursion(
                            &self.next_scratch,
                            dt,
                            slot,
                            &mut kkt_matrix.aux[i],
                            &mut kkt_residual.aux[i],
                            &mut factorization.aux[i],
                        )?;
                    }
                }
                GridIndex::Lift(l) => {
                    let dt = cs.dtau_lift(l);
                    if dt < min_dt() {
                        let src = self.next_scratch.clone();
                        factorization.lift[l].set_passthrough(&src);
                    } else {
                        self.factorizer.backward_riccati_recursion(
                            &self.next_scratch,
                            dt,
                            slot,
                            &mut kkt_matrix.lift[l],
                            &mut kkt_residual.lift[l],
                            &mut factorization.lift[l],
                        )?;
                    }
                }
                GridIndex::Terminal => unreachable!(),
            }
        }
        Ok(())
    }

    fn copy_cost_to_go(&mut self, src: &SplitRiccatiFactorization) {
        self.next_scratch.pqq.copy_from(&src.pqq);
        self.next_scratch.pqv.copy_from(&src.pqv);
        self.next_scratch.pvq.copy_from(&src.pvq);
        self.next_scratch.pvv.copy_from(&src.pvv);
        self.next_scratch.sq.copy_from(&src.sq);
        self.next_scratch.sv.copy_from(&src.sv);
    }

    /// Serial forward sweep: input directions and state propagation, used
    /// when no impulse-time state constraint is present. `d.stages[0].dx`
    /// must hold the initial-state residual.
    pub fn forward_riccati_recursion(
        &mut self,
        cs: &ContactSequence,
        kkt_matrix: &KktMatrix,
        kkt_residual: &KktResidual,
        factorization: &RiccatiFactorization,
        d: &mut Direction,
    ) {
        let seq = grid_sequence(cs);
        let mut dx_next = DVector::zeros(d.stages[0].dx.len());
        for idx in 0..seq.len() - 1 {
            let slot = seq[idx];
            let next = seq[idx + 1];
            match slot {
                GridIndex::Stage(k) => {
                    let dt = cs.dtau(k);
                    if dt < min_dt() {
                        dx_next.copy_from(&d.stages[k].dx);
                    } else {
                        RiccatiFactorizer::compute_input_direction(
                            &factorization.stages[k],
                            None,
                            &mut d.stages[k],
                        );
                        self.factorizer.forward_riccati_recursion(
                            &kkt_matrix.stages[k],
                            &kkt_residual.stages[k],
                            dt,
                            &d.stages[k],
                            &mut dx_next,
                        );
                    }
                }
                GridIndex::Impulse(i) => {
                    self.impulse_factorizer.forward_riccati_recursion(
                        &kkt_matrix.impulse[i],
                        &kkt_residual.impulse[i],
                        &d.impulse[i],
                        &mut dx_next,
                    );
                }
                GridIndex::Aux(i) => {
                    let dt = cs.dtau_impulse(i);
                    if dt < min_dt() {
                        dx_next.copy_from(&d.aux[i].dx);
                    } else {
                        RiccatiFactorizer::compute_input_direction(
                            &factorization.aux[i],
                            None,
                            &mut d.aux[i],
                        );
                        self.factorizer.forward_riccati_recursion(
                            &kkt_matrix.aux[i],
                            &kkt_residual.aux[i],
                            dt,
                            &d.aux[i],
                            &mut dx_next,
                        );
                    }
                }
                GridIndex::Lift(l) => {
                    let dt = cs.dtau_lift(l);
                    if dt < min_dt() {
                        dx_next.copy_from(&d.lift[l].dx);
                    } else {
                        RiccatiFactorizer::compute_input_direction(
                            &factorization.lift[l],
                            None,
                            &mut d.lift[l],
                        );
                        self.factorizer.forward_riccati_recursion(
                            &kkt_matrix.lift[l],
                            &kkt_residual.lift[l],
                            dt,
                            &d.lift[l],
                            &mut dx_next,
                        );
                    }
                }
                GridIndex::Terminal => unreachable!(),
            }
            match next {
                GridIndex::Stage(k) => d.stages[k].dx.copy_from(&dx_next),
                GridIndex::Impulse(i) => d.impulse[i].dx.copy_from(&dx_next),
                GridIndex::Aux(i) => d.aux[i].dx.copy_from(&dx_next),
                GridIndex::Lift(l) => d.lift[l].dx.copy_from(&dx_next),
                GridIndex::Terminal => unreachable!(),
            }
        }
    }

    /// Fill the closed-loop factors `(A+BK, B·G⁻¹·Bᵀ, Fx+Bk)` of every
    /// propagating slot. The impulse slots were already filled by the
    /// backward sweep.
    pub fn factorize_state_constraint_parallel(
        &self,
        cs: &ContactSequence,
        kkt_matrix: &KktMatrix,
        kkt_residual: &KktResidual,
        factorization: &mut RiccatiFactorization,
    ) {
        let seq = grid_sequence(cs);
        for idx in 0..seq.len() - 1 {
            let slot = seq[idx];
            match slot {
                GridIndex::Stage(k) => {
                    let dt = cs.dtau(k);
                    if dt >= min_dt() {
                        self.factorizer.factorize_state_constraint_parallel(
                            dt,
                            &kkt_matrix.stages[k],
                            &kkt_residual.stages[k],
                            &mut factorization.stages[k],
                        );
                    }
                }
                GridIndex::Aux(i) => {
                    let dt = cs.dtau_impulse(i);
                    if dt >= min_dt() {
                        self.factorizer.factorize_state_constraint_parallel(
                            dt,
                            &kkt_matrix.aux[i],
                            &kkt_residual.aux[i],
                            &mut factorization.aux[i],
                        );
                    }
                }
                GridIndex::Lift(l) => {
                    let dt = cs.dtau_lift(l);
                    if dt >= min_dt() {
                        self.factorizer.factorize_state_constraint_parallel(
                            dt,
                            &kkt_matrix.lift[l],
                            &kkt_residual.lift[l],
                            &mut factorization.lift[l],
                        );
                    }
                }
                GridIndex::Impulse(_) | GridIndex::Terminal => {}
            }
        }
    }

    /// Serial sensitivity chain `Π`, `π`, `N` from the initial stage forward.
    pub fn factorize_state_constraint_serial(
        &mut self,
        cs: &ContactSequence,
        factorization: &mut RiccatiFactorization,
    ) {
        let seq = grid_sequence(cs);
        {
            let first = factorization.get_mut(seq[0]);
            first.pi.fill_with_identity();
            first.pi_res.fill(0.0);
            first.n_mat.fill(0.0);
        }
        for idx in 0..seq.len() - 1 {
            let cur = factorization.get(seq[idx]);
            let ap_bk = cur.ap_bk.clone();
            let pi = cur.pi.clone();
            let pi_res = cur.pi_res.clone();
            let n_mat = cur.n_mat.clone();
            let bginv_bt = cur.bginv_bt.clone();
            let ap_bk_res = cur.ap_bk_res.clone();
            let next = factorization.get_mut(seq[idx + 1]);
            next.pi.copy_from(&(&ap_bk * pi));
            next.pi_res.copy_from(&(&ap_bk * pi_res + ap_bk_res));
            let nap = &n_mat * ap_bk.transpose();
            next.n_mat.copy_from(&(&ap_bk * nap + bginv_bt));
        }
    }

    /// Backward `T` chains of every active impulse constraint:
    /// `T = Eᵀ` at the impulse stage, `T(s) = (A+BK)(s)ᵀ·T(next)` before it,
    /// zero after it.
    pub fn backward_t_chains(
        &self,
        cs: &ContactSequence,
        factorization: &RiccatiFactorization,
        constraint_factorization: &mut [StateConstraintFactorization],
    ) {
        let seq = grid_sequence(cs);
        for i in 0..cs.total_num_impulse_stages() {
            let fac = &mut constraint_factorization[i];
            let np = fac.dimp();
            fac.zero_t_chains();
            if np == 0 {
                continue;
            }
            let pos = seq
                .iter()
                .position(|&s| s == GridIndex::Impulse(i))
                .expect("impulse slot missing from the grid sequence");
            let x = fac.e_mat.ncols();
            fac.t_impulse[i]
                .view_mut((0, 0), (x, np))
                .copy_from(&fac.e_mat.view((0, 0), (np, x)).transpose());
            for idx in (0..pos).rev() {
                let slot = seq[idx];
                let next_t = Self::t_of(fac, seq[idx + 1]).view((0, 0), (x, np)).into_owned();
                let ap_bk = &factorization.get(slot).ap_bk;
                let t = ap_bk.transpose() * next_t;
                Self::t_of_mut(fac, slot).view_mut((0, 0), (x, np)).copy_from(&t);
            }
        }
    }

    fn t_of(fac: &StateConstraintFactorization, slot: GridIndex) -> &nalgebra::DMatrix<f64> {
        match slot {
            GridIndex::Stage(k) => &fac.t_stages[k],
            GridIndex::Terminal => fac.t_stages.last().unwrap(),
            GridIndex::Impulse(i) => &fac.t_impulse[i],
            GridIndex::Aux(i) => &fac.t_aux[i],
            GridIndex::Lift(l) => &fac.t_lift[l],
        }
    }

    fn t_of_mut(
        fac: &mut StateConstraintFactorization,
        slot: GridIndex,
    ) -> &mut nalgebra::DMatrix<f64> {
        match slot {
            GridIndex::Stage(k) => &mut fac.t_stages[k],
            GridIndex::Terminal => fac.t_stages.last_mut().unwrap(),
            GridIndex::Impulse(i) => &mut fac.t_impulse[i],
            GridIndex::Aux(i) => &mut fac.t_aux[i],
            GridIndex::Lift(l) => &mut fac.t_lift[l],
        }
    }
}
