use nalgebra::{DVector, linalg::Cholesky};

use crate::error::SolverError;
use crate::hybrid::GridIndex;
use crate::hybrid::contact_sequence::ContactSequence;
use crate::impulse::impulse_split_direction::ImpulseSplitDirection;
use crate::ocp::KktMatrix;
use crate::ocp::KktResidual;
use crate::robot::RobotDims;

use super::RiccatiFactorization;
use super::state_constraint_factorization::StateConstraintFactorization;

/// Schur-complement solver for the impulse-time contact-position
/// constraints. The coupled system over the multipliers is block
/// lower-triangular in time, so it needs one Cholesky per event plus a short
/// back-substitution sweep; the event count is small, so this is negligible
/// next to the per-stage recursion.
pub struct StateConstraintRiccatiFactorizer {
    dimv: usize,
}

impl StateConstraintRiccatiFactorizer {
    pub fn new(dims: &RobotDims) -> Self {
        Self { dimv: dims.dimv }
    }

    /// Fill `E`, `e`, `E·N`, `E·N·Eᵀ` of every active impulse from the
    /// impulse-stage KKT blocks and the sensitivity factors at the impulse.
    pub fn factorize_linear_problems(
        &self,
        cs: &ContactSequence,
        kkt_matrix: &KktMatrix,
        kkt_residual: &KktResidual,
        riccati: &RiccatiFactorization,
        dx0: &DVector<f64>,
        factorization: &mut [StateConstraintFactorization],
    ) {
        let v = self.dimv;
        for i in 0..cs.total_num_impulse_stages() {
            let status = cs.impulse_status(i);
            let fac = &mut factorization[i];
            // the initial state is not a decision variable, so an impulse in
            // the first grid cell carries no position constraint
            let np = if cs.time_stage_before_impulse(i) == 0 { 0 } else { status.dimp() };
            fac.set_dimension(np);
            if np == 0 {
                continue;
            }
            fac.e_mat.fill(0.0);
            fac.e_mat
                .view_mut((0, 0), (np, v))
                .copy_from(&kkt_matrix.impulse[i].pq_active());
            let rcc = &riccati.impulse[i];
            // e = p + E·(Π·dx0 + π); E = [Pq 0] touches only the q-rows
            let dx_imp = &rcc.pi * dx0 + &rcc.pi_res;
            let e = kkt_residual.impulse[i].p_active().into_owned()
                + kkt_matrix.impulse[i].pq_active() * dx_imp.rows(0, v);
            fac.e_vec.rows_mut(0, np).copy_from(&e);
            let en = fac.e_active() * &rcc.n_mat;
            fac.en.view_mut((0, 0), (np, 2 * v)).copy_from(&en);
            let enet = fac.en_active() * fac.e_active().transpose();
            fac.enet.view_mut((0, 0), (np, np)).copy_from(&enet);
        }
    }

    /// Solve the coupled multiplier system backward in time and store the
    /// directions `ξᵢ`.
    pub fn compute_lagrange_multiplier_direction(
        &self,
        cs: &ContactSequence,
        factorization: &mut [StateConstraintFactorization],
        d_impulse: &mut [ImpulseSplitDirection],
    ) -> Result<(), SolverError> {
        let num_impulse = cs.total_num_impulse_stages();
        let mut chols: Vec<Option<Cholesky<f64, nalgebra::Dyn>>> = Vec::with_capacity(num_impulse);
        for (i, fac) in factorization.iter().enumerate().take(num_impulse) {
            if fac.dimp() == 0 {
                chols.push(None);
                continue;
            }
            let enet = fac.enet_active().into_owned();
            let chol = Cholesky::new(enet).ok_or(SolverError::NumericalFailure {
                stage: GridIndex::Impulse(i),
                what: "Cholesky of the state-constraint Schur complement failed",
            })?;
            chols.push(Some(chol));
        }
        for i in (0..num_impulse).rev() {
            let np_i = factorization[i].dimp();
            if np_i == 0 {
                let mut dxi = d_impulse[i].dxi_mut();
                dxi.fill(0.0);
                continue;
            }
            let mut rhs = factorization[i].e_vec.rows(0, np_i).into_owned();
            for j in (i + 1)..num_impulse {
                let np_j = factorization[j].dimp();
                if np_j == 0 {
                    continue;
                }
                // coupling through the sensitivity at impulse i of the later
                // multiplier j
                let t_ji = factorization[j].t_impulse[i].view((0, 0), (2 * self.dimv, np_j));
                let coupling = factorization[i].en_active() * (t_ji * d_impulse[j].dxi());
                rhs -= coupling;
            }
            let xi = chols[i].as_ref().unwrap().solve(&rhs);
            d_impulse[i].dxi_mut().copy_from(&xi);
        }
        Ok(())
    }

    /// `n(slot) = Σᵢ Tᵢ(slot)·ξᵢ` over the active impulses.
    pub fn aggregate_lagrange_multiplier_direction(
        &self,
        cs: &ContactSequence,
        factorization: &[StateConstraintFactorization],
        d_impulse: &[ImpulseSplitDirection],
        slot: GridIndex,
        n_vec: &mut DVector<f64>,
    ) {
        n_vec.fill(0.0);
        for i in 0..cs.total_num_impulse_stages() {
            let np = factorization[i].dimp();
            if np == 0 {
                continue;
            }
            let t = match slot {
                GridIndex::Stage(k) => &factorization[i].t_stages[k],
                GridIndex::Terminal => factorization[i].t_stages.last().unwrap(),
                GridIndex::Impulse(j) => &factorization[i].t_impulse[j],
                GridIndex::Aux(j) => &factorization[i].t_aux[j],
                GridIndex::Lift(l) => &factorization[i].t_lift[l],
            };
            *n_vec += t.view((0, 0), (2 * self.dimv, np)) * d_impulse[i].dxi();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    /// A single event reduces to `ξ = (ENEᵀ)⁻¹·e`.
    #[test]
    fn test_single_event_schur_solve_matches_dense_inverse() {
        let np = 3;
        let x = 6;
        let e_mat = DMatrix::<f64>::from_fn(np, x, |r, c| ((r * x + c) as f64 * 0.37).sin());
        let a = DMatrix::<f64>::from_fn(x, x, |r, c| ((r + 2 * c) as f64 * 0.11).cos());
        let n_mat = &a * a.transpose() + DMatrix::identity(x, x); // random SPD
        let e_vec = DVector::from_fn(np, |r, _| (r as f64 + 1.0) * 0.5);
        let enet = &e_mat * &n_mat * e_mat.transpose();
        let chol = Cholesky::new(enet.clone()).unwrap();
        let xi = chol.solve(&e_vec);
        let res = enet * &xi - &e_vec;
        assert!(res.norm() < 1e-10);
    }
}
