use nalgebra::{DMatrix, DVector};

use crate::impulse::impulse_split_direction::ImpulseSplitDirection;
use crate::impulse::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use crate::robot::RobotDims;

use super::split_riccati_factorization::SplitRiccatiFactorization;

/// Backward/forward Riccati step across an impulse stage. The transition is
/// `A = [Fqq, 0; Fvq, Fvv]` with no input, so there is no gain computation
/// and the cost-to-go folds straight through the jump.
pub struct ImpulseRiccatiFactorizer {
    has_floating_base: bool,
    dimv: usize,
    at_pqq: DMatrix<f64>,
    at_pqv: DMatrix<f64>,
    at_pvq: DMatrix<f64>,
    at_pvv: DMatrix<f64>,
}

impl ImpulseRiccatiFactorizer {
    pub fn new(dims: &RobotDims) -> Self {
        let v = dims.dimv;
        Self {
            has_floating_base: dims.has_floating_base,
            dimv: v,
            at_pqq: DMatrix::zeros(v, v),
            at_pqv: DMatrix::zeros(v, v),
            at_pvq: DMatrix::zeros(v, v),
            at_pvv: DMatrix::zeros(v, v),
        }
    }

    pub fn backward_riccati_recursion(
        &mut self,
        riccati_next: &SplitRiccatiFactorization,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
        kkt_residual: &mut ImpulseSplitKktResidual,
        riccati: &mut SplitRiccatiFactorization,
    ) {
        let v = self.dimv;
        let rn = riccati_next;
        if self.has_floating_base {
            self.at_pqq.copy_from(&(kkt_matrix.fqq.transpose() * &rn.pqq));
            self.at_pqq += kkt_matrix.fvq.transpose() * &rn.pvq;
            self.at_pqv.copy_from(&(kkt_matrix.fqq.transpose() * &rn.pqv));
            self.at_pqv += kkt_matrix.fvq.transpose() * &rn.pvv;
        } else {
            self.at_pqq.copy_from(&rn.pqq);
            self.at_pqq += kkt_matrix.fvq.transpose() * &rn.pvq;
            self.at_pqv.copy_from(&rn.pqv);
            self.at_pqv += kkt_matrix.fvq.transpose() * &rn.pvv;
        }
        self.at_pvq.copy_from(&(kkt_matrix.fvv.transpose() * &rn.pvq));
        self.at_pvv.copy_from(&(kkt_matrix.fvv.transpose() * &rn.pvv));
        let qqq_add = if self.has_floating_base {
            &self.at_pqq * &kkt_matrix.fqq + &self.at_pqv * &kkt_matrix.fvq
        } else {
            &self.at_pqq + &self.at_pqv * &kkt_matrix.fvq
        };
        let qqv_add = &self.at_pqv * &kkt_matrix.fvv;
        let qvv_add = &self.at_pvv * &kkt_matrix.fvv;
        {
            let mut qqq = kkt_matrix.qxx.view_mut((0, 0), (v, v));
            qqq += qqq_add;
        }
        {
            let mut qqv = kkt_matrix.qxx.view_mut((0, v), (v, v));
            qqv += qqv_add;
        }
        {
            let qqv = kkt_matrix.qxx.view((0, v), (v, v)).into_owned();
            let mut qvq = kkt_matrix.qxx.view_mut((v, 0), (v, v));
            qvq.copy_from(&qqv.transpose());
        }
        {
            let mut qvv = kkt_matrix.qxx.view_mut((v, v), (v, v));
            qvv += qvv_add;
        }
        riccati.pqq.copy_from(&kkt_matrix.qxx.view((0, 0), (v, v)));
        riccati.pqv.copy_from(&kkt_matrix.qxx.view((0, v), (v, v)));
        riccati.pvv.copy_from(&kkt_matrix.qxx.view((v, v), (v, v)));
        riccati.pvq.copy_from(&riccati.pqv.transpose());
        let sym_q = 0.5 * (&riccati.pqq + riccati.pqq.transpose());
        riccati.pqq.copy_from(&sym_q);
        let sym_v = 0.5 * (&riccati.pvv + riccati.pvv.transpose());
        riccati.pvv.copy_from(&sym_v);
        if self.has_floating_base {
            riccati.sq.copy_from(&(kkt_matrix.fqq.transpose() * &rn.sq));
            riccati.sq += kkt_matrix.fvq.transpose() * &rn.sv;
        } else {
            riccati.sq.copy_from(&rn.sq);
            riccati.sq += kkt_matrix.fvq.transpose() * &rn.sv;
        }
        riccati.sv.copy_from(&(kkt_matrix.fvv.transpose() * &rn.sv));
        let fq = kkt_residual.fx.rows(0, v).into_owned();
        let fv = kkt_residual.fx.rows(v, v).into_owned();
        riccati.sq -= &self.at_pqq * &fq;
        riccati.sq -= &self.at_pqv * &fv;
        riccati.sv -= &self.at_pvq * &fq;
        riccati.sv -= &self.at_pvv * &fv;
        riccati.sq -= kkt_residual.lx.rows(0, v).into_owned();
        riccati.sv -= kkt_residual.lx.rows(v, v).into_owned();
        // no input: the closed-loop factors are the raw transition
        riccati.ap_bk.fill(0.0);
        if self.has_floating_base {
            riccati.ap_bk.view_mut((0, 0), (v, v)).copy_from(&kkt_matrix.fqq);
        } else {
            let mut tl = riccati.ap_bk.view_mut((0, 0), (v, v));
            tl.fill_diagonal(1.0);
        }
        riccati.ap_bk.view_mut((v, 0), (v, v)).copy_from(&kkt_matrix.fvq);
        riccati.ap_bk.view_mut((v, v), (v, v)).copy_from(&kkt_matrix.fvv);
        riccati.bginv_bt.fill(0.0);
        riccati.ap_bk_res.copy_from(&kkt_residual.fx);
        riccati.k_gain.fill(0.0);
        riccati.k_ff.fill(0.0);
        riccati.ginv_bt.fill(0.0);
    }

    /// Serial forward step across the jump.
    pub fn forward_riccati_recursion(
        &self,
        kkt_matrix: &ImpulseSplitKktMatrix,
        kkt_residual: &ImpulseSplitKktResidual,
        d: &ImpulseSplitDirection,
        dx_next: &mut DVector<f64>,
    ) {
        let v = self.dimv;
        let dq = d.dq().into_owned();
        let dv = d.dv().into_owned();
        let dq_next = if self.has_floating_base {
            &kkt_matrix.fqq * &dq + kkt_residual.fx.rows(0, v)
        } else {
            &dq + kkt_residual.fx.rows(0, v)
        };
        let dv_next = &kkt_matrix.fvq * &dq + &kkt_matrix.fvv * &dv + kkt_residual.fx.rows(v, v);
        dx_next.rows_mut(0, v).copy_from(&dq_next);
        dx_next.rows_mut(v, v).copy_from(&dv_next);
    }

    /// Costate direction at the impulse stage.
    pub fn compute_costate_direction(
        riccati: &SplitRiccatiFactorization,
        d: &mut ImpulseSplitDirection,
    ) {
        let dq = d.dq().into_owned();
        let dv = d.dv().into_owned();
        let v = dq.len();
        let dlmd =
            &riccati.pqq * &dq + &riccati.pqv * &dv - &riccati.sq + riccati.n_vec.rows(0, v);
        let dgmm =
            &riccati.pvq * &dq + &riccati.pvv * &dv - &riccati.sv + riccati.n_vec.rows(v, v);
        d.dlmd_mut().copy_from(&dlmd);
        d.dgmm_mut().copy_from(&dgmm);
    }
}
