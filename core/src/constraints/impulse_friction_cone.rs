use nalgebra::Vector3;

use crate::impulse::impulse_split_direction::ImpulseSplitDirection;
use crate::impulse::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use crate::impulse::impulse_split_solution::ImpulseSplitSolution;

use super::ConstraintComponentData;
use super::friction_cone::{FACETS, facet_normals, facet_values};
use super::pdipm;

/// Friction cone on the impulse forces at touch-down; same pyramid as the
/// smooth cone, evaluated without a time-step weight.
#[derive(Debug, Clone)]
pub struct ImpulseFrictionCone {
    mu_f: f64,
    max_point_contacts: usize,
}

impl ImpulseFrictionCone {
    pub fn new(mu_f: f64, max_point_contacts: usize) -> Self {
        debug_assert!(mu_f > 0.0);
        Self { mu_f, max_point_contacts }
    }

    pub fn dimc(&self) -> usize {
        FACETS * self.max_point_contacts
    }

    fn b(&self) -> f64 {
        self.mu_f / 2.0f64.sqrt()
    }

    pub fn is_feasible(&self, s: &ImpulseSplitSolution) -> bool {
        let b = self.b();
        (0..self.max_point_contacts).all(|i| {
            !s.is_impulse_active(i) || facet_values(b, &s.f[i]).iter().all(|&g| g <= 0.0)
        })
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &ImpulseSplitSolution) {
        let b = self.b();
        for i in 0..self.max_point_contacts {
            if s.is_impulse_active(i) {
                let g = facet_values(b, &s.f[i]);
                for k in 0..FACETS {
                    data.slack[FACETS * i + k] = -g[k];
                }
            } else {
                for k in 0..FACETS {
                    data.slack[FACETS * i + k] = 1.0;
                }
            }
        }
    }

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &ImpulseSplitSolution) {
        let b = self.b();
        for i in 0..self.max_point_contacts {
            if s.is_impulse_active(i) {
                let g = facet_values(b, &s.f[i]);
                for k in 0..FACETS {
                    let r = FACETS * i + k;
                    data.residual[r] = g[k] + data.slack[r];
                }
            } else {
                for k in 0..FACETS {
                    data.residual[FACETS * i + k] = 0.0;
                }
            }
        }
    }

    pub fn augment_dual_residual(
        &self,
        data: &ConstraintComponentData,
        s: &ImpulseSplitSolution,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) {
        let normals = facet_normals(self.b());
        let mut rank = 0;
        for i in 0..self.max_point_contacts {
            if !s.is_impulse_active(i) {
                continue;
            }
            let mut g = Vector3::zeros();
            for k in 0..FACETS {
                g += data.dual[FACETS * i + k] * normals[k];
            }
            let mut lf = kkt_residual.lf_active_mut();
            let mut seg = lf.fixed_rows_mut::<3>(3 * rank);
            seg += g;
            rank += 1;
        }
    }

    pub fn condense(
        &self,
        data: &mut ConstraintComponentData,
        barrier: f64,
        s: &ImpulseSplitSolution,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) {
        let normals = facet_normals(self.b());
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut rank = 0;
        for i in 0..self.max_point_contacts {
            if !s.is_impulse_active(i) {
                continue;
            }
            let row0 = 3 * rank;
            let mut shift = Vector3::zeros();
            for k in 0..FACETS {
                let r = FACETS * i + k;
                let w = data.dual[r] / data.slack[r];
                let n = &normals[k];
                for c0 in 0..3 {
                    for c1 in 0..3 {
                        kkt_matrix.qff[(row0 + c0, row0 + c1)] += w * n[c0] * n[c1];
                    }
                }
                shift +=
                    ((data.dual[r] * data.residual[r] - data.duality[r]) / data.slack[r]) * n;
            }
            let mut lf = kkt_residual.lf_active_mut();
            let mut seg = lf.fixed_rows_mut::<3>(row0);
            seg += shift;
            rank += 1;
        }
    }

    pub fn expand(
        &self,
        data: &mut ConstraintComponentData,
        s: &ImpulseSplitSolution,
        d: &ImpulseSplitDirection,
    ) {
        let normals = facet_normals(self.b());
        let df = d.df();
        let mut rank = 0;
        for i in 0..self.max_point_contacts {
            if !s.is_impulse_active(i) {
                for k in 0..FACETS {
                    data.dslack[FACETS * i + k] = 0.0;
                }
                continue;
            }
            let dfi = Vector3::new(df[3 * rank], df[3 * rank + 1], df[3 * rank + 2]);
            for k in 0..FACETS {
                let r = FACETS * i + k;
                data.dslack[r] = -normals[k].dot(&dfi) - data.residual[r];
            }
            rank += 1;
        }
    }
}
