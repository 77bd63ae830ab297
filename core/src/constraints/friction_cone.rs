use nalgebra::Vector3;

use crate::ocp::split_direction::SplitDirection;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;

use super::ConstraintComponentData;
use super::pdipm;

/// 5-facet pyramidal friction cone on each active contact force:
/// `fz ≥ 0`, `|fx| ≤ (μ_f/√2)·fz`, `|fy| ≤ (μ_f/√2)·fz`.
///
/// Rows are laid out 5 per contact *index* (not per active rank), so the
/// slack/dual data keeps its meaning when the activation mask changes;
/// inactive contacts hold the neutral `(slack, dual) = (1, barrier)` pair and
/// contribute nothing.
#[derive(Debug, Clone)]
pub struct FrictionCone {
    mu_f: f64,
    max_point_contacts: usize,
}

pub(crate) const FACETS: usize = 5;

/// Gradient rows of the cone facets w.r.t. one contact force.
pub(crate) fn facet_normals(b: f64) -> [Vector3<f64>; FACETS] {
    [
        Vector3::new(0.0, 0.0, -1.0),
        Vector3::new(1.0, 0.0, -b),
        Vector3::new(-1.0, 0.0, -b),
        Vector3::new(0.0, 1.0, -b),
        Vector3::new(0.0, -1.0, -b),
    ]
}

pub(crate) fn facet_values(b: f64, f: &Vector3<f64>) -> [f64; FACETS] {
    [
        -f[2],
        f[0] - b * f[2],
        -f[0] - b * f[2],
        f[1] - b * f[2],
        -f[1] - b * f[2],
    ]
}

impl FrictionCone {
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

    pub fn is_feasible(&self, s: &SplitSolution) -> bool {
        let b = self.b();
        (0..self.max_point_contacts).all(|i| {
            !s.is_contact_active(i) || facet_values(b, &s.f[i]).iter().all(|&g| g <= 0.0)
        })
    }

    pub fn set_slack(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        let b = self.b();
        for i in 0..self.max_point_contacts {
            if s.is_contact_active(i) {
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

    pub fn eval_constraint(&self, data: &mut ConstraintComponentData, s: &SplitSolution) {
        let b = self.b();
        for i in 0..self.max_point_contacts {
            if s.is_contact_active(i) {
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
        dt: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let normals = facet_normals(self.b());
        let mut rank = 0;
        for i in 0..self.max_point_contacts {
            if !s.is_contact_active(i) {
                continue;
            }
            let mut g = Vector3::zeros();
            for k in 0..FACETS {
                g += data.dual[FACETS * i + k] * normals[k];
            }
            let mut lf = kkt_residual.lf_active_mut();
            let mut seg = lf.fixed_rows_mut::<3>(3 * rank);
            seg += dt * g;
            rank += 1;
        }
    }

    pub fn condense(
        &self,
        data: &mut ConstraintComponentData,
        barrier: f64,
        dt: f64,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let normals = facet_normals(self.b());
        self.eval_constraint(data, s);
        pdipm::compute_duality(data, barrier);
        let mut rank = 0;
        for i in 0..self.max_point_contacts {
            if !s.is_contact_active(i) {
                continue;
            }
            let row0 = 3 * rank;
            let mut shift = Vector3::zeros();
            for k in 0..FACETS {
                let r = FACETS * i + k;
                let w = dt * data.dual[r] / data.slack[r];
                let n = &normals[k];
                for c0 in 0..3 {
                    for c1 in 0..3 {
                        kkt_matrix.qff[(row0 + c0, row0 + c1)] += w * n[c0] * n[c1];
                    }
                }
                shift += (dt * (data.dual[r] * data.residual[r] - data.duality[r])
                    / data.slack[r])
                    * n;
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
        s: &SplitSolution,
        d: &SplitDirection,
    ) {
        let normals = facet_normals(self.b());
        let df = d.df();
        let mut rank = 0;
        for i in 0..self.max_point_contacts {
            if !s.is_contact_active(i) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::contact_status::ContactStatus;
    use crate::robot::test_harness::ChainModel;

    #[test]
    fn test_interior_force_is_feasible() {
        let robot = ChainModel::new(3, 2);
        let cone = FrictionCone::new(0.7, 2);
        let mut s = SplitSolution::new(&robot);
        let mut cs = ContactStatus::new(2);
        cs.activate_contact(0);
        s.set_contact_status(&cs);
        s.f[0] = Vector3::new(0.1, -0.1, 10.0);
        assert!(cone.is_feasible(&s));
        s.f[0] = Vector3::new(10.0, 0.0, 1.0);
        assert!(!cone.is_feasible(&s));
        // negative normal force is outside the cone
        s.f[0] = Vector3::new(0.0, 0.0, -1.0);
        assert!(!cone.is_feasible(&s));
    }

    #[test]
    fn test_slack_matches_facet_margins() {
        let robot = ChainModel::new(3, 2);
        let cone = FrictionCone::new(0.7, 2);
        let mut s = SplitSolution::new(&robot);
        let mut cs = ContactStatus::new(2);
        cs.activate_contact(1);
        s.set_contact_status(&cs);
        s.f[1] = Vector3::new(0.0, 0.0, 4.0);
        let mut data = ConstraintComponentData::new(cone.dimc());
        cone.set_slack(&mut data, &s);
        assert!((data.slack[0] - 1.0).abs() < 1e-12); // inactive contact 0
        assert!((data.slack[FACETS] - 4.0).abs() < 1e-12);
        let b = 0.7 / 2.0f64.sqrt();
        assert!((data.slack[FACETS + 1] - b * 4.0).abs() < 1e-12);
    }
}
