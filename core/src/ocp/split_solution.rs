use nalgebra::{DVector, DVectorView, DVectorViewMut, Vector3};

use crate::robot::contact_status::ContactStatus;
use crate::robot::{RobotDims, RobotModel};

use super::split_direction::SplitDirection;

/// Primal-dual iterate at one ordinary sub-interval.
///
/// `lmd`/`gmm` are the costates of the configuration/velocity parts of the
/// state equation, `beta` the inverse-dynamics multiplier, `mu` the contact
/// multipliers, `nu_passive` the passive-torque multiplier. Per-contact
/// forces and multipliers live both as triples (`f`, `mu`) and as dense
/// stacks over the active contacts; `set_f_stack`/`set_f_vector` move
/// between the two.
#[derive(Debug, Clone)]
pub struct SplitSolution {
    pub lmd: DVector<f64>,
    pub gmm: DVector<f64>,
    pub q: DVector<f64>,
    pub v: DVector<f64>,
    pub a: DVector<f64>,
    pub f: Vec<Vector3<f64>>,
    pub u: DVector<f64>,
    pub u_passive: DVector<f64>,
    pub beta: DVector<f64>,
    pub mu: Vec<Vector3<f64>>,
    pub nu_passive: DVector<f64>,
    f_stack: DVector<f64>,
    mu_stack: DVector<f64>,
    is_contact_active: Vec<bool>,
    dimf: usize,
}

impl SplitSolution {
    pub fn new<R: RobotModel>(robot: &R) -> Self {
        let dims = robot.dims();
        let mut s = Self::zeros(dims);
        robot.normalize_configuration(&mut s.q);
        s
    }

    fn zeros(dims: &RobotDims) -> Self {
        Self {
            lmd: DVector::zeros(dims.dimv),
            gmm: DVector::zeros(dims.dimv),
            q: DVector::zeros(dims.dimq),
            v: DVector::zeros(dims.dimv),
            a: DVector::zeros(dims.dimv),
            f: vec![Vector3::zeros(); dims.max_point_contacts],
            u: DVector::zeros(dims.dimu()),
            u_passive: DVector::zeros(dims.dim_passive),
            beta: DVector::zeros(dims.dimv),
            mu: vec![Vector3::zeros(); dims.max_point_contacts],
            nu_passive: DVector::zeros(dims.dim_passive),
            f_stack: DVector::zeros(dims.max_dimf()),
            mu_stack: DVector::zeros(dims.max_dimf()),
            is_contact_active: vec![false; dims.max_point_contacts],
            dimf: 0,
        }
    }

    pub fn set_contact_status(&mut self, status: &ContactStatus) {
        self.is_contact_active.copy_from_slice(status.contact_mask());
        self.dimf = status.dimf();
    }

    pub fn dimf(&self) -> usize {
        self.dimf
    }

    pub fn is_contact_active(&self, contact_index: usize) -> bool {
        self.is_contact_active[contact_index]
    }

    pub fn f_stack(&self) -> DVectorView<'_, f64> {
        self.f_stack.rows(0, self.dimf)
    }

    pub fn f_stack_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.f_stack.rows_mut(0, self.dimf)
    }

    pub fn mu_stack(&self) -> DVectorView<'_, f64> {
        self.mu_stack.rows(0, self.dimf)
    }

    pub fn mu_stack_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.mu_stack.rows_mut(0, self.dimf)
    }

    /// Refresh the dense stacks from the per-contact triples.
    pub fn set_f_stack(&mut self) {
        let mut row = 0;
        for (i, &active) in self.is_contact_active.iter().enumerate() {
            if active {
                self.f_stack.fixed_rows_mut::<3>(row).copy_from(&self.f[i]);
                row += 3;
            }
        }
    }

    /// Scatter the dense stack back into the per-contact triples.
    pub fn set_f_vector(&mut self) {
        let mut row = 0;
        for (i, &active) in self.is_contact_active.iter().enumerate() {
            if active {
                self.f[i].copy_from(&self.f_stack.fixed_rows::<3>(row));
                row += 3;
            }
        }
    }

    pub fn set_mu_stack(&mut self) {
        let mut row = 0;
        for (i, &active) in self.is_contact_active.iter().enumerate() {
            if active {
                self.mu_stack.fixed_rows_mut::<3>(row).copy_from(&self.mu[i]);
                row += 3;
            }
        }
    }

    pub fn set_mu_vector(&mut self) {
        let mut row = 0;
        for (i, &active) in self.is_contact_active.iter().enumerate() {
            if active {
                self.mu[i].copy_from(&self.mu_stack.fixed_rows::<3>(row));
                row += 3;
            }
        }
    }

    /// `self ← self ⊕ step·d` over every primal and dual field. The
    /// configuration update goes through the robot's manifold integration.
    pub fn integrate<R: RobotModel>(&mut self, robot: &R, step: f64, d: &SplitDirection) {
        debug_assert_eq!(self.dimf, d.dimf());
        let q0 = self.q.clone();
        robot.integrate_configuration(&q0, &d.dq().into_owned(), step, &mut self.q);
        self.v.axpy(step, &d.dv().into_owned(), 1.0);
        self.a.axpy(step, &d.da().into_owned(), 1.0);
        self.u.axpy(step, &d.du, 1.0);
        self.u_passive.axpy(step, &d.du_passive, 1.0);
        self.lmd.axpy(step, &d.dlmd().into_owned(), 1.0);
        self.gmm.axpy(step, &d.dgmm().into_owned(), 1.0);
        self.beta.axpy(step, &d.dbeta().into_owned(), 1.0);
        self.nu_passive.axpy(step, &d.dnu_passive, 1.0);
        let dimf = self.dimf;
        {
            let mut fs = self.f_stack.rows_mut(0, dimf);
            fs.axpy(step, &d.df().into_owned(), 1.0);
        }
        self.set_f_vector();
        {
            let mut ms = self.mu_stack.rows_mut(0, dimf);
            ms.axpy(step, &d.dmu().into_owned(), 1.0);
        }
        self.set_mu_vector();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::test_harness::ChainModel;

    #[test]
    fn test_stack_width_tracks_contact_status() {
        let robot = ChainModel::new(4, 3);
        let mut s = SplitSolution::new(&robot);
        assert_eq!(s.f_stack().nrows(), 0);
        let mut cs = ContactStatus::new(3);
        cs.activate_contact(0);
        cs.activate_contact(2);
        s.set_contact_status(&cs);
        assert_eq!(s.dimf(), cs.dimf());
        assert_eq!(s.f_stack().nrows(), 6);
        assert_eq!(s.mu_stack().nrows(), 6);
        cs.deactivate_contact(0);
        s.set_contact_status(&cs);
        assert_eq!(s.f_stack().nrows(), 3);
    }

    #[test]
    fn test_stack_round_trip_covers_active_contacts_only() {
        let robot = ChainModel::new(4, 3);
        let mut s = SplitSolution::new(&robot);
        let mut cs = ContactStatus::new(3);
        cs.activate_contact(1);
        s.set_contact_status(&cs);
        s.f[0] = Vector3::new(9.0, 9.0, 9.0); // inactive, must not leak
        s.f[1] = Vector3::new(1.0, 2.0, 3.0);
        s.set_f_stack();
        assert_eq!(s.f_stack()[0], 1.0);
        assert_eq!(s.f_stack()[2], 3.0);
        s.f_stack_mut()[1] = -2.0;
        s.set_f_vector();
        assert_eq!(s.f[1][1], -2.0);
        assert_eq!(s.f[0][0], 9.0);
    }
}
