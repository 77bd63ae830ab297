use nalgebra::{DVector, DVectorView, DVectorViewMut, Vector3};

use crate::robot::contact_status::ImpulseStatus;
use crate::robot::{RobotDims, RobotModel};

use super::impulse_split_direction::ImpulseSplitDirection;

/// Primal-dual iterate at an impulse stage. The acceleration of the ordinary
/// stage is replaced by the velocity jump `dv`; there is no control input.
/// `xi` is the multiplier of the contact-position (impulse condition)
/// constraint, recovered by the Schur solve over the impulse events.
#[derive(Debug, Clone)]
pub struct ImpulseSplitSolution {
    pub lmd: DVector<f64>,
    pub gmm: DVector<f64>,
    pub q: DVector<f64>,
    pub v: DVector<f64>,
    pub dv: DVector<f64>,
    pub f: Vec<Vector3<f64>>,
    pub beta: DVector<f64>,
    pub mu: Vec<Vector3<f64>>,
    f_stack: DVector<f64>,
    mu_stack: DVector<f64>,
    xi_stack: DVector<f64>,
    is_impulse_active: Vec<bool>,
    dimp: usize,
}

impl ImpulseSplitSolution {
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
            dv: DVector::zeros(dims.dimv),
            f: vec![Vector3::zeros(); dims.max_point_contacts],
            beta: DVector::zeros(dims.dimv),
            mu: vec![Vector3::zeros(); dims.max_point_contacts],
            f_stack: DVector::zeros(dims.max_dimf()),
            mu_stack: DVector::zeros(dims.max_dimf()),
            xi_stack: DVector::zeros(dims.max_dimf()),
            is_impulse_active: vec![false; dims.max_point_contacts],
            dimp: 0,
        }
    }

    pub fn set_impulse_status(&mut self, status: &ImpulseStatus) {
        self.is_impulse_active.copy_from_slice(status.impulse_mask());
        self.dimp = status.dimp();
    }

    pub fn dimp(&self) -> usize {
        self.dimp
    }

    pub fn is_impulse_active(&self, contact_index: usize) -> bool {
        self.is_impulse_active[contact_index]
    }

    pub fn f_stack(&self) -> DVectorView<'_, f64> {
        self.f_stack.rows(0, self.dimp)
    }

    pub fn f_stack_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.f_stack.rows_mut(0, self.dimp)
    }

    pub fn mu_stack(&self) -> DVectorView<'_, f64> {
        self.mu_stack.rows(0, self.dimp)
    }

    pub fn xi_stack(&self) -> DVectorView<'_, f64> {
        self.xi_stack.rows(0, self.dimp)
    }

    pub fn xi_stack_mut(&mut self) -> DVectorViewMut<'_, f64> {
        self.xi_stack.rows_mut(0, self.dimp)
    }

    pub fn set_f_stack(&mut self) {
        let mut row = 0;
        for (i, &active) in self.is_impulse_active.iter().enumerate() {
            if active {
                self.f_stack.fixed_rows_mut::<3>(row).copy_from(&self.f[i]);
                row += 3;
            }
        }
    }

    pub fn set_f_vector(&mut self) {
        let mut row = 0;
        for (i, &active) in self.is_impulse_active.iter().enumerate() {
            if active {
                self.f[i].copy_from(&self.f_stack.fixed_rows::<3>(row));
                row += 3;
            }
        }
    }

    pub fn set_mu_stack(&mut self) {
        let mut row = 0;
        for (i, &active) in self.is_impulse_active.iter().enumerate() {
            if active {
                self.mu_stack.fixed_rows_mut::<3>(row).copy_from(&self.mu[i]);
                row += 3;
            }
        }
    }

    pub fn set_mu_vector(&mut self) {
        let mut row = 0;
        for (i, &active) in self.is_impulse_active.iter().enumerate() {
            if active {
                self.mu[i].copy_from(&self.mu_stack.fixed_rows::<3>(row));
                row += 3;
            }
        }
    }

    pub fn integrate<R: RobotModel>(&mut self, robot: &R, step: f64, d: &ImpulseSplitDirection) {
        debug_assert_eq!(self.dimp, d.dimp());
        let q0 = self.q.clone();
        robot.integrate_configuration(&q0, &d.dq().into_owned(), step, &mut self.q);
        self.v.axpy(step, &d.dv().into_owned(), 1.0);
        self.dv.axpy(step, &d.ddv().into_owned(), 1.0);
        self.lmd.axpy(step, &d.dlmd().into_owned(), 1.0);
        self.gmm.axpy(step, &d.dgmm().into_owned(), 1.0);
        self.beta.axpy(step, &d.dbeta().into_owned(), 1.0);
        let dimp = self.dimp;
        {
            let mut fs = self.f_stack.rows_mut(0, dimp);
            fs.axpy(step, &d.df().into_owned(), 1.0);
        }
        self.set_f_vector();
        {
            let mut ms = self.mu_stack.rows_mut(0, dimp);
            ms.axpy(step, &d.dmu().into_owned(), 1.0);
        }
        self.set_mu_vector();
        {
            let mut xs = self.xi_stack.rows_mut(0, dimp);
            xs.axpy(step, &d.dxi(), 1.0);
        }
    }
}
