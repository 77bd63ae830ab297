use nalgebra::Vector3;

use crate::impulse::impulse_split_kkt::{ImpulseSplitKktMatrix, ImpulseSplitKktResidual};
use crate::impulse::impulse_split_solution::ImpulseSplitSolution;
use crate::ocp::split_kkt_matrix::SplitKktMatrix;
use crate::ocp::split_kkt_residual::SplitKktResidual;
use crate::ocp::split_solution::SplitSolution;

/// Quadratic tracking cost on the contact forces. Only active contacts
/// contribute; the stacked rows follow the active-contact ordering of the
/// owning sub-interval.
#[derive(Debug, Clone)]
pub struct ContactForceCost {
    f_weight: Vec<Vector3<f64>>,
    f_ref: Vec<Vector3<f64>>,
}

impl ContactForceCost {
    pub fn new(max_point_contacts: usize) -> Self {
        Self {
            f_weight: vec![Vector3::zeros(); max_point_contacts],
            f_ref: vec![Vector3::zeros(); max_point_contacts],
        }
    }

    pub fn set_f_weight(&mut self, f_weight: Vec<Vector3<f64>>) {
        assert_eq!(f_weight.len(), self.f_weight.len());
        self.f_weight = f_weight;
    }

    pub fn set_f_ref(&mut self, f_ref: Vec<Vector3<f64>>) {
        assert_eq!(f_ref.len(), self.f_ref.len());
        self.f_ref = f_ref;
    }

    pub fn stage_cost(&self, _t: f64, dt: f64, s: &SplitSolution) -> f64 {
        let mut cost = 0.0;
        for i in 0..self.f_weight.len() {
            if s.is_contact_active(i) {
                let e = s.f[i] - self.f_ref[i];
                cost += 0.5 * e.component_mul(&self.f_weight[i]).dot(&e);
            }
        }
        dt * cost
    }

    pub fn stage_cost_derivatives(
        &self,
        _t: f64,
        dt: f64,
        s: &SplitSolution,
        kkt_residual: &mut SplitKktResidual,
    ) {
        let mut row = 0;
        for i in 0..self.f_weight.len() {
            if s.is_contact_active(i) {
                let g = dt * (s.f[i] - self.f_ref[i]).component_mul(&self.f_weight[i]);
                let mut lf = kkt_residual.lf_active_mut();
                let mut seg = lf.fixed_rows_mut::<3>(row);
                seg += g;
                row += 3;
            }
        }
    }

    pub fn stage_cost_hessian(
        &self,
        _t: f64,
        dt: f64,
        s: &SplitSolution,
        kkt_matrix: &mut SplitKktMatrix,
    ) {
        let mut row = 0;
        for i in 0..self.f_weight.len() {
            if s.is_contact_active(i) {
                for k in 0..3 {
                    kkt_matrix.qff[(row + k, row + k)] += dt * self.f_weight[i][k];
                }
                row += 3;
            }
        }
    }

    pub fn impulse_cost(
        &self,
        status: &crate::robot::contact_status::ImpulseStatus,
        _t: f64,
        s: &ImpulseSplitSolution,
    ) -> f64 {
        let mut cost = 0.0;
        for i in 0..self.f_weight.len() {
            if status.is_impulse_active(i) {
                let e = s.f[i] - self.f_ref[i];
                cost += 0.5 * e.component_mul(&self.f_weight[i]).dot(&e);
            }
        }
        cost
    }

    pub fn impulse_cost_derivatives(
        &self,
        status: &crate::robot::contact_status::ImpulseStatus,
        _t: f64,
        s: &ImpulseSplitSolution,
        kkt_residual: &mut ImpulseSplitKktResidual,
    ) {
        let mut row = 0;
        for i in 0..self.f_weight.len() {
            if status.is_impulse_active(i) {
                let g = (s.f[i] - self.f_ref[i]).component_mul(&self.f_weight[i]);
                let mut lf = kkt_residual.lf_active_mut();
                let mut seg = lf.fixed_rows_mut::<3>(row);
                seg += g;
                row += 3;
            }
        }
    }

    pub fn impulse_cost_hessian(
        &self,
        status: &crate::robot::contact_status::ImpulseStatus,
        _t: f64,
        _s: &ImpulseSplitSolution,
        kkt_matrix: &mut ImpulseSplitKktMatrix,
    ) {
        let mut row = 0;
        for i in 0..self.f_weight.len() {
            if status.is_impulse_active(i) {
                for k in 0..3 {
                    kkt_matrix.qff[(row + k, row + k)] += self.f_weight[i][k];
                }
                row += 3;
            }
        }
    }
}
