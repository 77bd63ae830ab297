use nalgebra::DVector;

use super::ConstraintComponentData;

/// Primal-dual interior-point primitives shared by every inequality
/// component. Inequalities are kept in the form `g(s) ≤ 0` with slack
/// `s_slack = -g(s) > 0` and dual `z > 0`.

/// Clamp freshly set slacks away from zero and seed the duals from the
/// barrier parameter, so both start strictly positive.
pub fn set_slack_and_dual_positive(data: &mut ConstraintComponentData, barrier: f64) {
    let floor = barrier.sqrt();
    for i in 0..data.slack.len() {
        if data.slack[i] < floor {
            data.slack[i] = floor;
        }
        data.dual[i] = barrier / data.slack[i];
    }
}

/// `duality = slack ∘ dual − barrier·1`.
pub fn compute_duality(data: &mut ConstraintComponentData, barrier: f64) {
    for i in 0..data.slack.len() {
        data.duality[i] = data.slack[i] * data.dual[i] - barrier;
    }
}

/// `ddual = −(dual ∘ dslack + duality) / slack`, elementwise.
pub fn compute_dual_direction(data: &mut ConstraintComponentData) {
    for i in 0..data.slack.len() {
        data.ddual[i] = -(data.dual[i] * data.dslack[i] + data.duality[i]) / data.slack[i];
    }
}

/// Largest `α ∈ (0, 1]` with `v + α·dv ≥ (1 − rate)·v`, elementwise.
pub fn fraction_to_boundary(rate: f64, v: &DVector<f64>, dv: &DVector<f64>) -> f64 {
    debug_assert!(rate > 0.0 && rate <= 1.0);
    let mut step = 1.0f64;
    for i in 0..v.len() {
        if dv[i] < 0.0 {
            let cap = -rate * v[i] / dv[i];
            if cap < step {
                step = cap;
            }
        }
    }
    step
}

/// Barrier cost `−barrier · Σ log(slack)`.
pub fn cost_barrier(data: &ConstraintComponentData, barrier: f64) -> f64 {
    -barrier * data.slack.iter().map(|s| s.ln()).sum::<f64>()
}

/// Barrier cost of the trial slack `slack + step·dslack`.
pub fn cost_barrier_trial(data: &ConstraintComponentData, barrier: f64, step: f64) -> f64 {
    -barrier
        * data
            .slack
            .iter()
            .zip(data.dslack.iter())
            .map(|(s, ds)| (s + step * ds).ln())
            .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slack_and_dual_are_strictly_positive() {
        let mut data = ConstraintComponentData::new(4);
        data.slack.copy_from_slice(&[0.5, -1.0, 1e-12, 2.0]);
        set_slack_and_dual_positive(&mut data, 1e-4);
        assert!(data.slack.iter().all(|&s| s > 0.0));
        assert!(data.dual.iter().all(|&z| z > 0.0));
    }

    #[test]
    fn test_fraction_to_boundary_keeps_interior() {
        let v = DVector::from_vec(vec![1.0, 2.0, 0.5]);
        let dv = DVector::from_vec(vec![-2.0, 0.3, -0.4]);
        let rate = 0.995;
        let step = fraction_to_boundary(rate, &v, &dv);
        assert!(step > 0.0 && step <= 1.0);
        for i in 0..3 {
            assert!(v[i] + step * dv[i] >= (1.0 - rate) * v[i] - 1e-12);
        }
        // binding coordinate sits exactly on the boundary
        assert!((v[0] + step * dv[0] - (1.0 - rate) * v[0]).abs() < 1e-12);
    }

    #[test]
    fn test_duality_vanishes_after_init() {
        let mut data = ConstraintComponentData::new(3);
        data.slack.copy_from_slice(&[0.7, 1.3, 0.2]);
        set_slack_and_dual_positive(&mut data, 1e-4);
        compute_duality(&mut data, 1e-4);
        assert!(data.duality.norm() < 1e-14);
    }
}
