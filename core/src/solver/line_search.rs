use nalgebra::DVector;

use crate::constraints::Constraints;
use crate::cost::CostFunction;
use crate::hybrid::contact_sequence::ContactSequence;
use crate::ocp::{Direction, Solution};
use crate::robot::RobotModel;

use super::OcpStages;

/// Filter of `(cost, violation)` pairs: a trial point is accepted when no
/// stored pair dominates it, and accepted points evict the pairs they
/// dominate.
#[derive(Debug, Clone, Default)]
pub struct LineSearchFilter {
    entries: Vec<(f64, f64)>,
}

impl LineSearchFilter {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_accepted(&self, cost: f64, violation: f64) -> bool {
        self.entries
            .iter()
            .all(|&(c, v)| cost < c || violation < v)
    }

    pub fn augment(&mut self, cost: f64, violation: f64) {
        self.entries.retain(|&(c, v)| c < cost || v < violation);
        self.entries.push((cost, violation));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// ℓ1-merit filter line search over the hybrid horizon. Owns one trial
/// solution buffer; each candidate step integrates the current iterate into
/// it and evaluates total cost (with the trial slack barrier) and total
/// constraint violation.
pub struct LineSearch {
    filter: LineSearchFilter,
    s_trial: Solution,
    reduction_rate: f64,
    min_step: f64,
}

impl LineSearch {
    pub fn new<R: RobotModel>(
        robot: &R,
        n: usize,
        max_num_impulse: usize,
        reduction_rate: f64,
        min_step: f64,
    ) -> Self {
        Self {
            filter: LineSearchFilter::new(),
            s_trial: Solution::new(robot, n, max_num_impulse),
            reduction_rate,
            min_step,
        }
    }

    pub fn clear_filter(&mut self) {
        self.filter.clear();
    }

    /// Largest accepted step below `max_step`, or `None` when the search
    /// starves (the caller leaves the iterate unchanged).
    #[allow(clippy::too_many_arguments)]
    pub fn compute_step_size<R: RobotModel>(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        cs: &ContactSequence,
        t: f64,
        s: &Solution,
        d: &Direction,
        stages: &mut OcpStages<R>,
        max_step: f64,
    ) -> Option<f64> {
        debug_assert!(max_step > 0.0 && max_step <= 1.0);
        if self.filter.is_empty() {
            let (c, v) = self.eval_trial(robot, cost, constraints, cs, t, s, d, stages, 0.0);
            self.filter.augment(c, v);
        }
        let mut step = max_step;
        while step >= self.min_step {
            let (c, v) = self.eval_trial(robot, cost, constraints, cs, t, s, d, stages, step);
            if self.filter.is_accepted(c, v) {
                self.filter.augment(c, v);
                return Some(step);
            }
            step *= self.reduction_rate;
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_trial<R: RobotModel>(
        &mut self,
        robot: &R,
        cost: &CostFunction,
        constraints: &Constraints,
        cs: &ContactSequence,
        t: f64,
        s: &Solution,
        d: &Direction,
        stages: &mut OcpStages<R>,
        step: f64,
    ) -> (f64, f64) {
        let n = cs.num_grid_stages();
        let num_impulse = cs.total_num_impulse_stages();
        let num_lift = cs.total_num_lift_stages();
        for k in 0..=n {
            self.s_trial.stages[k].clone_from(&s.stages[k]);
            if step > 0.0 {
                self.s_trial.stages[k].integrate(robot, step, &d.stages[k]);
            }
        }
        for i in 0..num_impulse {
            self.s_trial.impulse[i].clone_from(&s.impulse[i]);
            self.s_trial.aux[i].clone_from(&s.aux[i]);
            if step > 0.0 {
                self.s_trial.impulse[i].integrate(robot, step, &d.impulse[i]);
                self.s_trial.aux[i].integrate(robot, step, &d.aux[i]);
            }
        }
        for l in 0..num_lift {
            self.s_trial.lift[l].clone_from(&s.lift[l]);
            if step > 0.0 {
                self.s_trial.lift[l].integrate(robot, step, &d.lift[l]);
            }
        }
        let mut total_cost = 0.0;
        let mut total_violation = 0.0;
        for k in 0..n {
            let (q_next, v_next) = self.next_state_of_stage(cs, k);
            let (c, v) = stages.stages[k].eval_cost_and_violation(
                robot,
                cost,
                constraints,
                cs.contact_status(k),
                t + cs.stage_time(k),
                cs.dtau(k),
                &self.s_trial.stages[k],
                Some((q_next, v_next)),
                step,
            );
            total_cost += c;
            total_violation += v;
        }
        for i in 0..num_impulse {
            let (c, v) = stages.impulse[i].eval_cost_and_violation(
                robot,
                cost,
                constraints,
                cs.impulse_status(i),
                t + cs.impulse_time(i),
                &self.s_trial.impulse[i],
                Some((&self.s_trial.aux[i].q, &self.s_trial.aux[i].v)),
                step,
            );
            total_cost += c;
            total_violation += v;
            let k_next = cs.time_stage_after_impulse(i);
            let nxt = &self.s_trial.stages[k_next];
            let (c, v) = stages.aux[i].eval_cost_and_violation(
                robot,
                cost,
                constraints,
                cs.contact_status_after_impulse(i),
                t + cs.impulse_time(i),
                cs.dtau_impulse(i),
                &self.s_trial.aux[i],
                Some((&nxt.q, &nxt.v)),
                step,
            );
            total_cost += c;
            total_violation += v;
        }
        for l in 0..num_lift {
            let k_next = cs.time_stage_after_lift(l);
            let nxt = &self.s_trial.stages[k_next];
            let (c, v) = stages.lift[l].eval_cost_and_violation(
                robot,
                cost,
                constraints,
                cs.contact_status_after_lift(l),
                t + cs.lift_time(l),
                cs.dtau_lift(l),
                &self.s_trial.lift[l],
                Some((&nxt.q, &nxt.v)),
                step,
            );
            total_cost += c;
            total_violation += v;
        }
        total_cost += stages
            .terminal
            .eval_cost(robot, cost, t + cs.horizon(), &self.s_trial.stages[n]);
        (total_cost, total_violation)
    }

    fn next_state_of_stage<'a>(
        &'a self,
        cs: &ContactSequence,
        k: usize,
    ) -> (&'a DVector<f64>, &'a DVector<f64>) {
        if let Some(i) = cs.impulse_index_after_stage(k) {
            (&self.s_trial.impulse[i].q, &self.s_trial.impulse[i].v)
        } else if let Some(l) = cs.lift_index_after_stage(k) {
            (&self.s_trial.lift[l].q, &self.s_trial.lift[l].v)
        } else {
            (&self.s_trial.stages[k + 1].q, &self.s_trial.stages[k + 1].v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_improvements_and_rejects_dominated() {
        let mut filter = LineSearchFilter::new();
        filter.augment(1.0, 1.0);
        assert!(filter.is_accepted(0.5, 2.0)); // better cost
        assert!(filter.is_accepted(2.0, 0.5)); // better violation
        assert!(!filter.is_accepted(1.5, 1.5)); // dominated
        assert!(!filter.is_accepted(1.0, 1.0)); // equal is dominated
        filter.augment(0.5, 0.8);
        assert!(!filter.is_accepted(0.9, 0.9));
    }

    #[test]
    fn test_augment_evicts_dominated_entries() {
        let mut filter = LineSearchFilter::new();
        filter.augment(1.0, 1.0);
        filter.augment(0.5, 0.5); // dominates the first entry
        assert!(filter.is_accepted(0.9, 0.9));
    }
}
