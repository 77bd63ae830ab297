use crate::error::SolverError;
use crate::robot::contact_status::{ContactStatus, ImpulseStatus};

use super::discrete_event::{DiscreteEvent, DiscreteEventKind};

/// Schedule of contact-status changes over the horizon, and the event-aware
/// partition of the time grid they induce.
///
/// The horizon `[0, T]` is split into `N` cells of nominal width `h = T/N`.
/// An event at time `τ` with `k·h < τ ≤ (k+1)·h` splits cell `k` into a
/// "before" piece of length `τ − k·h` (the ordinary stage `k`) and an "after"
/// piece of length `(k+1)·h − τ` (the aux stage of an impulse, or the lift
/// stage). At most one event may live in a cell.
#[derive(Debug, Clone)]
pub struct ContactSequence {
    horizon: f64,
    n_stages: usize,
    cell_width: f64,
    max_num_events: usize,
    default_status: ContactStatus,
    events: Vec<DiscreteEvent>,
    // Rebuilt after every mutation.
    impulse_events: Vec<usize>,
    lift_events: Vec<usize>,
    impulse_statuses: Vec<ImpulseStatus>,
}

impl ContactSequence {
    pub fn new(
        horizon: f64,
        n_stages: usize,
        max_num_events: usize,
        default_status: ContactStatus,
    ) -> Result<Self, SolverError> {
        if !(horizon > 0.0) {
            return Err(SolverError::config("T must be positive"));
        }
        if n_stages == 0 {
            return Err(SolverError::config("N must be positive"));
        }
        Ok(Self {
            horizon,
            n_stages,
            cell_width: horizon / n_stages as f64,
            max_num_events,
            default_status,
            events: Vec::with_capacity(2 * max_num_events),
            impulse_events: Vec::with_capacity(max_num_events),
            lift_events: Vec::with_capacity(max_num_events),
            impulse_statuses: Vec::with_capacity(max_num_events),
        })
    }

    pub fn horizon(&self) -> f64 {
        self.horizon
    }

    pub fn num_grid_stages(&self) -> usize {
        self.n_stages
    }

    pub fn max_num_events(&self) -> usize {
        self.max_num_events
    }

    /// Grid cell containing time `t`, i.e. the `k` with `k·h < t ≤ (k+1)·h`.
    fn cell_of(&self, t: f64) -> usize {
        ((t / self.cell_width).ceil() as usize).saturating_sub(1)
    }

    // --- mutation -----------------------------------------------------------

    /// Install `status` over the whole horizon and drop all events.
    pub fn set_contact_status_uniformly(&mut self, status: ContactStatus) {
        self.default_status = status;
        self.events.clear();
        self.rebuild_index();
    }

    /// Insert a discrete event. The event's cell must be free, its time inside
    /// `(0, T]`, and its pre-status consistent with the schedule before it.
    pub fn set_discrete_event(&mut self, event: DiscreteEvent) -> Result<(), SolverError> {
        self.validate_time(event.time())?;
        let cell = self.cell_of(event.time());
        if self.events.iter().any(|e| self.cell_of(e.time()) == cell) {
            return Err(SolverError::config(format!(
                "two discrete events fall into grid cell {cell}"
            )));
        }
        match event.kind() {
            DiscreteEventKind::Impulse => {
                if self.impulse_events.len() >= self.max_num_events {
                    return Err(SolverError::config("max_num_impulse exceeded"));
                }
            }
            DiscreteEventKind::Lift => {
                if self.lift_events.len() >= self.max_num_events {
                    return Err(SolverError::config("max number of lift events exceeded"));
                }
            }
        }
        let pos = self
            .events
            .iter()
            .position(|e| e.time() > event.time())
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
        if let Err(e) = self.validate_chain() {
            self.events.remove(pos);
            return Err(e);
        }
        self.rebuild_index();
        Ok(())
    }

    /// Move impulse `impulse_index` to `time`. Moving it into another event's
    /// cell, or past a neighboring event, is rejected.
    pub fn shift_impulse(&mut self, impulse_index: usize, time: f64) -> Result<(), SolverError> {
        let idx = self.impulse_events[impulse_index];
        self.shift_event(idx, time)
    }

    /// Move lift `lift_index` to `time`, with the same restrictions.
    pub fn shift_lift(&mut self, lift_index: usize, time: f64) -> Result<(), SolverError> {
        let idx = self.lift_events[lift_index];
        self.shift_event(idx, time)
    }

    fn shift_event(&mut self, idx: usize, time: f64) -> Result<(), SolverError> {
        self.validate_time(time)?;
        let cell = self.cell_of(time);
        for (j, e) in self.events.iter().enumerate() {
            if j != idx && self.cell_of(e.time()) == cell {
                return Err(SolverError::config(format!(
                    "shifted event would share grid cell {cell} with another event"
                )));
            }
        }
        if idx > 0 && self.cell_of(self.events[idx - 1].time()) >= cell {
            return Err(SolverError::config(
                "shifted event would cross the preceding event",
            ));
        }
        if idx + 1 < self.events.len() && self.cell_of(self.events[idx + 1].time()) <= cell {
            return Err(SolverError::config(
                "shifted event would cross the following event",
            ));
        }
        self.events[idx].set_time(time);
        self.rebuild_index();
        Ok(())
    }

    /// Update the contact points of every status in the schedule.
    pub fn set_contact_points(&mut self, points: &[nalgebra::Vector3<f64>]) {
        self.default_status.set_contact_points(points);
        for e in &mut self.events {
            e.pre_status_mut().set_contact_points(points);
            e.post_status_mut().set_contact_points(points);
        }
        self.rebuild_index();
    }

    fn validate_time(&self, t: f64) -> Result<(), SolverError> {
        if !t.is_finite() || t <= 0.0 || t > self.horizon {
            return Err(SolverError::config(format!(
                "event time {t} outside the horizon (0, {}]",
                self.horizon
            )));
        }
        Ok(())
    }

    fn validate_chain(&self) -> Result<(), SolverError> {
        let mut status = &self.default_status;
        for e in &self.events {
            if !e.pre_status().same_activity(status) {
                return Err(SolverError::config(
                    "event pre-status does not match the schedule before it",
                ));
            }
            status = e.post_status();
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.impulse_events.clear();
        self.lift_events.clear();
        self.impulse_statuses.clear();
        for (i, e) in self.events.iter().enumerate() {
            match e.kind() {
                DiscreteEventKind::Impulse => {
                    self.impulse_events.push(i);
                    self.impulse_statuses.push(e.impulse_status());
                }
                DiscreteEventKind::Lift => self.lift_events.push(i),
            }
        }
    }

    // --- queries ------------------------------------------------------------

    pub fn total_num_impulse_stages(&self) -> usize {
        self.impulse_events.len()
    }

    pub fn total_num_lift_stages(&self) -> usize {
        self.lift_events.len()
    }

    /// Contact status prevailing at ordinary stage `k` (`0..=N`).
    pub fn contact_status(&self, stage: usize) -> &ContactStatus {
        assert!(stage <= self.n_stages, "stage {stage} out of range");
        let mut status = &self.default_status;
        for e in &self.events {
            if self.cell_of(e.time()) < stage {
                status = e.post_status();
            } else {
                break;
            }
        }
        status
    }

    pub fn impulse_status(&self, impulse_index: usize) -> &ImpulseStatus {
        assert!(
            impulse_index < self.impulse_statuses.len(),
            "impulse index {impulse_index} out of range"
        );
        &self.impulse_statuses[impulse_index]
    }

    /// Contact status on the aux piece after impulse `impulse_index`.
    pub fn contact_status_after_impulse(&self, impulse_index: usize) -> &ContactStatus {
        self.events[self.impulse_events[impulse_index]].post_status()
    }

    /// Contact status on the lift piece after lift `lift_index`.
    pub fn contact_status_after_lift(&self, lift_index: usize) -> &ContactStatus {
        self.events[self.lift_events[lift_index]].post_status()
    }

    pub fn impulse_time(&self, impulse_index: usize) -> f64 {
        self.events[self.impulse_events[impulse_index]].time()
    }

    pub fn lift_time(&self, lift_index: usize) -> f64 {
        self.events[self.lift_events[lift_index]].time()
    }

    pub fn time_stage_before_impulse(&self, impulse_index: usize) -> usize {
        self.cell_of(self.impulse_time(impulse_index))
    }

    pub fn time_stage_after_impulse(&self, impulse_index: usize) -> usize {
        self.time_stage_before_impulse(impulse_index) + 1
    }

    pub fn time_stage_before_lift(&self, lift_index: usize) -> usize {
        self.cell_of(self.lift_time(lift_index))
    }

    pub fn time_stage_after_lift(&self, lift_index: usize) -> usize {
        self.time_stage_before_lift(lift_index) + 1
    }

    /// Impulse scheduled inside cell `stage`, if any.
    pub fn impulse_index_after_stage(&self, stage: usize) -> Option<usize> {
        (0..self.impulse_events.len()).find(|&i| self.time_stage_before_impulse(i) == stage)
    }

    /// Lift scheduled inside cell `stage`, if any.
    pub fn lift_index_after_stage(&self, stage: usize) -> Option<usize> {
        (0..self.lift_events.len()).find(|&l| self.time_stage_before_lift(l) == stage)
    }

    pub fn is_stage_before_impulse(&self, stage: usize) -> bool {
        self.impulse_index_after_stage(stage).is_some()
    }

    pub fn is_stage_before_lift(&self, stage: usize) -> bool {
        self.lift_index_after_stage(stage).is_some()
    }

    pub fn num_impulse_stages_before(&self, stage: usize) -> usize {
        (0..self.impulse_events.len())
            .filter(|&i| self.time_stage_before_impulse(i) < stage)
            .count()
    }

    pub fn num_lift_stages_before(&self, stage: usize) -> usize {
        (0..self.lift_events.len())
            .filter(|&l| self.time_stage_before_lift(l) < stage)
            .count()
    }

    /// Length of the ordinary piece of cell `stage`: `h` when the cell is
    /// whole, `τ − k·h` when an event at `τ` splits it.
    pub fn dtau(&self, stage: usize) -> f64 {
        assert!(stage < self.n_stages, "stage {stage} out of range");
        for e in &self.events {
            if self.cell_of(e.time()) == stage {
                return e.time() - stage as f64 * self.cell_width;
            }
        }
        self.cell_width
    }

    /// Length of the aux piece after impulse `impulse_index`
    /// (`(k+1)·h − τ`; zero when the impulse sits exactly on a grid node).
    pub fn dtau_impulse(&self, impulse_index: usize) -> f64 {
        let t = self.impulse_time(impulse_index);
        (self.cell_of(t) + 1) as f64 * self.cell_width - t
    }

    /// Length of the lift piece after lift `lift_index`.
    pub fn dtau_lift(&self, lift_index: usize) -> f64 {
        let t = self.lift_time(lift_index);
        (self.cell_of(t) + 1) as f64 * self.cell_width - t
    }

    /// Start time of ordinary stage `k`.
    pub fn stage_time(&self, stage: usize) -> f64 {
        stage as f64 * self.cell_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(mask: &[bool]) -> ContactStatus {
        let mut cs = ContactStatus::new(mask.len());
        cs.set_activity(mask);
        cs
    }

    fn sequence() -> ContactSequence {
        ContactSequence::new(1.0, 10, 4, status(&[false, false])).unwrap()
    }

    #[test]
    fn test_uniform_sequence_has_no_events() {
        let cs = sequence();
        assert_eq!(cs.total_num_impulse_stages(), 0);
        assert_eq!(cs.total_num_lift_stages(), 0);
        for k in 0..10 {
            assert_eq!(cs.dtau(k), 0.1);
            assert!(!cs.contact_status(k).has_active_contacts());
        }
    }

    #[test]
    fn test_event_splits_its_cell() {
        let mut cs = sequence();
        let e = DiscreteEvent::new(status(&[false, false]), status(&[true, false]), 0.34).unwrap();
        cs.set_discrete_event(e).unwrap();
        assert_eq!(cs.total_num_impulse_stages(), 1);
        assert_eq!(cs.time_stage_before_impulse(0), 3);
        assert_eq!(cs.time_stage_after_impulse(0), 4);
        assert!((cs.dtau(3) - 0.04).abs() < 1e-12);
        assert!((cs.dtau_impulse(0) - 0.06).abs() < 1e-12);
        // status flips only after the event's cell
        assert!(!cs.contact_status(3).has_active_contacts());
        assert!(cs.contact_status(4).has_active_contacts());
        assert_eq!(cs.impulse_status(0).dimp(), 3);
    }

    #[test]
    fn test_event_exactly_on_grid_node() {
        let mut cs = sequence();
        let e = DiscreteEvent::new(status(&[false, false]), status(&[true, true]), 0.1).unwrap();
        cs.set_discrete_event(e).unwrap();
        // belongs to the cell ending at 0.1
        assert_eq!(cs.time_stage_before_impulse(0), 0);
        assert!((cs.dtau(0) - 0.1).abs() < 1e-12);
        assert!(cs.dtau_impulse(0).abs() < 1e-12);
        assert!(cs.contact_status(1).has_active_contacts());
    }

    #[test]
    fn test_times_outside_horizon_are_rejected() {
        let mut cs = sequence();
        let make = |t| DiscreteEvent::new(status(&[false, false]), status(&[true, false]), t);
        assert!(cs.set_discrete_event(make(1.5).unwrap()).is_err());
        assert!(make(-0.2).is_ok()); // the event itself is fine...
        assert!(cs.set_discrete_event(make(-0.2).unwrap()).is_err()); // ...the schedule rejects it
    }

    #[test]
    fn test_two_events_in_one_cell_are_rejected() {
        let mut cs = sequence();
        let e1 = DiscreteEvent::new(status(&[false, false]), status(&[true, false]), 0.52).unwrap();
        cs.set_discrete_event(e1).unwrap();
        let e2 = DiscreteEvent::new(status(&[true, false]), status(&[true, true]), 0.58).unwrap();
        assert!(cs.set_discrete_event(e2).is_err());
    }

    #[test]
    fn test_inconsistent_pre_status_is_rejected() {
        let mut cs = sequence();
        let e = DiscreteEvent::new(status(&[true, true]), status(&[true, false]), 0.5).unwrap();
        assert!(cs.set_discrete_event(e).is_err());
        assert_eq!(cs.total_num_lift_stages(), 0);
    }

    #[test]
    fn test_shift_within_free_cells() {
        let mut cs = sequence();
        let e = DiscreteEvent::new(status(&[false, false]), status(&[true, false]), 0.34).unwrap();
        cs.set_discrete_event(e).unwrap();
        cs.shift_impulse(0, 0.77).unwrap();
        assert_eq!(cs.time_stage_before_impulse(0), 7);
        assert!((cs.dtau(7) - 0.07).abs() < 1e-12);
    }

    #[test]
    fn test_shift_across_another_event_is_rejected() {
        let mut cs = sequence();
        let imp =
            DiscreteEvent::new(status(&[false, false]), status(&[true, false]), 0.25).unwrap();
        cs.set_discrete_event(imp).unwrap();
        let lift =
            DiscreteEvent::new(status(&[true, false]), status(&[false, false]), 0.55).unwrap();
        cs.set_discrete_event(lift).unwrap();
        // moving the impulse past the lift must fail and leave the schedule intact
        assert!(cs.shift_impulse(0, 0.75).is_err());
        assert!(cs.shift_impulse(0, 0.58).is_err());
        assert_eq!(cs.time_stage_before_impulse(0), 2);
        assert_eq!(cs.time_stage_before_lift(0), 5);
        // lift bookkeeping
        assert!((cs.dtau_lift(0) - 0.05).abs() < 1e-12);
        assert_eq!(cs.num_impulse_stages_before(5), 1);
        assert_eq!(cs.num_lift_stages_before(5), 0);
        assert_eq!(cs.num_lift_stages_before(6), 1);
    }

    #[test]
    fn test_uniform_reset_clears_events() {
        let mut cs = sequence();
        let e = DiscreteEvent::new(status(&[false, false]), status(&[true, false]), 0.34).unwrap();
        cs.set_discrete_event(e).unwrap();
        cs.set_contact_status_uniformly(status(&[true, true]));
        assert_eq!(cs.total_num_impulse_stages(), 0);
        assert_eq!(cs.contact_status(0).dimf(), 6);
    }
}
