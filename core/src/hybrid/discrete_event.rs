use crate::error::SolverError;
use crate::robot::contact_status::{ContactStatus, ImpulseStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscreteEventKind {
    /// At least one contact becomes active (touch-down, state jump).
    Impulse,
    /// At least one contact becomes inactive (lift-off, smooth).
    Lift,
}

/// A contact-status transition pinned to a time inside the horizon.
///
/// An event is either an impulse or a lift, never both: a transition that
/// activates one contact and deactivates another in the same instant is
/// rejected, as is one that changes nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteEvent {
    pre: ContactStatus,
    post: ContactStatus,
    time: f64,
    kind: DiscreteEventKind,
}

impl DiscreteEvent {
    pub fn new(
        pre: ContactStatus,
        post: ContactStatus,
        time: f64,
    ) -> Result<Self, SolverError> {
        if pre.max_point_contacts() != post.max_point_contacts() {
            return Err(SolverError::config(
                "discrete event: pre and post status sizes differ",
            ));
        }
        let mut activates = false;
        let mut deactivates = false;
        for i in 0..pre.max_point_contacts() {
            match (pre.is_contact_active(i), post.is_contact_active(i)) {
                (false, true) => activates = true,
                (true, false) => deactivates = true,
                _ => {}
            }
        }
        let kind = match (activates, deactivates) {
            (true, false) => DiscreteEventKind::Impulse,
            (false, true) => DiscreteEventKind::Lift,
            (true, true) => {
                return Err(SolverError::config(
                    "discrete event activates and deactivates contacts at once",
                ));
            }
            (false, false) => {
                return Err(SolverError::config(
                    "discrete event does not change the contact status",
                ));
            }
        };
        if !time.is_finite() {
            return Err(SolverError::config("discrete event time is not finite"));
        }
        Ok(Self { pre, post, time, kind })
    }

    pub fn kind(&self) -> DiscreteEventKind {
        self.kind
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub(crate) fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn pre_status(&self) -> &ContactStatus {
        &self.pre
    }

    pub fn post_status(&self) -> &ContactStatus {
        &self.post
    }

    pub(crate) fn pre_status_mut(&mut self) -> &mut ContactStatus {
        &mut self.pre
    }

    pub(crate) fn post_status_mut(&mut self) -> &mut ContactStatus {
        &mut self.post
    }

    /// Mask of the contacts this impulse event activates.
    pub fn impulse_status(&self) -> ImpulseStatus {
        debug_assert_eq!(self.kind, DiscreteEventKind::Impulse);
        ImpulseStatus::from_transition(&self.pre, &self.post)
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

    #[test]
    fn test_event_kind_is_derived_from_transition() {
        let e = DiscreteEvent::new(status(&[false, false]), status(&[true, false]), 0.5).unwrap();
        assert_eq!(e.kind(), DiscreteEventKind::Impulse);
        let e = DiscreteEvent::new(status(&[true, true]), status(&[true, false]), 0.5).unwrap();
        assert_eq!(e.kind(), DiscreteEventKind::Lift);
    }

    #[test]
    fn test_mixed_or_empty_transitions_are_rejected() {
        assert!(DiscreteEvent::new(status(&[true, false]), status(&[false, true]), 0.5).is_err());
        assert!(DiscreteEvent::new(status(&[true, false]), status(&[true, false]), 0.5).is_err());
    }

    #[test]
    fn test_impulse_status_marks_only_new_contacts() {
        let e = DiscreteEvent::new(status(&[true, false]), status(&[true, true]), 0.2).unwrap();
        let imp = e.impulse_status();
        assert!(!imp.is_impulse_active(0));
        assert!(imp.is_impulse_active(1));
        assert_eq!(imp.dimp(), 3);
    }
}
