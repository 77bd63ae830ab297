use nalgebra::Vector3;

/// Activation mask over the robot's point contacts plus the world position
/// each active contact is pinned to.
///
/// The mask always has `max_point_contacts` entries; `dimf` is kept in sync
/// as `3 × (number of active contacts)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactStatus {
    is_contact_active: Vec<bool>,
    contact_points: Vec<Vector3<f64>>,
    dimf: usize,
}

impl ContactStatus {
    pub fn new(max_point_contacts: usize) -> Self {
        Self {
            is_contact_active: vec![false; max_point_contacts],
            contact_points: vec![Vector3::zeros(); max_point_contacts],
            dimf: 0,
        }
    }

    pub fn max_point_contacts(&self) -> usize {
        self.is_contact_active.len()
    }

    /// Stacked dimension of the active contact forces.
    pub fn dimf(&self) -> usize {
        self.dimf
    }

    pub fn is_contact_active(&self, contact_index: usize) -> bool {
        assert!(contact_index < self.is_contact_active.len());
        self.is_contact_active[contact_index]
    }

    pub fn contact_mask(&self) -> &[bool] {
        &self.is_contact_active
    }

    pub fn has_active_contacts(&self) -> bool {
        self.dimf > 0
    }

    pub fn num_active_contacts(&self) -> usize {
        self.dimf / 3
    }

    pub fn activate_contact(&mut self, contact_index: usize) {
        assert!(contact_index < self.is_contact_active.len());
        if !self.is_contact_active[contact_index] {
            self.is_contact_active[contact_index] = true;
            self.dimf += 3;
        }
    }

    pub fn deactivate_contact(&mut self, contact_index: usize) {
        assert!(contact_index < self.is_contact_active.len());
        if self.is_contact_active[contact_index] {
            self.is_contact_active[contact_index] = false;
            self.dimf -= 3;
        }
    }

    pub fn set_activity(&mut self, mask: &[bool]) {
        assert_eq!(mask.len(), self.is_contact_active.len());
        self.is_contact_active.copy_from_slice(mask);
        self.dimf = 3 * mask.iter().filter(|&&a| a).count();
    }

    pub fn set_contact_point(&mut self, contact_index: usize, point: Vector3<f64>) {
        assert!(contact_index < self.contact_points.len());
        self.contact_points[contact_index] = point;
    }

    pub fn set_contact_points(&mut self, points: &[Vector3<f64>]) {
        assert_eq!(points.len(), self.contact_points.len());
        self.contact_points.copy_from_slice(points);
    }

    pub fn contact_points(&self) -> &[Vector3<f64>] {
        &self.contact_points
    }

    /// True when the two statuses activate exactly the same contacts.
    pub fn same_activity(&self, other: &ContactStatus) -> bool {
        self.is_contact_active == other.is_contact_active
    }
}

/// Contacts that become active at a touch-down event. Shares the shape of
/// [`ContactStatus`] but the mask marks only the impacting contacts.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseStatus {
    status: ContactStatus,
}

impl ImpulseStatus {
    pub fn new(max_point_contacts: usize) -> Self {
        Self {
            status: ContactStatus::new(max_point_contacts),
        }
    }

    /// Impulse mask = contacts active in `post` but not in `pre`.
    pub fn from_transition(pre: &ContactStatus, post: &ContactStatus) -> Self {
        assert_eq!(pre.max_point_contacts(), post.max_point_contacts());
        let mut status = ContactStatus::new(pre.max_point_contacts());
        for i in 0..pre.max_point_contacts() {
            if post.is_contact_active(i) && !pre.is_contact_active(i) {
                status.activate_contact(i);
            }
            status.set_contact_point(i, post.contact_points()[i]);
        }
        Self { status }
    }

    pub fn max_point_contacts(&self) -> usize {
        self.status.max_point_contacts()
    }

    /// Stacked dimension of the impulse forces.
    pub fn dimp(&self) -> usize {
        self.status.dimf()
    }

    pub fn is_impulse_active(&self, contact_index: usize) -> bool {
        self.status.is_contact_active(contact_index)
    }

    pub fn impulse_mask(&self) -> &[bool] {
        self.status.contact_mask()
    }

    pub fn has_active_impulse(&self) -> bool {
        self.status.has_active_contacts()
    }

    pub fn num_active_impulses(&self) -> usize {
        self.status.num_active_contacts()
    }

    pub fn contact_points(&self) -> &[Vector3<f64>] {
        self.status.contact_points()
    }

    pub fn set_contact_points(&mut self, points: &[Vector3<f64>]) {
        self.status.set_contact_points(points);
    }

    /// View as a plain contact status (same mask and points).
    pub fn as_contact_status(&self) -> &ContactStatus {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimf_tracks_mask() {
        let mut cs = ContactStatus::new(4);
        assert_eq!(cs.dimf(), 0);
        cs.activate_contact(1);
        cs.activate_contact(3);
        assert_eq!(cs.dimf(), 6);
        cs.activate_contact(1); // already active, no change
        assert_eq!(cs.dimf(), 6);
        cs.deactivate_contact(1);
        assert_eq!(cs.dimf(), 3);
        cs.set_activity(&[true, true, true, false]);
        assert_eq!(cs.dimf(), 9);
        assert_eq!(cs.num_active_contacts(), 3);
    }

    #[test]
    fn test_impulse_status_from_transition() {
        let mut pre = ContactStatus::new(3);
        pre.activate_contact(0);
        let mut post = pre.clone();
        post.activate_contact(2);
        post.set_contact_point(2, Vector3::new(0.1, 0.2, 0.0));
        let imp = ImpulseStatus::from_transition(&pre, &post);
        assert!(!imp.is_impulse_active(0));
        assert!(!imp.is_impulse_active(1));
        assert!(imp.is_impulse_active(2));
        assert_eq!(imp.dimp(), 3);
        assert_eq!(imp.contact_points()[2], Vector3::new(0.1, 0.2, 0.0));
    }
}
