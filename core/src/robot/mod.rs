pub mod contact_status;
pub mod test_harness;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use self::contact_status::{ContactStatus, ImpulseStatus};

/// Static dimensions of a robot model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotDims {
    /// Dimension of the configuration (length of `q`).
    pub dimq: usize,
    /// Dimension of the tangent space (length of `v`, `a`, `u_stack`).
    pub dimv: usize,
    /// Number of passive (unactuated) joints; 6 for a floating base, else 0.
    pub dim_passive: usize,
    /// Number of point-contact frames the model can activate.
    pub max_point_contacts: usize,
    pub has_floating_base: bool,
}

impl RobotDims {
    /// Dimension of the actuated control input.
    pub fn dimu(&self) -> usize {
        self.dimv - self.dim_passive
    }

    /// Dimension of the state tangent (q-part + v-part).
    pub fn dimx(&self) -> usize {
        2 * self.dimv
    }

    /// Maximum stacked contact-force dimension (3 per contact).
    pub fn max_dimf(&self) -> usize {
        3 * self.max_point_contacts
    }
}

/// Kinematics / dynamics oracle of a rigid-body robot.
///
/// Every operation is a pure function of the immutable model plus an explicit
/// mutable workspace; the solver keeps one workspace per sub-interval slot so
/// parallel regions never share oracle state. Implementations wrap whatever
/// rigid-body backend is at hand (URDF-driven kinematics stay outside this
/// crate; `test_harness` ships analytic models).
pub trait RobotModel: Send + Sync {
    type Workspace: Send;

    fn dims(&self) -> &RobotDims;

    /// Create a fresh workspace. Called once per sub-interval slot at solver
    /// construction; never during iterations.
    fn workspace(&self) -> Self::Workspace;

    // --- configuration space ------------------------------------------------

    /// `q_out = q ⊕ step·v` on the configuration manifold.
    fn integrate_configuration(
        &self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        step: f64,
        q_out: &mut DVector<f64>,
    );

    /// `out = q1 ⊖ q2` (tangent-space difference, length `dimv`).
    fn subtract_configuration(&self, q1: &DVector<f64>, q2: &DVector<f64>, out: &mut DVector<f64>);

    /// Jacobian of `q1 ⊖ q2` with respect to `q1`.
    fn dsubtract_configuration_plus(
        &self,
        q1: &DVector<f64>,
        q2: &DVector<f64>,
        out: &mut DMatrix<f64>,
    );

    /// Jacobian of `q1 ⊖ q2` with respect to `q2`.
    fn dsubtract_configuration_minus(
        &self,
        q1: &DVector<f64>,
        q2: &DVector<f64>,
        out: &mut DMatrix<f64>,
    );

    /// Inverse of the floating-base block of a subtraction Jacobian.
    fn dsubtract_configuration_invert(&self, dsubtract: &DMatrix<f64>, out: &mut DMatrix<f64>);

    /// Project `q` back onto the manifold (unit quaternion for the base).
    fn normalize_configuration(&self, q: &mut DVector<f64>);

    /// A configuration strictly inside the position limits.
    fn generate_feasible_configuration(&self) -> DVector<f64>;

    // --- kinematics ---------------------------------------------------------

    fn update_kinematics(
        &self,
        ws: &mut Self::Workspace,
        q: &DVector<f64>,
        v: &DVector<f64>,
        a: &DVector<f64>,
    );

    fn update_frame_kinematics(&self, ws: &mut Self::Workspace, q: &DVector<f64>);

    /// World position of the contact frame with the given index.
    fn frame_position(&self, ws: &Self::Workspace, contact_index: usize) -> Vector3<f64>;

    /// World orientation of the contact frame.
    fn frame_rotation(&self, ws: &Self::Workspace, contact_index: usize) -> Matrix3<f64>;

    /// World placement `(rotation, position)` of the contact frame.
    fn frame_placement(
        &self,
        ws: &Self::Workspace,
        contact_index: usize,
    ) -> (Matrix3<f64>, Vector3<f64>) {
        (
            self.frame_rotation(ws, contact_index),
            self.frame_position(ws, contact_index),
        )
    }

    /// Center of mass in world coordinates.
    fn com(&self, ws: &Self::Workspace) -> Vector3<f64>;

    /// Translational Jacobian of the contact frame, `3 × dimv`.
    fn frame_jacobian(&self, ws: &Self::Workspace, contact_index: usize, jac: &mut DMatrix<f64>);

    // --- inverse dynamics ---------------------------------------------------

    /// Store the stacked contact forces of the active contacts in the
    /// workspace; subsequent `rnea` calls see them as external forces.
    fn set_contact_forces(
        &self,
        ws: &mut Self::Workspace,
        status: &ContactStatus,
        f: &[Vector3<f64>],
    );

    /// Same for impulse forces, seen by `rnea_impulse`.
    fn set_impulse_forces(
        &self,
        ws: &mut Self::Workspace,
        status: &ImpulseStatus,
        f: &[Vector3<f64>],
    );

    /// `tau = RNEA(q, v, a)` minus the external contact forces set before.
    fn rnea(
        &self,
        ws: &Self::Workspace,
        q: &DVector<f64>,
        v: &DVector<f64>,
        a: &DVector<f64>,
        tau: &mut DVector<f64>,
    );

    fn rnea_derivatives(
        &self,
        ws: &Self::Workspace,
        q: &DVector<f64>,
        v: &DVector<f64>,
        a: &DVector<f64>,
        dtau_dq: &mut DMatrix<f64>,
        dtau_dv: &mut DMatrix<f64>,
        dtau_da: &mut DMatrix<f64>,
    );

    /// Impulse inverse dynamics `M(q)·dv` minus the impulse forces.
    fn rnea_impulse(
        &self,
        ws: &Self::Workspace,
        q: &DVector<f64>,
        dv: &DVector<f64>,
        res: &mut DVector<f64>,
    );

    fn rnea_impulse_derivatives(
        &self,
        ws: &Self::Workspace,
        q: &DVector<f64>,
        dv: &DVector<f64>,
        dres_dq: &mut DMatrix<f64>,
        dres_ddv: &mut DMatrix<f64>,
    );

    // --- contact constraints ------------------------------------------------

    /// Baumgarte-stabilized contact acceleration residual of the active
    /// contacts (rows `3·i..3·i+3` per active contact `i`, stacked).
    /// Requires `update_kinematics`.
    fn compute_baumgarte_residual(
        &self,
        ws: &Self::Workspace,
        status: &ContactStatus,
        time_step: f64,
        res: &mut DVector<f64>,
    );

    fn compute_baumgarte_derivatives(
        &self,
        ws: &Self::Workspace,
        status: &ContactStatus,
        time_step: f64,
        dres_dq: &mut DMatrix<f64>,
        dres_dv: &mut DMatrix<f64>,
        dres_da: &mut DMatrix<f64>,
    );

    /// Post-impulse contact-velocity residual of the impulse-active contacts.
    fn compute_impulse_velocity_residual(
        &self,
        ws: &Self::Workspace,
        status: &ImpulseStatus,
        v: &DVector<f64>,
        dv: &DVector<f64>,
        res: &mut DVector<f64>,
    );

    fn compute_impulse_velocity_derivatives(
        &self,
        ws: &Self::Workspace,
        status: &ImpulseStatus,
        dres_dq: &mut DMatrix<f64>,
        dres_dv: &mut DMatrix<f64>,
    );

    /// Contact-position residual at touch-down (frame position minus the
    /// scheduled contact point). This is the pure-state constraint attached
    /// to an impulse stage.
    fn compute_impulse_condition_residual(
        &self,
        ws: &Self::Workspace,
        status: &ImpulseStatus,
        res: &mut DVector<f64>,
    );

    fn compute_impulse_condition_derivative(
        &self,
        ws: &Self::Workspace,
        status: &ImpulseStatus,
        dres_dq: &mut DMatrix<f64>,
    );

    // --- factorizations -----------------------------------------------------

    /// Inverse of the joint-space inertia matrix.
    fn compute_minv(&self, ws: &mut Self::Workspace, q: &DVector<f64>, minv: &mut DMatrix<f64>);

    /// Inverse of the contact-KKT matrix `[M Jᵀ; J 0]`, where `m` is
    /// `∂ID/∂a` and `j` the `dimf × dimv` contact Jacobian. `out` receives
    /// the `(dimv+dimf)²` top-left block.
    fn compute_mjtjinv(&self, m: &DMatrix<f64>, j: &DMatrix<f64>, dimf: usize, out: &mut DMatrix<f64>);

    // --- joint limits -------------------------------------------------------

    /// Lower/upper position limits of the actuated joints (length `dimu`).
    fn joint_position_limits(&self) -> (DVector<f64>, DVector<f64>);

    /// Symmetric velocity limit of the actuated joints (length `dimu`).
    fn joint_velocity_limit(&self) -> DVector<f64>;

    /// Symmetric effort limit of the actuated joints (length `dimu`).
    fn joint_effort_limit(&self) -> DVector<f64>;
}
