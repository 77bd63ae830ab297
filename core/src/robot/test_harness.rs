//! Analytic robot models for tests and the benchmark driver.
//!
//! Real deployments implement [`RobotModel`](super::RobotModel) on top of a
//! rigid-body kinematics backend; these models instead use a constant SPD
//! inertia, linear bias terms and contact frames whose positions are affine
//! in the configuration. Every oracle derivative is exact, so numeric
//! assertions against them can be sharp.

use nalgebra::{DMatrix, DVector, Matrix3, UnitQuaternion, Vector3, linalg::Cholesky};

use super::contact_status::{ContactStatus, ImpulseStatus};
use super::{RobotDims, RobotModel};

/// Shared scratch of the analytic models: the kinematics cache plus the
/// torque-space image of the external forces.
pub struct ChainWorkspace {
    q: DVector<f64>,
    v: DVector<f64>,
    a: DVector<f64>,
    fext_tau: DVector<f64>,
    fimp_tau: DVector<f64>,
}

impl ChainWorkspace {
    fn new(dimq: usize, dimv: usize) -> Self {
        Self {
            q: DVector::zeros(dimq),
            v: DVector::zeros(dimv),
            a: DVector::zeros(dimv),
            fext_tau: DVector::zeros(dimv),
            fimp_tau: DVector::zeros(dimv),
        }
    }
}

/// Fixed-base serial chain: `τ = M·a + D·v + K·q + g₀ − Σ Jᵢᵀ·fᵢ`, contact
/// frame `i` at `pᵢ(q) = Jᵢ·q + cᵢ`.
pub struct ChainModel {
    dims: RobotDims,
    mass: DMatrix<f64>,
    mass_chol: Cholesky<f64, nalgebra::Dyn>,
    damping: DVector<f64>,
    stiffness: DVector<f64>,
    gravity_tau: DVector<f64>,
    contact_jac: Vec<DMatrix<f64>>,
    contact_offset: Vec<Vector3<f64>>,
    qmin: DVector<f64>,
    qmax: DVector<f64>,
    vmax: DVector<f64>,
    umax: DVector<f64>,
}

impl ChainModel {
    pub fn new(n_joints: usize, max_point_contacts: usize) -> Self {
        let dims = RobotDims {
            dimq: n_joints,
            dimv: n_joints,
            dim_passive: 0,
            max_point_contacts,
            has_floating_base: false,
        };
        let (mass, mass_chol) = build_inertia(n_joints);
        let contact_jac = build_contact_jacobians(max_point_contacts, n_joints, 0);
        Self {
            dims,
            mass,
            mass_chol,
            damping: DVector::from_element(n_joints, 0.1),
            stiffness: DVector::from_element(n_joints, 0.05),
            gravity_tau: DVector::from_fn(n_joints, |i, _| 0.2 * ((i + 1) as f64)),
            contact_jac,
            contact_offset: (0..max_point_contacts)
                .map(|i| Vector3::new(0.1 * i as f64, -0.1 * i as f64, 0.0))
                .collect(),
            qmin: DVector::from_element(n_joints, -2.5),
            qmax: DVector::from_element(n_joints, 2.5),
            vmax: DVector::from_element(n_joints, 3.15),
            umax: DVector::from_element(n_joints, 50.0),
        }
    }

    pub fn set_joint_limits(
        &mut self,
        qmin: DVector<f64>,
        qmax: DVector<f64>,
        vmax: DVector<f64>,
        umax: DVector<f64>,
    ) {
        self.qmin = qmin;
        self.qmax = qmax;
        self.vmax = vmax;
        self.umax = umax;
    }

    fn contact_position(&self, q: &DVector<f64>, i: usize) -> Vector3<f64> {
        let p = &self.contact_jac[i] * q;
        Vector3::new(p[0], p[1], p[2]) + self.contact_offset[i]
    }
}

fn build_inertia(dimv: usize) -> (DMatrix<f64>, Cholesky<f64, nalgebra::Dyn>) {
    // constant SPD inertia with off-diagonal coupling
    let mut m = DMatrix::from_element(dimv, dimv, 0.0);
    for i in 0..dimv {
        m[(i, i)] = 2.0 + 0.3 * (i as f64);
        if i + 1 < dimv {
            m[(i, i + 1)] = 0.4;
            m[(i + 1, i)] = 0.4;
        }
    }
    let chol = Cholesky::new(m.clone()).expect("test-model inertia must be SPD");
    (m, chol)
}

fn build_contact_jacobians(
    max_point_contacts: usize,
    dimv: usize,
    dim_passive: usize,
) -> Vec<DMatrix<f64>> {
    (0..max_point_contacts)
        .map(|i| {
            let mut j = DMatrix::zeros(3, dimv);
            for r in 0..3 {
                for c in 0..dimv {
                    // deterministic, full-rank-ish rows; the base columns of a
                    // floating model are the identity on the linear part
                    j[(r, c)] = 0.3 * ((1 + r + 2 * c + i) as f64 * 0.7).sin();
                }
            }
            if dim_passive > 0 {
                for r in 0..3 {
                    for c in 0..6 {
                        j[(r, c)] = if r == c { 1.0 } else { 0.0 };
                    }
                }
            }
            j
        })
        .collect()
}

fn mjtjinv_from_blocks(
    mass_chol: &Cholesky<f64, nalgebra::Dyn>,
    j: &DMatrix<f64>,
    dimv: usize,
    dimf: usize,
    out: &mut DMatrix<f64>,
) {
    // [M Jᵀ; J 0]⁻¹ = [Minv − Minv·Jᵀ·S⁻¹·J·Minv, Minv·Jᵀ·S⁻¹;
    //                  S⁻¹·J·Minv,               −S⁻¹],  S = J·Minv·Jᵀ
    let minv_full = mass_chol.inverse();
    if dimf == 0 {
        out.view_mut((0, 0), (dimv, dimv)).copy_from(&minv_full);
        return;
    }
    let ja = j.view((0, 0), (dimf, dimv)).into_owned();
    let minv_jt = &minv_full * ja.transpose();
    let s = &ja * &minv_jt;
    let s_chol = Cholesky::new(s).expect("contact Schur complement must be SPD");
    let sinv = s_chol.inverse();
    let top_left = &minv_full - &minv_jt * &sinv * minv_jt.transpose();
    out.view_mut((0, 0), (dimv, dimv)).copy_from(&top_left);
    out.view_mut((0, dimv), (dimv, dimf)).copy_from(&(&minv_jt * &sinv));
    out.view_mut((dimv, 0), (dimf, dimv))
        .copy_from(&(&sinv * minv_jt.transpose()));
    out.view_mut((dimv, dimv), (dimf, dimf)).copy_from(&(-&sinv));
}

fn accumulate_contact_forces(
    jacs: &[DMatrix<f64>],
    mask: &[bool],
    f: &[Vector3<f64>],
    out: &mut DVector<f64>,
) {
    out.fill(0.0);
    for (i, &active) in mask.iter().enumerate() {
        if active {
            *out += jacs[i].transpose() * f[i];
        }
    }
}

/// Stacked Baumgarte residual over the active contacts, with poles
/// `(2/dt, 1/dt²)`.
#[allow(clippy::too_many_arguments)]
fn baumgarte_residual(
    jacs: &[DMatrix<f64>],
    offsets: &[Vector3<f64>],
    status: &ContactStatus,
    time_step: f64,
    q: &DVector<f64>,
    v: &DVector<f64>,
    a: &DVector<f64>,
    res: &mut DVector<f64>,
) {
    let mut row = 0;
    for i in 0..status.max_point_contacts() {
        if !status.is_contact_active(i) {
            continue;
        }
        let j = &jacs[i];
        let p = j * q_tangent(q, j.ncols()) + offsets[i];
        let pv = j * v;
        let pa = j * a;
        let target = status.contact_points()[i];
        let r = pa + (2.0 / time_step) * pv + (1.0 / (time_step * time_step)) * (p - target);
        res.fixed_rows_mut::<3>(row).copy_from(&r);
        row += 3;
    }
}

/// The configuration seen by the affine contact maps: for the fixed-base
/// chain it is `q` itself; the floating model passes its tangent coordinates.
fn q_tangent(q: &DVector<f64>, dimv: usize) -> DVector<f64> {
    if q.len() == dimv {
        q.clone()
    } else {
        // floating base: (position, zero rotation coords, joints)
        let mut out = DVector::zeros(dimv);
        out.rows_mut(0, 3).copy_from(&q.rows(0, 3));
        out.rows_mut(6, dimv - 6).copy_from(&q.rows(7, dimv - 6));
        out
    }
}

impl RobotModel for ChainModel {
    type Workspace = ChainWorkspace;

    fn dims(&self) -> &RobotDims {
        &self.dims
    }

    fn workspace(&self) -> ChainWorkspace {
        ChainWorkspace::new(self.dims.dimq, self.dims.dimv)
    }

    fn integrate_configuration(
        &self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        step: f64,
        q_out: &mut DVector<f64>,
    ) {
        q_out.copy_from(&(q + step * v));
    }

    fn subtract_configuration(&self, q1: &DVector<f64>, q2: &DVector<f64>, out: &mut DVector<f64>) {
        out.copy_from(&(q1 - q2));
    }

    fn dsubtract_configuration_plus(
        &self,
        _q1: &DVector<f64>,
        _q2: &DVector<f64>,
        out: &mut DMatrix<f64>,
    ) {
        out.fill_with_identity();
    }

    fn dsubtract_configuration_minus(
        &self,
        _q1: &DVector<f64>,
        _q2: &DVector<f64>,
        out: &mut DMatrix<f64>,
    ) {
        out.fill(0.0);
        out.fill_diagonal(-1.0);
    }

    fn dsubtract_configuration_invert(&self, dsubtract: &DMatrix<f64>, out: &mut DMatrix<f64>) {
        out.copy_from(
            &dsubtract
                .clone()
                .try_inverse()
                .expect("subtraction Jacobian must be invertible"),
        );
    }

    fn normalize_configuration(&self, _q: &mut DVector<f64>) {}

    fn generate_feasible_configuration(&self) -> DVector<f64> {
        0.5 * (&self.qmin + &self.qmax)
    }

    fn update_kinematics(
        &self,
        ws: &mut ChainWorkspace,
        q: &DVector<f64>,
        v: &DVector<f64>,
        a: &DVector<f64>,
    ) {
        ws.q.copy_from(q);
        ws.v.copy_from(v);
        ws.a.copy_from(a);
    }

    fn update_frame_kinematics(&self, ws: &mut ChainWorkspace, q: &DVector<f64>) {
        ws.q.copy_from(q);
    }

    fn frame_position(&self, ws: &ChainWorkspace, contact_index: usize) -> Vector3<f64> {
        self.contact_position(&ws.q, contact_index)
    }

    fn frame_rotation(&self, _ws: &ChainWorkspace, _contact_index: usize) -> Matrix3<f64> {
        // point contacts on the analytic chain carry the world orientation
        Matrix3::identity()
    }

    fn com(&self, ws: &ChainWorkspace) -> Vector3<f64> {
        let mut c = Vector3::zeros();
        if self.contact_jac.is_empty() {
            return c;
        }
        for i in 0..self.contact_jac.len() {
            c += self.contact_position(&ws.q, i);
        }
        c / self.contact_jac.len() as f64
    }

    fn frame_jacobian(&self, _ws: &ChainWorkspace, contact_index: usize, jac: &mut DMatrix<f64>) {
        jac.view_mut((0, 0), (3, self.dims.dimv))
            .copy_from(&self.contact_jac[contact_index]);
    }

    fn set_contact_forces(
        &self,
        ws: &mut ChainWorkspace,
        status: &ContactStatus,
        f: &[Vector3<f64>],
    ) {
        accumulate_contact_forces(&self.contact_jac, status.contact_mask(), f, &mut ws.fext_tau);
    }

    fn set_impulse_forces(
        &self,
        ws: &mut ChainWorkspace,
        status: &ImpulseStatus,
        f: &[Vector3<f64>],
    ) {
        accumulate_contact_forces(&self.contact_jac, status.impulse_mask(), f, &mut ws.fimp_tau);
    }

    fn rnea(
        &self,
        ws: &ChainWorkspace,
        q: &DVector<f64>,
        v: &DVector<f64>,
        a: &DVector<f64>,
        tau: &mut DVector<f64>,
    ) {
        tau.copy_from(&(&self.mass * a));
        *tau += v.component_mul(&self.damping);
        *tau += q.component_mul(&self.stiffness);
        *tau += &self.gravity_tau;
        *tau -= &ws.fext_tau;
    }

    fn rnea_derivatives(
        &self,
        _ws: &ChainWorkspace,
        _q: &DVector<f64>,
        _v: &DVector<f64>,
        _a: &DVector<f64>,
        dtau_dq: &mut DMatrix<f64>,
        dtau_dv: &mut DMatrix<f64>,
        dtau_da: &mut DMatrix<f64>,
    ) {
        dtau_dq.fill(0.0);
        for i in 0..self.dims.dimv {
            dtau_dq[(i, i)] = self.stiffness[i];
        }
        dtau_dv.fill(0.0);
        for i in 0..self.dims.dimv {
            dtau_dv[(i, i)] = self.damping[i];
        }
        dtau_da.copy_from(&self.mass);
    }

    fn rnea_impulse(
        &self,
        ws: &ChainWorkspace,
        _q: &DVector<f64>,
        dv: &DVector<f64>,
        res: &mut DVector<f64>,
    ) {
        res.copy_from(&(&self.mass * dv));
        *res -= &ws.fimp_tau;
    }

    fn rnea_impulse_derivatives(
        &self,
        _ws: &ChainWorkspace,
        _q: &DVector<f64>,
        _dv: &DVector<f64>,
        dres_dq: &mut DMatrix<f64>,
        dres_ddv: &mut DMatrix<f64>,
    ) {
        dres_dq.fill(0.0);
        dres_ddv.copy_from(&self.mass);
    }

    fn compute_baumgarte_residual(
        &self,
        ws: &ChainWorkspace,
        status: &ContactStatus,
        time_step: f64,
        res: &mut DVector<f64>,
    ) {
        baumgarte_residual(
            &self.contact_jac,
            &self.contact_offset,
            status,
            time_step,
            &ws.q,
            &ws.v,
            &ws.a,
            res,
        );
    }

    fn compute_baumgarte_derivatives(
        &self,
        _ws: &ChainWorkspace,
        status: &ContactStatus,
        time_step: f64,
        dres_dq: &mut DMatrix<f64>,
        dres_dv: &mut DMatrix<f64>,
        dres_da: &mut DMatrix<f64>,
    ) {
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_contact_active(i) {
                continue;
            }
            let j = &self.contact_jac[i];
            dres_dq
                .view_mut((row, 0), (3, self.dims.dimv))
                .copy_from(&(j / (time_step * time_step)));
            dres_dv
                .view_mut((row, 0), (3, self.dims.dimv))
                .copy_from(&(j * (2.0 / time_step)));
            dres_da.view_mut((row, 0), (3, self.dims.dimv)).copy_from(j);
            row += 3;
        }
    }

    fn compute_impulse_velocity_residual(
        &self,
        _ws: &ChainWorkspace,
        status: &ImpulseStatus,
        v: &DVector<f64>,
        dv: &DVector<f64>,
        res: &mut DVector<f64>,
    ) {
        let post = v + dv;
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_impulse_active(i) {
                continue;
            }
            res.fixed_rows_mut::<3>(row)
                .copy_from(&(&self.contact_jac[i] * &post));
            row += 3;
        }
    }

    fn compute_impulse_velocity_derivatives(
        &self,
        _ws: &ChainWorkspace,
        status: &ImpulseStatus,
        dres_dq: &mut DMatrix<f64>,
        dres_dv: &mut DMatrix<f64>,
    ) {
        dres_dq.fill(0.0);
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_impulse_active(i) {
                continue;
            }
            dres_dv
                .view_mut((row, 0), (3, self.dims.dimv))
                .copy_from(&self.contact_jac[i]);
            row += 3;
        }
    }

    fn compute_impulse_condition_residual(
        &self,
        ws: &ChainWorkspace,
        status: &ImpulseStatus,
        res: &mut DVector<f64>,
    ) {
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_impulse_active(i) {
                continue;
            }
            let p = self.contact_position(&ws.q, i) - status.contact_points()[i];
            res.fixed_rows_mut::<3>(row).copy_from(&p);
            row += 3;
        }
    }

    fn compute_impulse_condition_derivative(
        &self,
        _ws: &ChainWorkspace,
        status: &ImpulseStatus,
        dres_dq: &mut DMatrix<f64>,
    ) {
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_impulse_active(i) {
                continue;
            }
            dres_dq
                .view_mut((row, 0), (3, self.dims.dimv))
                .copy_from(&self.contact_jac[i]);
            row += 3;
        }
    }

    fn compute_minv(&self, _ws: &mut ChainWorkspace, _q: &DVector<f64>, minv: &mut DMatrix<f64>) {
        minv.copy_from(&self.mass_chol.inverse());
    }

    fn compute_mjtjinv(
        &self,
        _m: &DMatrix<f64>,
        j: &DMatrix<f64>,
        dimf: usize,
        out: &mut DMatrix<f64>,
    ) {
        mjtjinv_from_blocks(&self.mass_chol, j, self.dims.dimv, dimf, out);
    }

    fn joint_position_limits(&self) -> (DVector<f64>, DVector<f64>) {
        (self.qmin.clone(), self.qmax.clone())
    }

    fn joint_velocity_limit(&self) -> DVector<f64> {
        self.vmax.clone()
    }

    fn joint_effort_limit(&self) -> DVector<f64> {
        self.umax.clone()
    }
}

/// Free-flyer base (`q ∈ ℝ³ × S³ × ℝⁿ`) on top of the analytic chain;
/// exercises the Lie-group integration and the passive-torque bookkeeping.
/// Contact frames depend on the base position and the joints.
pub struct FloatingChainModel {
    dims: RobotDims,
    mass: DMatrix<f64>,
    mass_chol: Cholesky<f64, nalgebra::Dyn>,
    damping: DVector<f64>,
    joint_stiffness: DVector<f64>,
    gravity_tau: DVector<f64>,
    contact_jac: Vec<DMatrix<f64>>,
    contact_offset: Vec<Vector3<f64>>,
    qmin: DVector<f64>,
    qmax: DVector<f64>,
    vmax: DVector<f64>,
    umax: DVector<f64>,
}

impl FloatingChainModel {
    pub fn new(n_joints: usize, max_point_contacts: usize) -> Self {
        let dimv = 6 + n_joints;
        let dims = RobotDims {
            dimq: 7 + n_joints,
            dimv,
            dim_passive: 6,
            max_point_contacts,
            has_floating_base: true,
        };
        let (mass, mass_chol) = build_inertia(dimv);
        let contact_jac = build_contact_jacobians(max_point_contacts, dimv, 6);
        Self {
            dims,
            mass,
            mass_chol,
            damping: DVector::from_element(dimv, 0.1),
            joint_stiffness: DVector::from_element(n_joints, 0.05),
            gravity_tau: DVector::from_fn(dimv, |i, _| if i == 2 { -9.81 * 4.0 } else { 0.0 }),
            contact_jac,
            contact_offset: (0..max_point_contacts)
                .map(|i| Vector3::new(0.2 * i as f64, 0.0, -0.4))
                .collect(),
            qmin: DVector::from_element(n_joints, -2.5),
            qmax: DVector::from_element(n_joints, 2.5),
            vmax: DVector::from_element(n_joints, 3.15),
            umax: DVector::from_element(n_joints, 80.0),
        }
    }

    fn quat(q: &DVector<f64>) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q[6], q[3], q[4], q[5]))
    }

    fn nj(&self) -> usize {
        self.dims.dimv - 6
    }
}

impl RobotModel for FloatingChainModel {
    type Workspace = ChainWorkspace;

    fn dims(&self) -> &RobotDims {
        &self.dims
    }

    fn workspace(&self) -> ChainWorkspace {
        ChainWorkspace::new(self.dims.dimq, self.dims.dimv)
    }

    fn integrate_configuration(
        &self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        step: f64,
        q_out: &mut DVector<f64>,
    ) {
        q_out.copy_from(q);
        {
            let mut pos = q_out.rows_mut(0, 3);
            pos += step * v.rows(0, 3);
        }
        let omega = Vector3::new(v[3], v[4], v[5]);
        let rot = Self::quat(q) * UnitQuaternion::from_scaled_axis(step * omega);
        q_out[3] = rot.i;
        q_out[4] = rot.j;
        q_out[5] = rot.k;
        q_out[6] = rot.w;
        let nj = self.nj();
        let mut joints = q_out.rows_mut(7, nj);
        joints += step * v.rows(6, nj);
    }

    fn subtract_configuration(&self, q1: &DVector<f64>, q2: &DVector<f64>, out: &mut DVector<f64>) {
        out.rows_mut(0, 3).copy_from(&(q1.rows(0, 3) - q2.rows(0, 3)));
        let drot = Self::quat(q2).inverse() * Self::quat(q1);
        out.rows_mut(3, 3).copy_from(&drot.scaled_axis());
        let nj = self.nj();
        out.rows_mut(6, nj).copy_from(&(q1.rows(7, nj) - q2.rows(7, nj)));
    }

    fn dsubtract_configuration_plus(
        &self,
        _q1: &DVector<f64>,
        _q2: &DVector<f64>,
        out: &mut DMatrix<f64>,
    ) {
        // first-order Jacobian; exact when the relative base rotation is small
        out.fill_with_identity();
    }

    fn dsubtract_configuration_minus(
        &self,
        _q1: &DVector<f64>,
        _q2: &DVector<f64>,
        out: &mut DMatrix<f64>,
    ) {
        out.fill(0.0);
        out.fill_diagonal(-1.0);
    }

    fn dsubtract_configuration_invert(&self, dsubtract: &DMatrix<f64>, out: &mut DMatrix<f64>) {
        out.copy_from(
            &dsubtract
                .clone()
                .try_inverse()
                .expect("subtraction Jacobian must be invertible"),
        );
    }

    fn normalize_configuration(&self, q: &mut DVector<f64>) {
        let norm =
            (q[3] * q[3] + q[4] * q[4] + q[5] * q[5] + q[6] * q[6]).sqrt();
        if norm > 0.0 {
            for i in 3..7 {
                q[i] /= norm;
            }
        } else {
            q[3] = 0.0;
            q[4] = 0.0;
            q[5] = 0.0;
            q[6] = 1.0;
        }
    }

    fn generate_feasible_configuration(&self) -> DVector<f64> {
        let mut q = DVector::zeros(self.dims.dimq);
        q[6] = 1.0;
        q
    }

    fn update_kinematics(
        &self,
        ws: &mut ChainWorkspace,
        q: &DVector<f64>,
        v: &DVector<f64>,
        a: &DVector<f64>,
    ) {
        ws.q.copy_from(q);
        ws.v.copy_from(v);
        ws.a.copy_from(a);
    }

    fn update_frame_kinematics(&self, ws: &mut ChainWorkspace, q: &DVector<f64>) {
        ws.q.copy_from(q);
    }

    fn frame_position(&self, ws: &ChainWorkspace, contact_index: usize) -> Vector3<f64> {
        let qt = q_tangent(&ws.q, self.dims.dimv);
        let p = &self.contact_jac[contact_index] * qt;
        Vector3::new(p[0], p[1], p[2]) + self.contact_offset[contact_index]
    }

    fn frame_rotation(&self, ws: &ChainWorkspace, _contact_index: usize) -> Matrix3<f64> {
        Self::quat(&ws.q).to_rotation_matrix().into_inner()
    }

    fn com(&self, ws: &ChainWorkspace) -> Vector3<f64> {
        Vector3::new(ws.q[0], ws.q[1], ws.q[2])
    }

    fn frame_jacobian(&self, _ws: &ChainWorkspace, contact_index: usize, jac: &mut DMatrix<f64>) {
        jac.view_mut((0, 0), (3, self.dims.dimv))
            .copy_from(&self.contact_jac[contact_index]);
    }

    fn set_contact_forces(
        &self,
        ws: &mut ChainWorkspace,
        status: &ContactStatus,
        f: &[Vector3<f64>],
    ) {
        accumulate_contact_forces(&self.contact_jac, status.contact_mask(), f, &mut ws.fext_tau);
    }

    fn set_impulse_forces(
        &self,
        ws: &mut ChainWorkspace,
        status: &ImpulseStatus,
        f: &[Vector3<f64>],
    ) {
        accumulate_contact_forces(&self.contact_jac, status.impulse_mask(), f, &mut ws.fimp_tau);
    }

    fn rnea(
        &self,
        ws: &ChainWorkspace,
        q: &DVector<f64>,
        v: &DVector<f64>,
        a: &DVector<f64>,
        tau: &mut DVector<f64>,
    ) {
        tau.copy_from(&(&self.mass * a));
        *tau += v.component_mul(&self.damping);
        let nj = self.nj();
        {
            let mut joint_rows = tau.rows_mut(6, nj);
            joint_rows += q.rows(7, nj).component_mul(&self.joint_stiffness);
        }
        *tau += &self.gravity_tau;
        *tau -= &ws.fext_tau;
    }

    fn rnea_derivatives(
        &self,
        _ws: &ChainWorkspace,
        _q: &DVector<f64>,
        _v: &DVector<f64>,
        _a: &DVector<f64>,
        dtau_dq: &mut DMatrix<f64>,
        dtau_dv: &mut DMatrix<f64>,
        dtau_da: &mut DMatrix<f64>,
    ) {
        dtau_dq.fill(0.0);
        let nj = self.nj();
        for i in 0..nj {
            dtau_dq[(6 + i, 6 + i)] = self.joint_stiffness[i];
        }
        dtau_dv.fill(0.0);
        for i in 0..self.dims.dimv {
            dtau_dv[(i, i)] = self.damping[i];
        }
        dtau_da.copy_from(&self.mass);
    }

    fn rnea_impulse(
        &self,
        ws: &ChainWorkspace,
        _q: &DVector<f64>,
        dv: &DVector<f64>,
        res: &mut DVector<f64>,
    ) {
        res.copy_from(&(&self.mass * dv));
        *res -= &ws.fimp_tau;
    }

    fn rnea_impulse_derivatives(
        &self,
        _ws: &ChainWorkspace,
        _q: &DVector<f64>,
        _dv: &DVector<f64>,
        dres_dq: &mut DMatrix<f64>,
        dres_ddv: &mut DMatrix<f64>,
    ) {
        dres_dq.fill(0.0);
        dres_ddv.copy_from(&self.mass);
    }

    fn compute_baumgarte_residual(
        &self,
        ws: &ChainWorkspace,
        status: &ContactStatus,
        time_step: f64,
        res: &mut DVector<f64>,
    ) {
        baumgarte_residual(
            &self.contact_jac,
            &self.contact_offset,
            status,
            time_step,
            &ws.q,
            &ws.v,
            &ws.a,
            res,
        );
    }

    fn compute_baumgarte_derivatives(
        &self,
        _ws: &ChainWorkspace,
        status: &ContactStatus,
        time_step: f64,
        dres_dq: &mut DMatrix<f64>,
        dres_dv: &mut DMatrix<f64>,
        dres_da: &mut DMatrix<f64>,
    ) {
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_contact_active(i) {
                continue;
            }
            let j = &self.contact_jac[i];
            dres_dq
                .view_mut((row, 0), (3, self.dims.dimv))
                .copy_from(&(j / (time_step * time_step)));
            dres_dv
                .view_mut((row, 0), (3, self.dims.dimv))
                .copy_from(&(j * (2.0 / time_step)));
            dres_da.view_mut((row, 0), (3, self.dims.dimv)).copy_from(j);
            row += 3;
        }
    }

    fn compute_impulse_velocity_residual(
        &self,
        _ws: &ChainWorkspace,
        status: &ImpulseStatus,
        v: &DVector<f64>,
        dv: &DVector<f64>,
        res: &mut DVector<f64>,
    ) {
        let post = v + dv;
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_impulse_active(i) {
                continue;
            }
            res.fixed_rows_mut::<3>(row)
                .copy_from(&(&self.contact_jac[i] * &post));
            row += 3;
        }
    }

    fn compute_impulse_velocity_derivatives(
        &self,
        _ws: &ChainWorkspace,
        status: &ImpulseStatus,
        dres_dq: &mut DMatrix<f64>,
        dres_dv: &mut DMatrix<f64>,
    ) {
        dres_dq.fill(0.0);
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_impulse_active(i) {
                continue;
            }
            dres_dv
                .view_mut((row, 0), (3, self.dims.dimv))
                .copy_from(&self.contact_jac[i]);
            row += 3;
        }
    }

    fn compute_impulse_condition_residual(
        &self,
        ws: &ChainWorkspace,
        status: &ImpulseStatus,
        res: &mut DVector<f64>,
    ) {
        let qt = q_tangent(&ws.q, self.dims.dimv);
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_impulse_active(i) {
                continue;
            }
            let p = &self.contact_jac[i] * &qt;
            let p = Vector3::new(p[0], p[1], p[2]) + self.contact_offset[i]
                - status.contact_points()[i];
            res.fixed_rows_mut::<3>(row).copy_from(&p);
            row += 3;
        }
    }

    fn compute_impulse_condition_derivative(
        &self,
        _ws: &ChainWorkspace,
        status: &ImpulseStatus,
        dres_dq: &mut DMatrix<f64>,
    ) {
        let mut row = 0;
        for i in 0..status.max_point_contacts() {
            if !status.is_impulse_active(i) {
                continue;
            }
            dres_dq
                .view_mut((row, 0), (3, self.dims.dimv))
                .copy_from(&self.contact_jac[i]);
            row += 3;
        }
    }

    fn compute_minv(&self, _ws: &mut ChainWorkspace, _q: &DVector<f64>, minv: &mut DMatrix<f64>) {
        minv.copy_from(&self.mass_chol.inverse());
    }

    fn compute_mjtjinv(
        &self,
        _m: &DMatrix<f64>,
        j: &DMatrix<f64>,
        dimf: usize,
        out: &mut DMatrix<f64>,
    ) {
        mjtjinv_from_blocks(&self.mass_chol, j, self.dims.dimv, dimf, out);
    }

    fn joint_position_limits(&self) -> (DVector<f64>, DVector<f64>) {
        (self.qmin.clone(), self.qmax.clone())
    }

    fn joint_velocity_limit(&self) -> DVector<f64> {
        self.vmax.clone()
    }

    fn joint_effort_limit(&self) -> DVector<f64> {
        self.umax.clone()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_chain_rnea_matches_derivatives() {
        let robot = ChainModel::new(4, 0);
        let mut ws = robot.workspace();
        let q = DVector::from_vec(vec![0.1, -0.2, 0.3, 0.4]);
        let v = DVector::from_vec(vec![1.0, 0.0, -1.0, 0.5]);
        let a = DVector::from_vec(vec![0.2, 0.2, 0.2, 0.2]);
        robot.update_kinematics(&mut ws, &q, &v, &a);
        let mut tau = DVector::zeros(4);
        robot.rnea(&ws, &q, &v, &a, &mut tau);
        // finite-difference check of ∂τ/∂a
        let mut dq = DMatrix::zeros(4, 4);
        let mut dv = DMatrix::zeros(4, 4);
        let mut da = DMatrix::zeros(4, 4);
        robot.rnea_derivatives(&ws, &q, &v, &a, &mut dq, &mut dv, &mut da);
        let eps = 1e-6;
        for c in 0..4 {
            let mut a2 = a.clone();
            a2[c] += eps;
            let mut tau2 = DVector::zeros(4);
            robot.rnea(&ws, &q, &v, &a2, &mut tau2);
            let fd = (&tau2 - &tau) / eps;
            for r in 0..4 {
                assert!((fd[r] - da[(r, c)]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_mjtjinv_inverts_contact_kkt() {
        let robot = ChainModel::new(5, 2);
        let mut status = ContactStatus::new(2);
        status.activate_contact(0);
        status.activate_contact(1);
        let dimf = status.dimf();
        let dimv = 5;
        let mut j = DMatrix::zeros(6, 5);
        j.view_mut((0, 0), (3, 5)).copy_from(&robot.contact_jac[0]);
        j.view_mut((3, 0), (3, 5)).copy_from(&robot.contact_jac[1]);
        let mut out = DMatrix::zeros(dimv + 6, dimv + 6);
        robot.compute_mjtjinv(&robot.mass.clone(), &j, dimf, &mut out);
        // assemble [M Jᵀ; J 0] and check the product is the identity
        let n = dimv + dimf;
        let mut kkt = DMatrix::zeros(n, n);
        kkt.view_mut((0, 0), (dimv, dimv)).copy_from(&robot.mass);
        kkt.view_mut((0, dimv), (dimv, dimf))
            .copy_from(&j.view((0, 0), (dimf, dimv)).transpose());
        kkt.view_mut((dimv, 0), (dimf, dimv))
            .copy_from(&j.view((0, 0), (dimf, dimv)));
        let prod = kkt * out.view((0, 0), (n, n));
        for r in 0..n {
            for c in 0..n {
                let expect = if r == c { 1.0 } else { 0.0 };
                assert!((prod[(r, c)] - expect).abs() < 1e-9, "entry ({r},{c})");
            }
        }
    }

    #[test]
    fn test_floating_base_normalization_is_idempotent() {
        let robot = FloatingChainModel::new(3, 0);
        let mut q = DVector::zeros(robot.dims().dimq);
        q[3] = 0.3;
        q[4] = -0.4;
        q[5] = 0.1;
        q[6] = 2.0;
        robot.normalize_configuration(&mut q);
        let norm = (q[3] * q[3] + q[4] * q[4] + q[5] * q[5] + q[6] * q[6]).sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
        let q_before = q.clone();
        robot.normalize_configuration(&mut q);
        assert!((q - q_before).norm() < 1e-15);
    }

    #[test]
    fn test_floating_base_integration_stays_on_manifold() {
        let robot = FloatingChainModel::new(2, 0);
        let mut q = robot.generate_feasible_configuration();
        let mut v = DVector::zeros(robot.dims().dimv);
        v[0] = 0.5;
        v[3] = 0.2; // angular rate about x
        v[6] = -0.3;
        let mut q_next = q.clone();
        for _ in 0..50 {
            robot.integrate_configuration(&q, &v, 0.01, &mut q_next);
            q.copy_from(&q_next);
        }
        let norm = (q[3] * q[3] + q[4] * q[4] + q[5] * q[5] + q[6] * q[6]).sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        // subtract of an integrate recovers the step for small motions
        let mut q2 = q.clone();
        robot.integrate_configuration(&q, &v, 0.01, &mut q2);
        let mut diff = DVector::zeros(robot.dims().dimv);
        robot.subtract_configuration(&q2, &q, &mut diff);
        assert!((diff - 0.01 * &v).norm() < 1e-8);
    }
}
