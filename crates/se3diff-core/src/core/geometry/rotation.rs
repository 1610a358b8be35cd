use crate::core::batch::{Batch, ShapeError};
use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};

/// Angles at or below this value use the Taylor expansion of `θ / sin(θ/2)`.
pub const SMALL_ANGLE_THRESHOLD: f64 = 1e-3;

/// Default regularizer for the closed-form branch of [`quaternion_to_rotvec`].
pub const QUATERNION_EPS: f64 = 1e-6;

// Keeps the closed-form branch finite at θ = 0 without shifting it measurably.
const MATRIX_EPS: f64 = f64::EPSILON;

/// An element of SO(3).
///
/// Storage is private; callers move between the matrix, unit quaternion and
/// rotation-vector (axis-angle) representations through the conversion methods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    inner: Rotation3<f64>,
}

impl Default for Rotation {
    fn default() -> Self {
        Self::identity()
    }
}

impl Rotation {
    pub fn identity() -> Self {
        Self {
            inner: Rotation3::identity(),
        }
    }

    /// The matrix must be orthonormal with determinant +1; this is not checked.
    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self {
            inner: Rotation3::from_matrix_unchecked(matrix),
        }
    }

    pub fn from_quaternion(quaternion: &UnitQuaternion<f64>) -> Self {
        Self {
            inner: quaternion.to_rotation_matrix(),
        }
    }

    pub fn from_rotvec(rotvec: &Vector3<f64>) -> Self {
        Self::from_quaternion(&UnitQuaternion::from_scaled_axis(*rotvec))
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        *self.inner.matrix()
    }

    pub fn to_quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&self.inner)
    }

    pub fn to_rotvec(&self) -> Vector3<f64> {
        quaternion_to_rotvec_single(self.to_quaternion().quaternion(), MATRIX_EPS)
    }

    pub fn inverse(&self) -> Self {
        Self {
            inner: self.inner.inverse(),
        }
    }

    /// Returns `self · other`, i.e. `other` is applied first.
    pub fn compose(&self, other: &Rotation) -> Self {
        Self {
            inner: self.inner * other.inner,
        }
    }

    /// Rotation angle in `[0, π]`.
    pub fn angle(&self) -> f64 {
        self.to_rotvec().norm()
    }

    /// Geodesic distance on SO(3), the angle of `self⁻¹ · other`.
    pub fn angle_to(&self, other: &Rotation) -> f64 {
        self.inverse().compose(other).angle()
    }
}

#[inline]
fn small_angle_scale(angle: f64) -> f64 {
    let angle2 = angle * angle;
    2.0 + angle2 / 12.0 + 7.0 * angle2 * angle2 / 2880.0
}

#[inline]
fn large_angle_scale(angle: f64, eps: f64) -> f64 {
    angle / (angle / 2.0 + eps).sin()
}

#[inline]
fn indicator(condition: bool) -> f64 {
    if condition { 1.0 } else { 0.0 }
}

/// Converts a unit quaternion `(w, x, y, z)` to its rotation vector.
///
/// The quaternion is first moved to the `w >= 0` half of the double cover so
/// that the angle lies in `[0, π]`. Both scale branches are evaluated for every
/// input and blended by a 0/1 weight.
pub fn quaternion_to_rotvec_single(quaternion: &Quaternion<f64>, eps: f64) -> Vector3<f64> {
    let quaternion = *quaternion;
    let flip = indicator(quaternion.w < 0.0);
    let q = (-quaternion) * flip + quaternion * (1.0 - flip);

    let imag = q.imag();
    let angle = 2.0 * imag.norm().atan2(q.w);

    let small = indicator(angle <= SMALL_ANGLE_THRESHOLD);
    let scale = small * small_angle_scale(angle) + (1.0 - small) * large_angle_scale(angle, eps);
    imag * scale
}

pub fn quaternion_to_rotvec(quaternions: &Batch<Quaternion<f64>>, eps: f64) -> Batch<Vector3<f64>> {
    quaternions.par_map(|q| quaternion_to_rotvec_single(q, eps))
}

pub fn rotation_to_rotvec(rotations: &Batch<Rotation>) -> Batch<Vector3<f64>> {
    rotations.par_map(Rotation::to_rotvec)
}

pub fn rotvec_to_rotation(rotvecs: &Batch<Vector3<f64>>) -> Batch<Rotation> {
    rotvecs.par_map(Rotation::from_rotvec)
}

/// Rotation vector of `R(a) · R(b)` for each entry.
pub fn compose_rotvec(
    a: &Batch<Vector3<f64>>,
    b: &Batch<Vector3<f64>>,
) -> Result<Batch<Vector3<f64>>, ShapeError> {
    a.try_zip_map(b, |ra, rb| {
        Rotation::from_rotvec(ra)
            .compose(&Rotation::from_rotvec(rb))
            .to_rotvec()
    })
}
