use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// Errors raised when building a [`Transform`] from raw numbers.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("bottom row must be [0, 0, 0, 1], got {row:?}")]
    NotAffine { row: [f64; 4] },
    #[error("transform contains non-finite entries")]
    NonFinite,
}

/// 4×4 homogeneous transform: rotation/linear part in the upper-left 3×3,
/// translation in the right column.
///
/// The bottom row is always exactly `[0, 0, 0, 1]`; every constructor either
/// builds it that way or rejects the input. Serialized as a row-major
/// `[[f64; 4]; 4]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 4]; 4]", into = "[[f64; 4]; 4]")]
pub struct Transform {
    m: Matrix4<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            m: Matrix4::identity(),
        }
    }

    /// Pure translation.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self::from_parts(Matrix3::identity(), Vector3::new(x, y, z))
    }

    /// Rotation by `theta` radians about +Z (counter-clockwise seen from above).
    pub fn from_rotation_z(theta: f64) -> Self {
        let r = Rotation3::from_axis_angle(&Vector3::z_axis(), theta);
        Self::from_parts(*r.matrix(), Vector3::zeros())
    }

    /// Assemble from a linear block and a translation.
    pub fn from_parts(linear: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&linear);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        Self { m }
    }

    /// Validate and wrap a raw 4×4 matrix.
    pub fn try_from_matrix(m: Matrix4<f64>) -> Result<Self, TransformError> {
        if m.iter().any(|v| !v.is_finite()) {
            return Err(TransformError::NonFinite);
        }
        let row = [m[(3, 0)], m[(3, 1)], m[(3, 2)], m[(3, 3)]];
        if row != [0.0, 0.0, 0.0, 1.0] {
            return Err(TransformError::NotAffine { row });
        }
        Ok(Self { m })
    }

    pub fn from_array(rows: [[f64; 4]; 4]) -> Result<Self, TransformError> {
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::try_from_matrix(Matrix4::from_row_slice(&flat))
    }

    pub fn to_array(&self) -> [[f64; 4]; 4] {
        let mut out = [[0.0; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.m[(r, c)];
            }
        }
        out
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.m
    }

    /// Upper-left 3×3 block.
    pub fn linear(&self) -> Matrix3<f64> {
        self.m.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.m.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Position of the frame origin, i.e. the translation as a point.
    pub fn position(&self) -> Point3<f64> {
        Point3::from(self.translation())
    }

    /// `self ∘ other`: `other` is applied first, then `self`.
    #[inline]
    pub fn compose(&self, other: &Transform) -> Transform {
        Transform { m: self.m * other.m }
    }

    /// Inverse of the affine map, or `None` when the linear block is singular.
    pub fn inverse(&self) -> Option<Transform> {
        let linear_inv = self.linear().try_inverse()?;
        let t = -(linear_inv * self.translation());
        Some(Self::from_parts(linear_inv, t))
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.linear() * p.coords + self.translation())
    }

    /// Max absolute element-wise difference to `other`.
    pub fn max_abs_diff(&self, other: &Transform) -> f64 {
        (self.m - other.m).amax()
    }

    pub fn approx_eq(&self, other: &Transform, tol: f64) -> bool {
        self.max_abs_diff(other) <= tol
    }

    /// True when the linear block is orthonormal with determinant +1.
    pub fn is_rigid(&self, tol: f64) -> bool {
        let r = self.linear();
        let gram = r.transpose() * r;
        (gram - Matrix3::identity()).amax() <= tol && (r.determinant() - 1.0).abs() <= tol
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        self.compose(&rhs)
    }
}

impl Mul<&Transform> for &Transform {
    type Output = Transform;

    fn mul(self, rhs: &Transform) -> Transform {
        self.compose(rhs)
    }
}

impl TryFrom<[[f64; 4]; 4]> for Transform {
    type Error = TransformError;

    fn try_from(rows: [[f64; 4]; 4]) -> Result<Self, Self::Error> {
        Self::from_array(rows)
    }
}

impl From<Transform> for [[f64; 4]; 4] {
    fn from(t: Transform) -> Self {
        t.to_array()
    }
}
