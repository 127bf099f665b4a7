//! Deformation tensors for anisotropic quality evaluation.
//!
//! In anisotropic mode every quality query first maps the four corners of a
//! tet through a 3×3 tensor `E` sampled at the tet's barycenter, so that a tet
//! which is well shaped *in the deformed space* scores well. Computing `E` is
//! the caller's business; the engine only consumes it through
//! [`DeformationField`].

use nalgebra::{Matrix3, Point3, Vector3};

use crate::geometry::predicates::tet_barycenter;

/// Oracle returning the deformation tensor at a point.
pub trait DeformationField {
    /// Tensor `E` at `point`. Points are transformed as `p' = E p`.
    fn tensor(&self, point: &Point3<f64>) -> Matrix3<f64>;
}

impl<F> DeformationField for F
where
    F: Fn(&Point3<f64>) -> Matrix3<f64>,
{
    fn tensor(&self, point: &Point3<f64>) -> Matrix3<f64> {
        self(point)
    }
}

/// The same tensor everywhere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UniformDeformation {
    tensor: Matrix3<f64>,
}

impl UniformDeformation {
    /// Uses `tensor` everywhere.
    #[must_use]
    pub const fn new(tensor: Matrix3<f64>) -> Self {
        Self { tensor }
    }

    /// Axis-aligned scaling.
    #[must_use]
    pub fn scale(sx: f64, sy: f64, sz: f64) -> Self {
        Self::new(Matrix3::from_diagonal(&Vector3::new(sx, sy, sz)))
    }

    /// No deformation.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }
}

impl Default for UniformDeformation {
    fn default() -> Self {
        Self::identity()
    }
}

impl DeformationField for UniformDeformation {
    fn tensor(&self, _point: &Point3<f64>) -> Matrix3<f64> {
        self.tensor
    }
}

/// Two unit vectors orthogonal to `v` and to each other.
#[must_use]
pub fn orthonormal_complement(v: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let second = if v.x.abs() > v.y.abs() {
        Vector3::new(-v.z, 0.0, v.x) / v.x.hypot(v.z)
    } else {
        Vector3::new(0.0, v.z, -v.y) / v.y.hypot(v.z)
    };
    let third = v.cross(&second).normalize();
    (second, third)
}

/// Tensor `Σ eᵢ² vᵢ vᵢᵀ / |vᵢ|²` with eigenvectors `axes` and per-axis
/// stretch `stretch`.
#[must_use]
pub fn tensor_from_eigen(axes: [Vector3<f64>; 3], stretch: [f64; 3]) -> Matrix3<f64> {
    axes.iter()
        .zip(stretch)
        .map(|(axis, e)| {
            let scaled = axis.normalize() * e;
            scaled * scaled.transpose()
        })
        .sum()
}

/// Applies `E` to one point.
#[inline]
#[must_use]
pub fn transform_point(tensor: &Matrix3<f64>, point: &Point3<f64>) -> Point3<f64> {
    Point3::from(tensor * point.coords)
}

/// Maps the corners of a tet through the tensor sampled at its barycenter.
///
/// Returns the transformed corners and the tensor used, so gradients computed
/// in the deformed space can be pulled back with `Eᵀ`.
#[must_use]
pub fn transform_tet(
    field: &dyn DeformationField,
    points: &[Point3<f64>; 4],
) -> ([Point3<f64>; 4], Matrix3<f64>) {
    let tensor = field.tensor(&tet_barycenter(points));
    (points.map(|p| transform_point(&tensor, &p)), tensor)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_leaves_points() {
        let pts = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let (mapped, tensor) = transform_tet(&UniformDeformation::default(), &pts);
        assert_eq!(mapped, pts);
        assert_eq!(tensor, Matrix3::identity());
    }

    #[test]
    fn test_scale_stretches_axis() {
        let field = UniformDeformation::scale(3.0, 1.0, 1.0);
        let p = transform_point(&field.tensor(&Point3::origin()), &Point3::new(1.0, 2.0, 3.0));
        assert_eq!(p, Point3::new(3.0, 2.0, 3.0));
    }

    #[test]
    fn test_closure_is_a_field() {
        let field = |p: &Point3<f64>| Matrix3::identity() * (1.0 + p.x);
        let t = DeformationField::tensor(&field, &Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(t[(0, 0)], 2.0);
    }

    #[test]
    fn test_eigen_tensor() {
        let v = Vector3::new(1.0, 1.0, 0.0);
        let (a, b) = orthonormal_complement(&v);
        assert_relative_eq!(a.dot(&v), 0.0, epsilon = 1e-15);
        assert_relative_eq!(b.dot(&v), 0.0, epsilon = 1e-15);
        assert_relative_eq!(a.dot(&b), 0.0, epsilon = 1e-15);
        let tensor = tensor_from_eigen([v, a, b], [2.0, 1.0, 1.0]);
        let stretched = tensor * v.normalize();
        assert_relative_eq!(stretched.norm(), 4.0, epsilon = 1e-12);
        assert_relative_eq!((tensor * a).norm(), 1.0, epsilon = 1e-12);
    }
}
