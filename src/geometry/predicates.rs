//! Geometric predicates for tetrahedral meshes.
//!
//! Orientation is decided with Shewchuk's adaptive-precision `orient3d`
//! (via the `robust` crate), so the sign of every orientation test is exact
//! even for nearly coplanar points. Quality measures reuse the same value as
//! six times the signed volume.
//!
//! # Orientation convention
//!
//! A tetrahedron `(a, b, c, d)` is *positively oriented* when
//! `orient3d(a, b, c, d) > 0`, i.e. `d` lies below the plane through `a`, `b`,
//! `c` where "below" means that `a`, `b`, `c` appear counterclockwise when
//! viewed from above. Every live tet in a complex is positively oriented.
//!
//! # References
//!
//! - Shewchuk, J. R. (1997) - "Adaptive Precision Floating-Point Arithmetic and
//!   Fast Robust Geometric Predicates"

use nalgebra::Point3;
use robust::Coord3D;

/// Represents the orientation of a tetrahedron.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// `orient3d < 0`
    NEGATIVE,
    /// The four points are exactly coplanar.
    DEGENERATE,
    /// `orient3d > 0`
    POSITIVE,
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NEGATIVE => write!(f, "NEGATIVE"),
            Self::DEGENERATE => write!(f, "DEGENERATE"),
            Self::POSITIVE => write!(f, "POSITIVE"),
        }
    }
}

#[inline]
fn coord(p: &Point3<f64>) -> Coord3D<f64> {
    Coord3D {
        x: p.x,
        y: p.y,
        z: p.z,
    }
}

/// Exact orientation test: six times the signed volume of `(a, b, c, d)`.
///
/// The magnitude is the floating-point estimate; the sign is exact.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Point3;
/// use tetimprove::geometry::predicates::orient3d;
///
/// let a = Point3::new(0.0, 0.0, 0.0);
/// let b = Point3::new(0.0, 1.0, 0.0);
/// let c = Point3::new(1.0, 0.0, 0.0);
/// let d = Point3::new(0.0, 0.0, 1.0);
/// assert!(orient3d(&a, &b, &c, &d) > 0.0);
/// assert!(orient3d(&b, &a, &c, &d) < 0.0);
/// ```
#[inline]
#[must_use]
pub fn orient3d(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, d: &Point3<f64>) -> f64 {
    robust::orient3d(coord(a), coord(b), coord(c), coord(d))
}

/// Classifies the orientation of a tetrahedron.
#[must_use]
pub fn tet_orientation(points: &[Point3<f64>; 4]) -> Orientation {
    let det = orient3d(&points[0], &points[1], &points[2], &points[3]);
    if det > 0.0 {
        Orientation::POSITIVE
    } else if det < 0.0 {
        Orientation::NEGATIVE
    } else {
        Orientation::DEGENERATE
    }
}

/// Signed volume of the tetrahedron `points`.
#[inline]
#[must_use]
pub fn tet_volume(points: &[Point3<f64>; 4]) -> f64 {
    orient3d(&points[0], &points[1], &points[2], &points[3]) / 6.0
}

/// Barycenter of four points.
#[inline]
#[must_use]
pub fn tet_barycenter(points: &[Point3<f64>; 4]) -> Point3<f64> {
    Point3::from((points[0].coords + points[1].coords + points[2].coords + points[3].coords) / 4.0)
}

/// Barycenter of three points.
#[inline]
#[must_use]
pub fn face_barycenter(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Point3<f64> {
    Point3::from((a.coords + b.coords + c.coords) / 3.0)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_tet() -> [Point3<f64>; 4] {
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]
    }

    #[test]
    fn test_orientation_sign_and_swap() {
        let [a, b, c, d] = unit_tet();
        assert_eq!(tet_orientation(&[a, b, c, d]), Orientation::POSITIVE);
        assert_eq!(tet_orientation(&[b, a, c, d]), Orientation::NEGATIVE);
        // even permutation keeps the sign
        assert_eq!(tet_orientation(&[b, c, a, d]), Orientation::POSITIVE);
    }

    #[test]
    fn test_volume_of_unit_tet() {
        assert_relative_eq!(tet_volume(&unit_tet()), 1.0 / 6.0, epsilon = 1e-15);
    }

    #[test]
    fn test_coplanar_is_degenerate() {
        let pts = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.3, 0.3, 0.0),
        ];
        assert_eq!(tet_orientation(&pts), Orientation::DEGENERATE);
        assert_eq!(format!("{}", Orientation::DEGENERATE), "DEGENERATE");
    }

    #[test]
    fn test_barycenters() {
        let pts = unit_tet();
        let center = tet_barycenter(&pts);
        assert_relative_eq!(center.x, 0.25);
        assert_relative_eq!(center.y, 0.25);
        assert_relative_eq!(center.z, 0.25);
        let fc = face_barycenter(&pts[1], &pts[2], &pts[3]);
        assert_relative_eq!(fc.x + fc.y + fc.z, 1.0, epsilon = 1e-15);
    }
}
