//! Surface quadric error metrics.
//!
//! A quadric accumulates the squared distances to the planes of the boundary
//! faces around a vertex, weighted by face area:
//!
//! ```text
//! Q(v) = vᵀ A v + 2 bᵀ v + c,   A = Σ w n nᵀ,   b = Σ w d n,   c = Σ w d²
//! ```
//!
//! It is normalized by the face-area sum times the harmonic mean of the squared
//! incident edge lengths, which makes the error scale-free. The smoother uses
//! it to keep boundary vertices close to the original surface.

use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Area-weighted sum of squared plane distances around one boundary vertex.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quadric {
    a: Matrix3<f64>,
    b: Vector3<f64>,
    c: f64,
    face_count: usize,
    area_sum: f64,
    inverse_edge_sum: f64,
    origin: Point3<f64>,
}

impl Quadric {
    /// Empty quadric anchored at `origin`, the vertex's original position.
    #[must_use]
    pub fn new(origin: Point3<f64>) -> Self {
        Self {
            a: Matrix3::zeros(),
            b: Vector3::zeros(),
            c: 0.0,
            face_count: 0,
            area_sum: 0.0,
            inverse_edge_sum: 0.0,
            origin,
        }
    }

    /// Builds and normalizes the quadric of `origin` from its incident
    /// boundary faces.
    ///
    /// Returns `None` if fewer than three faces are given or all are degenerate.
    #[must_use]
    pub fn from_faces(origin: Point3<f64>, faces: &[[Point3<f64>; 3]]) -> Option<Self> {
        let mut quadric = Self::new(origin);
        for face in faces {
            quadric.add_face(face);
        }
        quadric.normalize().then_some(quadric)
    }

    /// Position of the vertex when the quadric was built.
    #[must_use]
    pub const fn origin(&self) -> Point3<f64> {
        self.origin
    }

    /// Number of faces accumulated so far.
    #[must_use]
    pub const fn face_count(&self) -> usize {
        self.face_count
    }

    /// Accumulates the fundamental quadric of one face.
    ///
    /// The first corner is taken as the face's apex for the edge-length terms.
    /// Degenerate faces are ignored.
    pub fn add_face(&mut self, face: &[Point3<f64>; 3]) {
        let e1 = face[1] - face[0];
        let e2 = face[2] - face[0];
        let cross = e1.cross(&e2);
        let area = cross.norm() / 2.0;
        if area <= 0.0 {
            return;
        }
        let normal = cross / (2.0 * area);
        let d = -normal.dot(&face[0].coords);

        self.face_count += 1;
        self.area_sum += area;
        // each edge shows up in two faces
        self.inverse_edge_sum += 0.5 / e1.norm_squared() + 0.5 / e2.norm_squared();

        self.a += normal * normal.transpose() * area;
        self.b += normal * (d * area);
        self.c += d * d * area;
    }

    /// Divides by the face-area sum times the harmonic mean of the squared
    /// edge lengths.
    ///
    /// Returns `false` when the quadric cannot be normalized.
    pub fn normalize(&mut self) -> bool {
        if self.face_count < 3 || self.area_sum <= 0.0 || self.inverse_edge_sum <= 0.0 {
            return false;
        }
        #[allow(clippy::cast_precision_loss)]
        let harmonic = self.face_count as f64 / self.inverse_edge_sum;
        let factor = harmonic * self.area_sum;
        self.a /= factor;
        self.b /= factor;
        self.c /= factor;
        true
    }

    /// Error `Q(v)` at `position`.
    #[must_use]
    pub fn error(&self, position: &Point3<f64>) -> f64 {
        let v = position.coords;
        (v.transpose() * self.a * v)[(0, 0)] + 2.0 * self.b.dot(&v) + self.c
    }

    /// Direction of steepest *decrease* of the error, `-(2 A v + 2 b)`.
    #[must_use]
    pub fn descent(&self, position: &Point3<f64>) -> Vector3<f64> {
        -2.0 * (self.a * position.coords + self.b)
    }
}

/// Maps a quadric error onto the quality scale: `offset - scale · error`,
/// scaled by `sine_scale` and clamped at zero.
#[must_use]
pub fn quadric_quality(error: f64, offset: f64, scale: f64, sine_scale: f64) -> f64 {
    ((offset - scale * error) * sine_scale).max(0.0)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Fan of faces around the origin, all in the plane `z = 0`.
    fn planar_fan() -> Vec<[Point3<f64>; 3]> {
        let rim = [
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
        ];
        (0..4)
            .map(|i| [Point3::origin(), rim[i], rim[(i + 1) % 4]])
            .collect()
    }

    #[test]
    fn test_planar_quadric_measures_height() {
        let quadric = Quadric::from_faces(Point3::origin(), &planar_fan()).unwrap();
        assert_relative_eq!(quadric.error(&Point3::origin()), 0.0, epsilon = 1e-15);
        assert_relative_eq!(quadric.error(&Point3::new(0.3, -0.2, 0.0)), 0.0, epsilon = 1e-15);
        let up = quadric.error(&Point3::new(0.0, 0.0, 0.1));
        let further = quadric.error(&Point3::new(0.0, 0.0, 0.2));
        assert!(up > 0.0);
        assert_relative_eq!(further, 4.0 * up, epsilon = 1e-12);
    }

    #[test]
    fn test_descent_points_back_to_surface() {
        let quadric = Quadric::from_faces(Point3::origin(), &planar_fan()).unwrap();
        let g = quadric.descent(&Point3::new(0.0, 0.0, 0.5));
        assert!(g.z < 0.0);
        assert_relative_eq!(g.x, 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_too_few_faces() {
        let fan = planar_fan();
        assert!(Quadric::from_faces(Point3::origin(), &fan[..2]).is_none());
        assert_eq!(Quadric::new(Point3::origin()).face_count(), 0);
    }

    #[test]
    fn test_quality_mapping_clamps() {
        assert_relative_eq!(quadric_quality(0.0, 0.8, 300.0, 1.0), 0.8);
        assert_relative_eq!(quadric_quality(1.0, 0.8, 300.0, 1.0), 0.0);
    }
}
