//! Analytic gradients of quality measures with respect to one tet vertex.
//!
//! The smoother maximizes the worst of a set of *quality functions* around a
//! vertex. For the sine measures every incident tet contributes six functions
//! (one per dihedral angle); for the ratio measures it contributes one. Each
//! function is reported as its current value together with its gradient with
//! respect to the moving vertex.
//!
//! Gradients are obtained by logarithmic differentiation of the closed forms
//! in [`crate::geometry::quality`], which keeps every formula a sum of
//! per-factor terms (volume, face areas, edge lengths, circumradius).

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;

use crate::geometry::quality::{
    QualityMeasure, TET_EDGES, TetGeometry, circumcenter_numerator, edge_faces,
};

/// A quality function value and its gradient.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityGradient {
    /// Current value of the function.
    pub value: f64,
    /// Gradient with respect to the moving vertex.
    pub gradient: Vector3<f64>,
}

/// Functions contributed by one tet; at most six.
pub type GradientBuffer = SmallVec<[QualityGradient; 6]>;

/// Even permutations bringing local vertex `i` to position 0.
const ROTATIONS: [[usize; 4]; 4] = [[0, 1, 2, 3], [1, 0, 3, 2], [2, 3, 0, 1], [3, 2, 1, 0]];

/// Reorders `points` so that `points[moving]` comes first without changing the
/// orientation.
#[must_use]
pub fn rotate_to_front(points: &[Point3<f64>; 4], moving: usize) -> [Point3<f64>; 4] {
    ROTATIONS[moving & 3].map(|i| points[i])
}

/// Gradient of `orient3d` with respect to `points[0]`.
#[inline]
fn orient_gradient(points: &[Point3<f64>; 4]) -> Vector3<f64> {
    (points[1] - points[3]).cross(&(points[2] - points[3]))
}

/// Gradient of the area of face `(p, a, b)` with respect to `p`.
#[must_use]
pub fn face_area_gradient(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> Vector3<f64> {
    let normal = (a - p).cross(&(b - p));
    let length = normal.norm();
    if length == 0.0 {
        return Vector3::zeros();
    }
    (normal / length).cross(&(b - a)) * 0.5
}

/// Area gradients for the four faces, with respect to `points[0]`.
///
/// Face 0 does not contain the moving vertex and has a zero gradient.
fn area_gradients(points: &[Point3<f64>; 4]) -> [Vector3<f64>; 4] {
    let mut grads = [Vector3::zeros(); 4];
    for (face, grad) in grads.iter_mut().enumerate().skip(1) {
        let mut others = (1..4).filter(|&v| v != face);
        let (Some(a), Some(b)) = (others.next(), others.next()) else {
            continue;
        };
        *grad = face_area_gradient(&points[0], &points[a], &points[b]);
    }
    grads
}

/// Dihedral sine functions and gradients for `points[0]`.
///
/// When `warp` is set, the sines of obtuse angles (and their gradients) are
/// scaled by the factor.
fn sine_gradients(points: &[Point3<f64>; 4], warp: Option<f64>) -> GradientBuffer {
    let geometry = TetGeometry::new(points);
    let grad_orient = orient_gradient(points);
    let grad_area = area_gradients(points);
    let areas = [0, 1, 2, 3].map(|i| geometry.face_area(i));

    TET_EDGES
        .iter()
        .map(|&(i, j)| {
            let mut value = geometry.dihedral_sine(i, j);
            let (k, l) = edge_faces(i, j);
            let mut gradient = Vector3::zeros();
            if value != 0.0 && areas[k] > 0.0 && areas[l] > 0.0 {
                let mut log_grad = grad_orient / geometry.orient
                    - grad_area[k] / areas[k]
                    - grad_area[l] / areas[l];
                if i == 0 {
                    let l2 = geometry.edge_lengths_squared[i][j];
                    if l2 > 0.0 {
                        log_grad += (points[0] - points[j]) / l2;
                    }
                }
                gradient = log_grad * value;
            }
            if let Some(factor) = warp.filter(|_| geometry.is_obtuse(i, j)) {
                value *= factor;
                gradient *= factor;
            }
            QualityGradient { value, gradient }
        })
        .collect()
}

fn radius_ratio_gradient(points: &[Point3<f64>; 4]) -> QualityGradient {
    let geometry = TetGeometry::new(points);
    let value = crate::geometry::quality::radius_ratio(&geometry);
    if value == 0.0 {
        return QualityGradient {
            value,
            gradient: Vector3::zeros(),
        };
    }

    let area_sum = geometry.area_sum();
    let grad_area_sum: Vector3<f64> = area_gradients(points).iter().sum();

    let o = points[0] - points[3];
    let d = points[1] - points[3];
    let f = points[2] - points[3];
    let center = circumcenter_numerator(points);
    let z = center.norm();
    let grad_z = if z > 0.0 {
        let c_hat = center / z;
        o * (2.0 * c_hat.dot(&d.cross(&f)))
            + c_hat.cross(&f) * d.norm_squared()
            + d.cross(&c_hat) * f.norm_squared()
    } else {
        Vector3::zeros()
    };

    let mut log_grad = orient_gradient(points) / geometry.orient;
    if z > 0.0 {
        log_grad -= grad_z * (0.5 / z);
    }
    if area_sum > 0.0 {
        log_grad -= grad_area_sum * (0.5 / area_sum);
    }
    QualityGradient {
        value,
        gradient: log_grad * value,
    }
}

fn volume_length_ratio_gradient(points: &[Point3<f64>; 4]) -> QualityGradient {
    let geometry = TetGeometry::new(points);
    let value = crate::geometry::quality::volume_length_ratio(&geometry);
    if value == 0.0 {
        return QualityGradient {
            value,
            gradient: Vector3::zeros(),
        };
    }
    let length_sum: f64 = TET_EDGES
        .iter()
        .map(|&(i, j)| geometry.edge_lengths_squared[i][j])
        .sum();
    let grad_length_sum: Vector3<f64> = (1..4).map(|j| (points[0] - points[j]) * 2.0).sum();
    let log_grad =
        orient_gradient(points) / geometry.orient - grad_length_sum * (1.5 / length_sum);
    QualityGradient {
        value,
        gradient: log_grad * value,
    }
}

/// Quality functions of one tet and their gradients with respect to the
/// vertex at local index `moving`.
///
/// `measure` must have a gradient; other measures fall back to
/// [`QualityMeasure::smoothing_measure`].
#[must_use]
pub fn quality_gradients(
    measure: QualityMeasure,
    sine_warp_factor: f64,
    points: &[Point3<f64>; 4],
    moving: usize,
) -> GradientBuffer {
    let points = rotate_to_front(points, moving);
    match measure.smoothing_measure() {
        QualityMeasure::WarpedMinSine => sine_gradients(&points, Some(sine_warp_factor)),
        QualityMeasure::RadiusRatio => std::iter::once(radius_ratio_gradient(&points)).collect(),
        QualityMeasure::VolumeLengthRatio => {
            std::iter::once(volume_length_ratio_gradient(&points)).collect()
        }
        _ => sine_gradients(&points, None),
    }
}

/// Gradient of the signed volume with respect to `points[moving]`.
#[must_use]
pub fn volume_gradient(points: &[Point3<f64>; 4], moving: usize) -> Vector3<f64> {
    orient_gradient(&rotate_to_front(points, moving)) / 6.0
}

/// Removes the component of `v` along the unit `normal`.
#[inline]
#[must_use]
pub fn project_onto_plane(v: &Vector3<f64>, normal: &Vector3<f64>) -> Vector3<f64> {
    v - normal * v.dot(normal)
}

/// Keeps only the component of `v` along the unit `direction`.
#[inline]
#[must_use]
pub fn project_onto_line(v: &Vector3<f64>, direction: &Vector3<f64>) -> Vector3<f64> {
    direction * v.dot(direction)
}

// =============================================================================
// TESTS
// =============================================================================
