//! Geometric quality measures for tetrahedra.
//!
//! Every measure follows the same sign convention: a value `<= 0` marks an
//! inverted or degenerate tet, and larger is better. The sine-based measures
//! and the ratio measures reach their maximum on the regular tetrahedron.
//!
//! # Quality Metrics
//!
//! - **Minimum sine**: smallest sine of the six dihedral angles. Penalises both
//!   very small and very large dihedral angles. The regular tetrahedron scores
//!   [`SINE_EQUILATERAL`].
//! - **Warped minimum sine**: as above, but the sine of an obtuse dihedral angle
//!   is scaled down by a warp factor so large angles are penalised harder.
//! - **Mean sine**: mean of the six dihedral sines.
//! - **Minimum sine and edge ratio**: minimum sine, capped by the
//!   shortest/longest edge ratio (scaled to agree on the regular tet).
//! - **Radius ratio**: `sqrt(3 r_in / r_circ)`, equal to 1 for the regular tet.
//! - **Volume-length ratio**: `6√2 V / l_rms³`, equal to 1 for the regular tet.
//! - **Minimum / maximum angle**: dihedral angles in degrees; the maximum-angle
//!   measure reports `180° - max` so that larger stays better.
//!
//! # References
//!
//! - Shewchuk, J.R. "What Is a Good Linear Element? Interpolation, Conditioning,
//!   Anisotropy, and Quality Measures" (2002)
//! - Klingner, B.M. and Shewchuk, J.R. "Aggressive Tetrahedral Mesh Improvement"
//!   *Proceedings of the 16th International Meshing Roundtable* (2007)
//! - Liu, A. and Joe, B. "Relationship between tetrahedron shape measures"
//!   *BIT Numerical Mathematics* 34.2 (1994): 268-287

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::predicates::orient3d;

/// Sine of the dihedral angle of the regular tetrahedron (`2√2 / 3`).
pub const SINE_EQUILATERAL: f64 = 0.942_809_041_582_063_4;

/// Default factor applied to the sine of obtuse dihedral angles by
/// [`QualityMeasure::WarpedMinSine`].
pub const DEFAULT_SINE_WARP_FACTOR: f64 = 0.75;

/// Number of thresholds used for the thresholded quality means.
pub const NUM_MEAN_THRESHOLDS: usize = 7;

/// Sines of 1°, 5°, 10°, 15°, 25°, 35° and 45°.
const SINE_THRESHOLDS: [f64; NUM_MEAN_THRESHOLDS] = [
    0.017_452_406_44,
    0.087_155_742_75,
    0.173_648_177_67,
    0.258_819_045_1,
    0.422_618_261_74,
    0.573_576_436_35,
    0.707_106_781_19,
];

const RATIO_THRESHOLDS: [f64; NUM_MEAN_THRESHOLDS] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];

const ANGLE_THRESHOLDS: [f64; NUM_MEAN_THRESHOLDS] = [1.0, 5.0, 10.0, 15.0, 25.0, 35.0, 45.0];

/// The six edges of a tetrahedron as pairs of local vertex indices.
pub const TET_EDGES: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Selectable tetrahedron quality measure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityMeasure {
    /// Minimum sine of the six dihedral angles.
    #[default]
    MinSine,
    /// Minimum sine with obtuse angles warped down.
    WarpedMinSine,
    /// Mean sine of the six dihedral angles.
    MeanSine,
    /// Minimum of the minimum sine and the scaled shortest/longest edge ratio.
    MinSineAndEdgeRatio,
    /// Root of the normalized inradius/circumradius ratio.
    RadiusRatio,
    /// Volume divided by the cube of the root-mean-square edge length.
    VolumeLengthRatio,
    /// Smallest dihedral angle in degrees.
    MinAngle,
    /// `180°` minus the largest dihedral angle.
    MaxAngle,
}

impl QualityMeasure {
    /// Whether the measure has a closed-form gradient usable by the smoother.
    #[must_use]
    pub const fn has_gradient(self) -> bool {
        matches!(
            self,
            Self::MinSine | Self::WarpedMinSine | Self::RadiusRatio | Self::VolumeLengthRatio
        )
    }

    /// Measure optimized by the smoother when this one is active.
    ///
    /// Measures without a gradient are smoothed on the dihedral sines.
    #[must_use]
    pub const fn smoothing_measure(self) -> Self {
        if self.has_gradient() {
            self
        } else {
            Self::MinSine
        }
    }

    /// Whether values of this measure are (scaled) dihedral sines.
    #[must_use]
    pub const fn is_sine_based(self) -> bool {
        matches!(
            self,
            Self::MinSine | Self::WarpedMinSine | Self::MeanSine | Self::MinSineAndEdgeRatio
        )
    }

    /// Cut-off values used for thresholded means of this measure.
    #[must_use]
    pub const fn mean_thresholds(self) -> [f64; NUM_MEAN_THRESHOLDS] {
        match self {
            Self::MinSine | Self::WarpedMinSine | Self::MeanSine | Self::MinSineAndEdgeRatio => {
                SINE_THRESHOLDS
            }
            Self::RadiusRatio | Self::VolumeLengthRatio => RATIO_THRESHOLDS,
            Self::MinAngle | Self::MaxAngle => ANGLE_THRESHOLDS,
        }
    }
}

impl std::fmt::Display for QualityMeasure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MinSine => "minimum sine",
            Self::WarpedMinSine => "warped minimum sine",
            Self::MeanSine => "mean sine",
            Self::MinSineAndEdgeRatio => "minimum sine and edge ratio",
            Self::RadiusRatio => "radius ratio",
            Self::VolumeLengthRatio => "volume to rms edge length ratio",
            Self::MinAngle => "minimum dihedral angle",
            Self::MaxAngle => "maximum dihedral angle",
        };
        f.write_str(name)
    }
}

/// Returns the two faces adjacent to edge `(i, j)`.
///
/// Face `k` is the face opposite vertex `k`.
#[inline]
#[must_use]
pub const fn edge_faces(i: usize, j: usize) -> (usize, usize) {
    let k = if i > 0 {
        0
    } else if j > 1 {
        1
    } else {
        2
    };
    (k, 6 - i - j - k)
}

/// Local vertex indices `(j, k, l)` of face `i`, ordered so that
/// `(p_k - p_j) × (p_l - p_j)` points out of a positively oriented tet.
#[inline]
#[must_use]
pub const fn face_vertices(i: usize) -> (usize, usize, usize) {
    let j = (i + 1) & 3;
    if i & 1 == 0 {
        (j, (i + 3) & 3, (i + 2) & 3)
    } else {
        (j, (i + 2) & 3, (i + 3) & 3)
    }
}

/// Quantities shared by every quality measure and gradient of one tet.
#[derive(Clone, Debug, PartialEq)]
pub struct TetGeometry {
    /// The four corners.
    pub points: [Point3<f64>; 4],
    /// `orient3d` of the corners, i.e. six times the signed volume.
    pub orient: f64,
    /// Outward face normals; face `i` is opposite vertex `i` and `|n_i|` is
    /// twice its area.
    pub normals: [Vector3<f64>; 4],
    /// Squared lengths of the normals, `(2 A_i)²`.
    pub normal_norms_squared: [f64; 4],
    /// Squared edge lengths, indexed symmetrically.
    pub edge_lengths_squared: [[f64; 4]; 4],
}

impl TetGeometry {
    /// Precomputes volume, face normals and edge lengths.
    #[must_use]
    pub fn new(points: &[Point3<f64>; 4]) -> Self {
        let orient = orient3d(&points[0], &points[1], &points[2], &points[3]);
        let mut normals = [Vector3::zeros(); 4];
        let mut normal_norms_squared = [0.0; 4];
        for i in 0..4 {
            let (j, k, l) = face_vertices(i);
            normals[i] = (points[k] - points[j]).cross(&(points[l] - points[j]));
            normal_norms_squared[i] = normals[i].norm_squared();
        }
        let mut edge_lengths_squared = [[0.0; 4]; 4];
        for &(i, j) in &TET_EDGES {
            let l2 = (points[j] - points[i]).norm_squared();
            edge_lengths_squared[i][j] = l2;
            edge_lengths_squared[j][i] = l2;
        }
        Self {
            points: *points,
            orient,
            normals,
            normal_norms_squared,
            edge_lengths_squared,
        }
    }

    /// Signed volume.
    #[inline]
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.orient / 6.0
    }

    /// Area of face `i`.
    #[inline]
    #[must_use]
    pub fn face_area(&self, i: usize) -> f64 {
        0.5 * self.normal_norms_squared[i].sqrt()
    }

    /// Signed sine of the dihedral angle at edge `(i, j)`.
    ///
    /// Zero when either adjacent face has zero area.
    #[must_use]
    pub fn dihedral_sine(&self, i: usize, j: usize) -> f64 {
        let (k, l) = edge_faces(i, j);
        let denom = self.normal_norms_squared[k] * self.normal_norms_squared[l];
        if denom > 0.0 {
            (self.edge_lengths_squared[i][j] / denom).sqrt() * self.orient
        } else {
            0.0
        }
    }

    /// Whether the dihedral angle at edge `(i, j)` is obtuse.
    #[must_use]
    pub fn is_obtuse(&self, i: usize, j: usize) -> bool {
        let (k, l) = edge_faces(i, j);
        self.normals[k].dot(&self.normals[l]) > 0.0
    }

    /// Sines of the six dihedral angles in [`TET_EDGES`] order.
    #[must_use]
    pub fn dihedral_sines(&self) -> [f64; 6] {
        TET_EDGES.map(|(i, j)| self.dihedral_sine(i, j))
    }

    /// Dihedral angles in radians, in [`TET_EDGES`] order.
    #[must_use]
    pub fn dihedral_angles(&self) -> [f64; 6] {
        TET_EDGES.map(|(i, j)| {
            let (k, l) = edge_faces(i, j);
            let dot = self.normals[k].dot(&self.normals[l]);
            (self.orient * self.edge_lengths_squared[i][j].sqrt()).atan2(-dot)
        })
    }

    /// Shortest and longest edge length.
    #[must_use]
    pub fn edge_length_extremes(&self) -> (f64, f64) {
        let mut shortest = f64::INFINITY;
        let mut longest = 0.0_f64;
        for &(i, j) in &TET_EDGES {
            let l = self.edge_lengths_squared[i][j].sqrt();
            shortest = shortest.min(l);
            longest = longest.max(l);
        }
        (shortest, longest)
    }

    /// Sum of the four face areas.
    #[must_use]
    pub fn area_sum(&self) -> f64 {
        (0..4).map(|i| self.face_area(i)).sum()
    }
}

/// Circumcenter numerator length `Z`, equal to `12 V R`.
///
/// Coordinates are taken relative to the last point.
#[must_use]
pub fn circumradius_numerator(points: &[Point3<f64>; 4]) -> f64 {
    circumcenter_numerator(points).norm()
}

/// Circumcenter offset from `points[3]`, scaled by `2 · orient3d`.
#[must_use]
pub fn circumcenter_numerator(points: &[Point3<f64>; 4]) -> Vector3<f64> {
    let o = points[0] - points[3];
    let d = points[1] - points[3];
    let f = points[2] - points[3];
    d.cross(&f) * o.norm_squared() + f.cross(&o) * d.norm_squared() + o.cross(&d) * f.norm_squared()
}

/// Scalar quality oracle: a measure plus the parameters it needs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityOracle {
    /// Active measure.
    pub measure: QualityMeasure,
    /// Factor applied to obtuse dihedral sines by the warped measure.
    pub sine_warp_factor: f64,
}

impl Default for QualityOracle {
    fn default() -> Self {
        Self {
            measure: QualityMeasure::MinSine,
            sine_warp_factor: DEFAULT_SINE_WARP_FACTOR,
        }
    }
}

impl QualityOracle {
    /// Oracle for `measure` with the default warp factor.
    #[must_use]
    pub const fn new(measure: QualityMeasure) -> Self {
        Self {
            measure,
            sine_warp_factor: DEFAULT_SINE_WARP_FACTOR,
        }
    }

    /// Same oracle evaluating a different measure.
    #[must_use]
    pub const fn with_measure(self, measure: QualityMeasure) -> Self {
        Self { measure, ..self }
    }

    /// Quality of the tet spanned by `points`.
    ///
    /// Never fails: degenerate input yields `0` and inverted input yields a
    /// negative value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nalgebra::Point3;
    /// use tetimprove::geometry::quality::{QualityMeasure, QualityOracle, SINE_EQUILATERAL};
    ///
    /// let s = 1.0 / 2.0_f64.sqrt();
    /// let regular = [
    ///     Point3::new(1.0, 0.0, -s),
    ///     Point3::new(-1.0, 0.0, -s),
    ///     Point3::new(0.0, 1.0, s),
    ///     Point3::new(0.0, -1.0, s),
    /// ];
    /// let q = QualityOracle::new(QualityMeasure::MinSine).quality(&regular);
    /// assert!((q - SINE_EQUILATERAL).abs() < 1e-9);
    /// ```
    #[must_use]
    pub fn quality(&self, points: &[Point3<f64>; 4]) -> f64 {
        self.quality_of(&TetGeometry::new(points))
    }

    /// Quality from precomputed geometry.
    #[must_use]
    pub fn quality_of(&self, geometry: &TetGeometry) -> f64 {
        if geometry.orient == 0.0 {
            return 0.0;
        }
        match self.measure {
            QualityMeasure::MinSine => min_sine(geometry),
            QualityMeasure::WarpedMinSine => warped_min_sine(geometry, self.sine_warp_factor),
            QualityMeasure::MeanSine => mean_sine(geometry),
            QualityMeasure::MinSineAndEdgeRatio => min_sine_and_edge_ratio(geometry),
            QualityMeasure::RadiusRatio => radius_ratio(geometry),
            QualityMeasure::VolumeLengthRatio => volume_length_ratio(geometry),
            QualityMeasure::MinAngle => min_angle(geometry),
            QualityMeasure::MaxAngle => max_angle(geometry),
        }
    }
}

/// Minimum dihedral sine.
#[must_use]
pub fn min_sine(geometry: &TetGeometry) -> f64 {
    geometry
        .dihedral_sines()
        .into_iter()
        .fold(f64::INFINITY, f64::min)
}

/// Minimum dihedral sine with obtuse angles scaled by `warp_factor`.
#[must_use]
pub fn warped_min_sine(geometry: &TetGeometry, warp_factor: f64) -> f64 {
    TET_EDGES
        .iter()
        .map(|&(i, j)| {
            let sine = geometry.dihedral_sine(i, j);
            if geometry.is_obtuse(i, j) {
                sine * warp_factor
            } else {
                sine
            }
        })
        .fold(f64::INFINITY, f64::min)
}

/// Mean dihedral sine.
#[must_use]
pub fn mean_sine(geometry: &TetGeometry) -> f64 {
    geometry.dihedral_sines().iter().sum::<f64>() / 6.0
}

/// Minimum sine capped by the shortest/longest edge ratio.
#[must_use]
pub fn min_sine_and_edge_ratio(geometry: &TetGeometry) -> f64 {
    let (shortest, longest) = geometry.edge_length_extremes();
    let ratio = if longest > 0.0 {
        shortest / longest
    } else {
        0.0
    };
    min_sine(geometry).min(ratio * SINE_EQUILATERAL)
}

/// Signed `sqrt(108 V² / (Z · ΣA))`, where `Z = 12 V R`.
#[must_use]
pub fn radius_ratio(geometry: &TetGeometry) -> f64 {
    let z = circumradius_numerator(&geometry.points);
    let area_sum = geometry.area_sum();
    let denom = z * area_sum;
    if denom <= 0.0 {
        return 0.0;
    }
    geometry.orient.signum() * (3.0 * geometry.orient * geometry.orient / denom).sqrt()
}

/// `6√2 V / l_rms³`.
#[must_use]
pub fn volume_length_ratio(geometry: &TetGeometry) -> f64 {
    let sum: f64 = TET_EDGES
        .iter()
        .map(|&(i, j)| geometry.edge_lengths_squared[i][j])
        .sum();
    let lrms = (sum / 6.0).sqrt();
    if lrms <= 0.0 {
        return 0.0;
    }
    std::f64::consts::SQRT_2 * geometry.orient / (lrms * lrms * lrms)
}

/// Smallest dihedral angle in degrees; `6V` when the tet is inverted.
#[must_use]
pub fn min_angle(geometry: &TetGeometry) -> f64 {
    if geometry.orient < 0.0 {
        return geometry.orient;
    }
    geometry
        .dihedral_angles()
        .into_iter()
        .fold(f64::INFINITY, f64::min)
        .to_degrees()
}

/// `180°` minus the largest dihedral angle; `6V` when the tet is inverted.
#[must_use]
pub fn max_angle(geometry: &TetGeometry) -> f64 {
    if geometry.orient < 0.0 {
        return geometry.orient;
    }
    180.0
        - geometry
            .dihedral_angles()
            .into_iter()
            .fold(0.0, f64::max)
            .to_degrees()
}

/// Smallest and largest dihedral angle of a tet, in degrees.
#[must_use]
pub fn extreme_dihedral_angles(points: &[Point3<f64>; 4]) -> (f64, f64) {
    let angles = TetGeometry::new(points).dihedral_angles();
    let smallest = angles.iter().copied().fold(f64::INFINITY, f64::min);
    let largest = angles.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (smallest.to_degrees(), largest.to_degrees())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn regular() -> [Point3<f64>; 4] {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        [
            Point3::new(1.0, 0.0, -s),
            Point3::new(-1.0, 0.0, -s),
            Point3::new(0.0, 1.0, s),
            Point3::new(0.0, -1.0, s),
        ]
    }

    fn flat() -> [Point3<f64>; 4] {
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ]
    }

    const ALL: [QualityMeasure; 8] = [
        QualityMeasure::MinSine,
        QualityMeasure::WarpedMinSine,
        QualityMeasure::MeanSine,
        QualityMeasure::MinSineAndEdgeRatio,
        QualityMeasure::RadiusRatio,
        QualityMeasure::VolumeLengthRatio,
        QualityMeasure::MinAngle,
        QualityMeasure::MaxAngle,
    ];

    #[test]
    fn test_regular_tet_is_positively_oriented() {
        assert!(TetGeometry::new(&regular()).orient > 0.0);
    }

    #[test]
    fn test_regular_tet_scores() {
        assert_relative_eq!(
            SINE_EQUILATERAL,
            2.0 * std::f64::consts::SQRT_2 / 3.0,
            epsilon = 1e-15
        );
        let pts = regular();
        let q = |m| QualityOracle::new(m).quality(&pts);
        assert_relative_eq!(q(QualityMeasure::MinSine), SINE_EQUILATERAL, epsilon = 1e-9);
        assert_relative_eq!(q(QualityMeasure::WarpedMinSine), SINE_EQUILATERAL, epsilon = 1e-9);
        assert_relative_eq!(q(QualityMeasure::MeanSine), SINE_EQUILATERAL, epsilon = 1e-9);
        assert_relative_eq!(
            q(QualityMeasure::MinSineAndEdgeRatio),
            SINE_EQUILATERAL,
            epsilon = 1e-9
        );
        assert_relative_eq!(q(QualityMeasure::RadiusRatio), 1.0, epsilon = 1e-9);
        assert_relative_eq!(q(QualityMeasure::VolumeLengthRatio), 1.0, epsilon = 1e-9);
        // arccos(1/3) = 70.5288°
        assert_relative_eq!(q(QualityMeasure::MinAngle), 70.528_779_365_509_3, epsilon = 1e-6);
        assert_relative_eq!(
            q(QualityMeasure::MaxAngle),
            180.0 - 70.528_779_365_509_3,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_flat_tet_scores_zero() {
        for measure in ALL {
            let q = QualityOracle::new(measure).quality(&flat());
            assert!(q <= 0.0, "{measure} gave {q} for a flat tet");
        }
    }

    #[test]
    fn test_inverted_tet_scores_negative() {
        let [a, b, c, d] = regular();
        let inverted = [b, a, c, d];
        for measure in ALL {
            let q = QualityOracle::new(measure).quality(&inverted);
            assert!(q < 0.0, "{measure} gave {q} for an inverted tet");
        }
    }

    #[test]
    fn test_sliver_scores_low() {
        let sliver = [
            Point3::new(1.0, 1.0, 0.01),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        assert!(TetGeometry::new(&sliver).orient > 0.0);
        let q = QualityOracle::new(QualityMeasure::MinSine).quality(&sliver);
        assert!(q < 0.1);
    }

    #[test]
    fn test_edge_faces_cover_complement() {
        for &(i, j) in &TET_EDGES {
            let (k, l) = edge_faces(i, j);
            let mut all = [i, j, k, l];
            all.sort_unstable();
            assert_eq!(all, [0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_normals_point_outward() {
        let pts = regular();
        let geometry = TetGeometry::new(&pts);
        for i in 0..4 {
            let (j, _, _) = face_vertices(i);
            // the opposite vertex is behind the face
            assert!(geometry.normals[i].dot(&(pts[i] - pts[j])) < 0.0);
        }
    }

    #[test]
    fn test_warp_penalises_obtuse_angles() {
        // a tet with one obtuse dihedral angle
        let pts = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.45, 0.45, 0.2),
        ];
        let geometry = TetGeometry::new(&pts);
        assert!(geometry.orient > 0.0);
        let plain = min_sine(&geometry);
        let warped = warped_min_sine(&geometry, DEFAULT_SINE_WARP_FACTOR);
        assert!(warped <= plain);
        assert!(TET_EDGES.iter().any(|&(i, j)| geometry.is_obtuse(i, j)));
    }

    #[test]
    fn test_measure_metadata() {
        assert!(QualityMeasure::RadiusRatio.has_gradient());
        assert!(!QualityMeasure::MeanSine.has_gradient());
        assert_eq!(
            QualityMeasure::MinAngle.smoothing_measure(),
            QualityMeasure::MinSine
        );
        assert!(QualityMeasure::WarpedMinSine.is_sine_based());
        assert_relative_eq!(QualityMeasure::RadiusRatio.mean_thresholds()[0], 0.1);
        assert_eq!(format!("{}", QualityMeasure::MinSine), "minimum sine");
    }

    #[test]
    fn test_extreme_angles_of_regular_tet() {
        let (lo, hi) = extreme_dihedral_angles(&regular());
        assert_relative_eq!(lo, hi, epsilon = 1e-9);
    }
}
