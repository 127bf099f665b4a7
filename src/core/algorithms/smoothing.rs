//! Non-smooth vertex optimization.
//!
//! A vertex is moved to maximize the *worst* of the quality functions of its
//! incident tets. The objective is the minimum of smooth functions, so it is
//! not differentiable where two of them tie; the optimizer works on the
//! *active set* of functions within [`ACTIVE_SET_FACTOR`] of the worst and
//! steps along the point of the convex hull of their gradients nearest the
//! origin, which is the steepest ascent direction of their minimum.
//!
//! Each step is sized from a linear model of every function, then refined by
//! a backtracking line search. Facet and segment vertices have their
//! gradients projected into their plane or line, so they never leave the
//! boundary. Fixed vertices (when allowed to move) are held near the surface
//! by an extra function derived from their quadric.
//!
//! # Algorithm
//!
//! ```text
//! worst <- min_i f_i(v)
//! repeat
//!     d <- nearest point to the origin on hull{grad f_i : f_i <= 1.03 worst}
//!     r <- min over active of d . grad f_i       (predicted rate)
//!     stop if r <= 0
//!     alpha <- first crossing of the linear models, or an inversion bound
//!     alpha <- line search(alpha)
//!     v <- v + alpha d
//! until |d| small, no improvement, or iteration cap
//! ```

use nalgebra::{Point3, Vector3};

use crate::core::algorithms::improve::ImproveError;
use crate::core::collections::{FastHashSet, SmallBuffer, fast_hash_set_with_capacity};
use crate::core::complex::{IncidentTets, Tet, TetComplex, VertexTag, rotate_to_front};
use crate::core::config::ImproveConfig;
use crate::core::mesh::{ImproveMesh, MeshError};
use crate::core::stats::{PassKind, PassStats, SmoothingStats};
use crate::core::vertex::{VertexInfo, VertexKind, classify_star};
use crate::core::worklist::{TetStack, local_mean_improve, mesh_quality, stack_quality};
use crate::geometry::anisotropy::{DeformationField, transform_tet};
use crate::geometry::gradient::{
    QualityGradient, project_onto_line, project_onto_plane, quality_gradients, volume_gradient,
};
use crate::geometry::predicates::{orient3d, tet_volume};
use crate::geometry::quadric::{Quadric, quadric_quality};
use crate::geometry::quality::{QualityOracle, SINE_EQUILATERAL};

/// Functions within this factor of the worst are active.
pub const ACTIVE_SET_FACTOR: f64 = 1.03;
/// The line search gives up below this step.
pub const MIN_STEP_SIZE: f64 = 1.0e-5;
/// A function must be this much slower than the predicted rate to limit the
/// initial step.
const RATE_EPSILON: f64 = 1.0e-6;
/// Iterations stop when the worst quality rises by less than this.
const MIN_ITERATION_IMPROVEMENT: f64 = 1.0e-5;
/// Directions shorter than this are treated as zero.
const DIRECTION_EPSILON: f64 = 1.0e-5;
/// Cross products shorter than this make the triangle case degenerate.
const NEAREST_MIN: f64 = 1.0e-13;
/// Minimum rise of the local means for dynamic acceptance.
const DYNAMIC_MEAN_IMPROVEMENT: f64 = 1.0e-3;

// =============================================================================
// NEAREST POINT ON A CONVEX HULL
// =============================================================================

type Basis = SmallBuffer<Vector3<f64>, 4>;

/// Whether `p` moves the nearest point of `basis` closer to the origin.
fn improves_basis(p: &Vector3<f64>, basis: &Basis) -> bool {
    match basis.as_slice() {
        [q] => q.dot(&(p - q)) < 0.0,
        [q, r] => {
            let s = p - r;
            let t = q - r;
            s.cross(&t).dot(&r.cross(&t)) < 0.0
        }
        [q, r, s] => {
            let origin = Point3::origin();
            let (p, q, r, s) = (
                Point3::from(*p),
                Point3::from(*q),
                Point3::from(*r),
                Point3::from(*s),
            );
            orient3d(&p, &q, &r, &s) * orient3d(&origin, &q, &r, &s) > 0.0
        }
        _ => false,
    }
}

/// Smallest subset of `known ∪ rest` (containing `known`) whose hull has the
/// same nearest point to the origin as the whole set.
///
/// `rest` is consumed from the back; `known` never exceeds three points.
fn find_basis(known: &Basis, rest: &[Vector3<f64>]) -> Basis {
    let Some((&p, head)) = rest.split_last() else {
        return known.clone();
    };
    let basis = if head.is_empty() {
        if known.is_empty() {
            return std::iter::once(p).collect();
        }
        known.clone()
    } else {
        find_basis(known, head)
    };
    if !improves_basis(&p, &basis) {
        return basis;
    }
    let mut extended = known.clone();
    extended.push(p);
    if head.is_empty() || known.len() == 3 {
        extended
    } else {
        find_basis(&extended, head)
    }
}

/// Point of the convex hull of `points` nearest the origin.
///
/// Returns the origin for an empty set, when the hull contains the origin, or
/// when the nearest triangle is too thin to resolve.
#[must_use]
pub fn nearest_point_on_hull(points: &[Vector3<f64>]) -> Vector3<f64> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    let basis = find_basis(&Basis::new(), points);
    match basis.as_slice() {
        [p] => *p,
        [p, q] => {
            let pq = p - q;
            let length2 = pq.norm_squared();
            if length2 == 0.0 {
                return *p;
            }
            q - pq * (q.dot(&pq) / length2)
        }
        [p, q, r] => {
            let s = p - r;
            let t = q - r;
            let sxt = s.cross(&t);
            let rxt = r.cross(&t);
            let sxr = s.cross(r);
            if sxt.norm() < NEAREST_MIN || rxt.norm() < NEAREST_MIN || sxr.norm() < NEAREST_MIN {
                return Vector3::zeros();
            }
            let denominator = sxt.dot(&sxt);
            let c = sxt.dot(&rxt) / denominator;
            let d = sxt.dot(&sxr) / denominator;
            r - s * c - t * d
        }
        _ => Vector3::zeros(),
    }
}

// =============================================================================
// OBJECTIVE
// =============================================================================

/// The quadric term of a fixed vertex.
#[derive(Clone, Copy, Debug)]
struct QuadricTerm {
    quadric: Quadric,
    offset: f64,
    scale: f64,
    sine_scale: f64,
}

impl QuadricTerm {
    fn value(&self, p: &Point3<f64>) -> f64 {
        quadric_quality(self.quadric.error(p), self.offset, self.scale, self.sine_scale)
    }
}

/// Quality functions of one vertex and their gradients at some position.
#[derive(Debug, Default)]
struct Functions {
    values: Vec<QualityGradient>,
    /// Signed volume and its gradient, per incident tet.
    volumes: Vec<(f64, Vector3<f64>)>,
}

impl Functions {
    /// Gradients of the functions within [`ACTIVE_SET_FACTOR`] of `worst`.
    fn active(&self, worst: f64) -> Vec<Vector3<f64>> {
        let cutoff = worst * ACTIVE_SET_FACTOR;
        self.values
            .iter()
            .filter(|f| f.value <= cutoff)
            .map(|f| f.gradient)
            .collect()
    }
}

/// The worst-quality objective around one vertex, evaluated at trial
/// positions without touching the mesh.
struct StarObjective<'a> {
    others: Vec<[Point3<f64>; 3]>,
    info: VertexInfo,
    quadric: Option<QuadricTerm>,
    oracle: QualityOracle,
    deformation: Option<&'a dyn DeformationField>,
}

impl<'a> StarObjective<'a> {
    fn new<C>(
        mesh: &'a ImproveMesh<C>,
        config: &ImproveConfig,
        info: VertexInfo,
        star: &[Tet],
    ) -> Result<Self, MeshError>
    where
        C: TetComplex,
    {
        let mut others = Vec::with_capacity(star.len());
        for tet in star {
            others.push([
                mesh.position(tet[1])?,
                mesh.position(tet[2])?,
                mesh.position(tet[3])?,
            ]);
        }
        // measures without a closed-form gradient are smoothed on sines
        let measure = config.measure.smoothing_measure();
        let quadric = info
            .quadric
            .filter(|_| config.use_quadrics && info.kind == VertexKind::Fixed)
            .map(|quadric| QuadricTerm {
                quadric,
                offset: config.quadric_offset,
                scale: config.quadric_scale,
                sine_scale: if measure.is_sine_based() {
                    SINE_EQUILATERAL
                } else {
                    1.0
                },
            });
        Ok(Self {
            others,
            info,
            quadric,
            oracle: config.oracle().with_measure(measure),
            deformation: mesh.deformation(),
        })
    }

    fn corners(&self, index: usize, p: &Point3<f64>) -> [Point3<f64>; 4] {
        let [a, b, c] = self.others[index];
        [*p, a, b, c]
    }

    /// Worst function value with the vertex at `p`.
    fn worst(&self, p: &Point3<f64>) -> f64 {
        let tets = (0..self.others.len()).map(|i| {
            let points = self.corners(i, p);
            match self.deformation {
                Some(field) => self.oracle.quality(&transform_tet(field, &points).0),
                None => self.oracle.quality(&points),
            }
        });
        let worst = tets.fold(f64::INFINITY, f64::min);
        self.quadric
            .map_or(worst, |term| worst.min(term.value(p)))
    }

    /// Restricts a gradient to the motion the vertex is allowed.
    fn project(&self, gradient: &Vector3<f64>) -> Vector3<f64> {
        match self.info.kind {
            VertexKind::Facet => project_onto_plane(gradient, &self.info.vec),
            VertexKind::Segment => project_onto_line(gradient, &self.info.vec),
            _ => *gradient,
        }
    }

    /// Every function and its (projected) gradient with the vertex at `p`.
    fn functions(&self, p: &Point3<f64>) -> Functions {
        let mut functions = Functions {
            values: Vec::with_capacity(self.others.len() * 6 + 1),
            volumes: Vec::with_capacity(self.others.len()),
        };
        for i in 0..self.others.len() {
            let points = self.corners(i, p);
            let gradients = match self.deformation {
                Some(field) => {
                    let (deformed, tensor) = transform_tet(field, &points);
                    let mut gradients = quality_gradients(
                        self.oracle.measure,
                        self.oracle.sine_warp_factor,
                        &deformed,
                        0,
                    );
                    // pull back to physical space
                    for f in &mut gradients {
                        f.gradient = tensor.transpose() * f.gradient;
                    }
                    gradients
                }
                None => quality_gradients(
                    self.oracle.measure,
                    self.oracle.sine_warp_factor,
                    &points,
                    0,
                ),
            };
            functions
                .values
                .extend(gradients.into_iter().map(|f| QualityGradient {
                    value: f.value,
                    gradient: self.project(&f.gradient),
                }));
            functions.volumes.push((
                tet_volume(&points),
                self.project(&volume_gradient(&points, 0)),
            ));
        }
        if let Some(term) = self.quadric {
            functions.values.push(QualityGradient {
                value: term.value(p),
                gradient: term.quadric.descent(p),
            });
        }
        functions
    }
}

/// Largest step along `d` before a function predicted to improve slower than
/// `rate` overtakes the worst, or before a tet is predicted to invert.
fn initial_step(functions: &Functions, d: &Vector3<f64>, rate: f64, worst: f64, clamp: bool) -> f64 {
    let mut alpha = f64::INFINITY;
    for f in &functions.values {
        let own_rate = d.dot(&f.gradient);
        if own_rate + RATE_EPSILON < rate {
            let candidate = (f.value - worst) / (rate - own_rate);
            alpha = alpha.min(candidate);
        }
    }
    if clamp && alpha < 0.0 {
        alpha = 0.0;
    }
    if alpha.is_infinite() {
        for (volume, gradient) in &functions.volumes {
            let volume_rate = d.dot(gradient);
            if volume_rate < 0.0 {
                alpha = alpha.min(-volume / (2.0 * volume_rate));
            }
        }
    }
    alpha
}

/// Backtracking search along `d` from `origin`.
///
/// Returns the accepted step, or `0` if none improves enough.
fn line_search(
    objective: &StarObjective<'_>,
    origin: &Point3<f64>,
    d: &Vector3<f64>,
    rate: f64,
    initial_worst: f64,
    mut alpha: f64,
    max_iterations: usize,
) -> f64 {
    let mut previous = initial_worst;
    let mut iterations = 0;
    while alpha > MIN_STEP_SIZE && iterations < max_iterations {
        let worst = objective.worst(&(origin + d * alpha));
        tracing::trace!(alpha, worst, "line search step");
        // the previous (longer) step was better than this one
        if previous > initial_worst && previous > worst {
            return alpha * 2.0;
        }
        if worst - initial_worst > 0.9 * alpha * rate {
            return alpha;
        }
        alpha /= 2.0;
        previous = worst;
        iterations += 1;
    }
    0.0
}

/// Smallest predicted rate of improvement of the active functions along `d`.
fn predicted_rate(active: &[Vector3<f64>], d: &Vector3<f64>) -> f64 {
    active
        .iter()
        .map(|g| d.dot(g))
        .fold(f64::INFINITY, f64::min)
}

/// Moves `vertex` to improve the worst quality of `star` (tets rotated with
/// `vertex` first).
///
/// Returns the new worst quality of `star` under the configured measure if
/// the vertex moved. The move is journaled
/// as one [`SmoothVertex`](crate::core::journal::JournalEntry::SmoothVertex)
/// entry. Reclassification of facet and segment vertices (when fixed vertices
/// may move) is journaled too.
///
/// # Errors
///
/// Returns [`MeshError`] if the star references an unknown vertex.
pub fn optimize_vertex<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    vertex: VertexTag,
    star: &IncidentTets,
    stats: &mut SmoothingStats,
) -> Result<Option<f64>, MeshError>
where
    C: TetComplex,
{
    if star.tets.is_empty() {
        return Ok(None);
    }
    let mut info = mesh.info(vertex);
    if config.fixed_smooth && matches!(info.kind, VertexKind::Facet | VertexKind::Segment) {
        let mut fresh = classify_star(mesh.complex(), star);
        fresh.quadric = info.quadric;
        if fresh != info {
            mesh.set_info(vertex, fresh);
            info = fresh;
        }
    }
    if !info.kind.smoothable(config.smooth_kinds()) {
        return Ok(None);
    }

    let origin = mesh.position(vertex)?;
    let anisotropic = mesh.is_anisotropic();
    let objective = StarObjective::new(mesh, config, info, &star.tets)?;
    let mut worst = objective.worst(&origin);
    if worst <= 0.0 {
        tracing::debug!(?vertex, worst, "not smoothing vertex with an inverted star");
        stats.record(info.kind, false);
        return Ok(None);
    }

    let mut position = origin;
    let mut functions = objective.functions(&position);
    let mut active = functions.active(worst);
    if active.is_empty() {
        stats.record(info.kind, false);
        return Ok(None);
    }
    let mut d = nearest_point_on_hull(&active);
    if d.norm() < DIRECTION_EPSILON {
        stats.record(info.kind, false);
        return Ok(None);
    }

    let mut iterations = 0;
    loop {
        let rate = predicted_rate(&active, &d);
        if rate <= 0.0 {
            break;
        }
        let alpha = initial_step(&functions, &d, rate, worst, anisotropic);
        if !alpha.is_finite() {
            tracing::debug!(?vertex, "unbounded smoothing step");
            break;
        }
        let alpha = line_search(
            &objective,
            &position,
            &d,
            rate,
            worst,
            alpha,
            config.max_line_iterations,
        );
        let candidate = position + d * alpha;
        let new_worst = objective.worst(&candidate);
        let improvement = new_worst - worst;
        if improvement < 0.0 {
            break;
        }
        position = candidate;
        worst = new_worst;

        functions = objective.functions(&position);
        active = functions.active(worst);
        d = nearest_point_on_hull(&active);
        iterations += 1;
        if d.norm() <= DIRECTION_EPSILON
            || iterations >= config.max_smooth_iterations
            || improvement <= MIN_ITERATION_IMPROVEMENT
        {
            break;
        }
    }

    let moved = position != origin;
    stats.record(info.kind, moved);
    if !moved {
        return Ok(None);
    }
    tracing::trace!(?vertex, iterations, worst, "smoothed vertex");
    mesh.move_vertex(vertex, position)?;

    // the objective may be a surrogate measure or include the quadric term
    let oracle = config.oracle();
    let mut star_worst = f64::INFINITY;
    for tet in &star.tets {
        star_worst = star_worst.min(mesh.quality(tet, &oracle)?);
    }
    Ok(Some(star_worst))
}

/// Smooths `tet[0]` if `tet` is still live.
///
/// When the vertex moves and `influence` is given, every tet of its star is
/// pushed there (once).
///
/// # Errors
///
/// Returns [`MeshError`] if the star references an unknown vertex.
pub fn smooth_vertex<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    tet: &Tet,
    influence: Option<&mut TetStack>,
    stats: &mut SmoothingStats,
) -> Result<bool, MeshError>
where
    C: TetComplex,
{
    if !mesh.tet_exists(tet) {
        stats.stale += 1;
        return Ok(false);
    }
    let star = mesh.complex().incident_tets(tet);
    if optimize_vertex(mesh, config, tet[0], &star, stats)?.is_none() {
        return Ok(false);
    }
    if let Some(influence) = influence {
        let oracle = config.oracle();
        for star_tet in &star.tets {
            if !influence.contains(star_tet) {
                let quality = mesh.quality(star_tet, &oracle)?;
                influence.push(*star_tet, quality);
            }
        }
    }
    Ok(true)
}

/// Smooths every vertex of every tet on `stack`, each vertex at most once.
///
/// With `influence`, the pass is *local*: the popped tets and the stars of
/// moved vertices are collected there, and the pass is rolled back unless the
/// worst quality among them beats the worst of `stack` (or, under dynamic
/// improvement, some local mean rose without lowering the minimum). Without
/// it the pass is *global* and is rolled back only if the mesh minimum fell.
///
/// # Errors
///
/// Returns [`ImproveError`] on a fatal mesh inconsistency.
pub fn smooth_pass<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    stack: &TetStack,
    mut influence: Option<&mut TetStack>,
) -> Result<PassStats, ImproveError>
where
    C: TetComplex,
{
    let oracle = config.oracle();
    let mut stats = PassStats::new(PassKind::Smooth);
    let checkpoint = mesh.checkpoint();
    let before = if influence.is_some() {
        stack_quality(mesh, &oracle, stack)?
    } else {
        mesh_quality(mesh, &oracle)?
    };
    stats.min_before = before.min;

    let mut work = stack.clone();
    let mut smoothed: FastHashSet<VertexTag> = fast_hash_set_with_capacity(stack.len() * 2);
    while let Some(entry) = work.pop() {
        if !mesh.tet_exists(&entry.tet) {
            stats.smoothing.stale += 1;
            continue;
        }
        if let Some(influence) = influence.as_deref_mut() {
            if !influence.contains(&entry.tet) {
                influence.push(entry.tet, entry.quality);
            }
        }
        for &vertex in &entry.tet {
            if !smoothed.insert(vertex) {
                continue;
            }
            let Some(rotated) = rotate_to_front(&entry.tet, vertex) else {
                continue;
            };
            smooth_vertex(
                mesh,
                config,
                &rotated,
                influence.as_deref_mut(),
                &mut stats.smoothing,
            )?;
        }
    }

    let after = match influence.as_deref() {
        Some(influence) => stack_quality(mesh, &oracle, influence)?,
        None => mesh_quality(mesh, &oracle)?,
    };
    let rejected = if influence.is_some() {
        let dynamic_success = config.dynamic_improvement
            && local_mean_improve(
                &before.thresholded_means,
                &after.thresholded_means,
                DYNAMIC_MEAN_IMPROVEMENT,
            )
            && after.min >= before.min;
        after.min <= before.min && !dynamic_success
    } else {
        after.min < before.min
    };

    if rejected {
        tracing::debug!(
            before = before.min,
            after = after.min,
            "smoothing pass did not improve; rolling back"
        );
        mesh.revert_to(checkpoint)?;
        stats.min_after = before.min;
        stats.accepted = false;
    } else {
        stats.min_after = after.min;
        stats.accepted = true;
    }
    tracing::debug!(
        attempts = stats.smoothing.total().attempts,
        successes = stats.smoothing.total().successes,
        min_before = stats.min_before,
        min_after = stats.min_after,
        "smoothing pass done"
    );
    Ok(stats)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ImproveConfigBuilder;
    use crate::core::vertex::VertexInfo;
    use crate::core::worklist::fill_by_quality;
    use crate::geometry::quality::QualityMeasure;
    use approx::assert_relative_eq;

    #[test]
    fn test_nearest_single_point() {
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(nearest_point_on_hull(&[p]), p);
        assert_eq!(nearest_point_on_hull(&[]), Vector3::zeros());
    }

    #[test]
    fn test_nearest_on_segment() {
        let points = [Vector3::new(1.0, -1.0, 0.0), Vector3::new(1.0, 1.0, 0.0)];
        let nearest = nearest_point_on_hull(&points);
        assert_relative_eq!(nearest, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_nearest_prefers_closer_vertex() {
        let points = [
            Vector3::new(3.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 2.0, 0.0),
        ];
        let nearest = nearest_point_on_hull(&points);
        assert_relative_eq!(nearest, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_nearest_on_triangle() {
        let points = [
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(-1.0, 1.0, 1.0),
            Vector3::new(-1.0, -1.0, 1.0),
        ];
        let nearest = nearest_point_on_hull(&points);
        assert_relative_eq!(nearest, Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_nearest_hull_containing_origin() {
        let points = [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(-1.0, 1.0, 0.0),
            Vector3::new(-1.0, -1.0, 1.0),
            Vector3::new(-1.0, -1.0, -1.0),
        ];
        assert_relative_eq!(nearest_point_on_hull(&points), Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_nearest_is_no_farther_than_any_point() {
        let points = [
            Vector3::new(2.0, 1.0, 0.5),
            Vector3::new(1.5, -0.5, 1.0),
            Vector3::new(3.0, 0.2, -0.3),
            Vector3::new(1.0, 0.4, 0.1),
            Vector3::new(2.5, 2.0, 2.0),
        ];
        let nearest = nearest_point_on_hull(&points);
        for p in &points {
            assert!(nearest.norm() <= p.norm() + 1e-12);
            // every point lies on the far side of the supporting plane
            assert!(nearest.dot(&(p - nearest)) >= -1e-9);
        }
    }

    /// Eight tets around a free vertex displaced from the center of an
    /// octahedron.
    fn octahedron(center: Point3<f64>) -> (ImproveMesh, Vec<VertexTag>) {
        let points = [
            center,
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, -1.0),
        ];
        let faces = [
            [1, 3, 5],
            [3, 2, 5],
            [2, 4, 5],
            [4, 1, 5],
            [3, 1, 6],
            [2, 3, 6],
            [4, 2, 6],
            [1, 4, 6],
        ];
        let tets: Vec<[usize; 4]> = faces.iter().map(|f| [0, f[0], f[2], f[1]]).collect();
        let (mut mesh, tags) = ImproveMesh::from_tets(&points, &tets).unwrap();
        mesh.classify_vertices();
        (mesh, tags)
    }

    #[test]
    fn test_free_vertex_moves_toward_center() {
        let (mut mesh, tags) = octahedron(Point3::new(0.3, 0.2, -0.1));
        let config = ImproveConfig::default();
        let oracle = config.oracle();
        let star = mesh.star(tags[0]);
        let before = star
            .tets
            .iter()
            .map(|t| mesh.quality(t, &oracle).unwrap())
            .fold(f64::INFINITY, f64::min);
        let mut stats = SmoothingStats::default();
        let journal = mesh.journal().len();
        let worst = optimize_vertex(&mut mesh, &config, tags[0], &star, &mut stats)
            .unwrap()
            .unwrap();
        assert!(worst > before);
        let moved = mesh.position(tags[0]).unwrap();
        assert!(moved.coords.norm() < 0.3);
        assert_eq!(stats.by_kind[VertexKind::Free as usize].successes, 1);
        assert_eq!(mesh.journal().len(), journal + 1);
    }

    #[test]
    fn test_reported_quality_uses_configured_measure() {
        for measure in [
            QualityMeasure::MinAngle,
            QualityMeasure::MaxAngle,
            QualityMeasure::MeanSine,
            QualityMeasure::MinSineAndEdgeRatio,
        ] {
            let (mut mesh, tags) = octahedron(Point3::new(0.3, 0.1, 0.05));
            let config = ImproveConfigBuilder::default()
                .measure(measure)
                .build()
                .unwrap();
            let oracle = config.oracle();
            let star = mesh.star(tags[0]);
            let mut stats = SmoothingStats::default();
            let worst = optimize_vertex(&mut mesh, &config, tags[0], &star, &mut stats)
                .unwrap()
                .unwrap();
            let actual = star
                .tets
                .iter()
                .map(|t| mesh.quality(t, &oracle).unwrap())
                .fold(f64::INFINITY, f64::min);
            assert_relative_eq!(worst, actual, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_centered_vertex_stays() {
        let (mut mesh, tags) = octahedron(Point3::origin());
        let config = ImproveConfig::default();
        let star = mesh.star(tags[0]);
        let mut stats = SmoothingStats::default();
        let journal = mesh.journal().len();
        assert!(
            optimize_vertex(&mut mesh, &config, tags[0], &star, &mut stats)
                .unwrap()
                .is_none()
        );
        assert_eq!(mesh.journal().len(), journal);
    }

    #[test]
    fn test_fixed_vertex_is_not_smoothed_by_default() {
        let (mut mesh, tags) = octahedron(Point3::new(0.3, 0.2, -0.1));
        let config = ImproveConfig::default();
        let corner = tags[1];
        assert_eq!(mesh.kind(corner), VertexKind::Fixed);
        let star = mesh.star(corner);
        let mut stats = SmoothingStats::default();
        assert!(
            optimize_vertex(&mut mesh, &config, corner, &star, &mut stats)
                .unwrap()
                .is_none()
        );
        assert_eq!(stats.total().attempts, 0);
    }

    #[test]
    fn test_unclassified_vertex_is_not_smoothed() {
        let (mut mesh, tags) = octahedron(Point3::new(0.3, 0.2, -0.1));
        mesh.set_info(tags[0], VertexInfo::default());
        let star = mesh.star(tags[0]);
        let mut stats = SmoothingStats::default();
        let config = ImproveConfig::default();
        assert!(
            optimize_vertex(&mut mesh, &config, tags[0], &star, &mut stats)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_local_pass_collects_influence() {
        let (mut mesh, _) = octahedron(Point3::new(0.3, 0.2, -0.1));
        let config = ImproveConfig::default();
        let stack = fill_by_quality(&mesh, &config.oracle(), 1.0).unwrap();
        let mut influence = TetStack::new();
        let stats = smooth_pass(&mut mesh, &config, &stack, Some(&mut influence)).unwrap();
        assert!(stats.accepted);
        assert!(stats.min_after > stats.min_before);
        assert_eq!(influence.len(), 8);
    }

    #[test]
    fn test_global_pass_never_lowers_minimum() {
        let (mut mesh, _) = octahedron(Point3::new(0.05, -0.02, 0.01));
        let config = ImproveConfig::default();
        let oracle = config.oracle();
        let before = mesh_quality(&mesh, &oracle).unwrap().min;
        let stack = fill_by_quality(&mesh, &oracle, 1.0).unwrap();
        let stats = smooth_pass(&mut mesh, &config, &stack, None).unwrap();
        let after = mesh_quality(&mesh, &oracle).unwrap().min;
        assert!(after >= before);
        assert_relative_eq!(stats.min_before, before);
    }

    #[test]
    fn test_stale_tets_are_skipped() {
        let (mut mesh, tags) = octahedron(Point3::new(0.3, 0.2, -0.1));
        let config = ImproveConfig::default();
        let mut stack = TetStack::new();
        stack.push([tags[0], tags[1], tags[2], tags[3]], 0.0);
        let stats = smooth_pass(&mut mesh, &config, &stack, None).unwrap();
        assert_eq!(stats.smoothing.stale, 1);
        assert_eq!(stats.smoothing.total().attempts, 0);
    }
}
