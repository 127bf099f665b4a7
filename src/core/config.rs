//! Improvement configuration.
//!
//! [`ImproveConfig`] is the single options object handed to every pass and
//! operation. It is plain data: build it with [`ImproveConfigBuilder`], load it
//! with serde, or start from [`ImproveConfig::default`] and override fields.
//!
//! # Examples
//!
//! ```rust
//! use tetimprove::core::config::{ImproveConfig, ImproveConfigBuilder};
//! use tetimprove::geometry::quality::QualityMeasure;
//!
//! let config: ImproveConfig = ImproveConfigBuilder::default()
//!     .measure(QualityMeasure::RadiusRatio)
//!     .edge_contraction(false)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.measure, QualityMeasure::RadiusRatio);
//! assert!(config.edge_removal);
//! assert!((config.max_insert_quality() - 0.7).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};

use crate::core::vertex::{SMOOTH_FACET_VERTICES, SMOOTH_FIXED_VERTICES, SMOOTH_SEGMENT_VERTICES};
use crate::geometry::quality::{DEFAULT_SINE_WARP_FACTOR, QualityMeasure, QualityOracle};

/// Sine of 1°.
pub const SINE1: f64 = 0.017_452_406_44;
/// Sine of 2°.
pub const SINE2: f64 = 0.034_899_496_7;
/// Sine of 15°.
pub const SINE15: f64 = 0.258_819_045_1;
/// Sine of 20°.
pub const SINE20: f64 = 0.342_020_143_33;
/// Sine of 25°.
pub const SINE25: f64 = 0.422_618_261_74;
/// Sine of 40°.
pub const SINE40: f64 = 0.642_787_609_69;

/// Desperate passes attack tets up to this far above the worst...
pub const QUALITY_FROM_DESPERATE: f64 = SINE15;
/// ...or this far, once the worst is above the insertion bound.
pub const QUALITY_UP_FROM_DESPERATE: f64 = SINE1;

/// Per-depth weights applied to cavity face qualities before sorting.
pub const DEFAULT_DEPTH_WEIGHTS: [f64; 10] = [1.0, 1.6, 2.3, 2.9, 3.3, 3.3, 3.3, 3.3, 3.3, 3.3];

/// Options for every improvement pass.
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct ImproveConfig {
    /// Quality measure to maximize.
    pub measure: QualityMeasure,
    /// Factor applied to obtuse dihedral sines by the warped measure.
    pub sine_warp_factor: f64,

    /// Run the non-smooth optimizer on vertices.
    pub nonsmooth: bool,
    /// Let facet vertices slide in their plane.
    pub facet_smooth: bool,
    /// Let segment vertices slide along their line.
    pub segment_smooth: bool,
    /// Let fixed vertices move, guarded by their quadric.
    pub fixed_smooth: bool,
    /// Keep boundary vertices near the surface with quadrics.
    pub use_quadrics: bool,
    /// Quadric quality is `offset - scale * error`.
    pub quadric_offset: f64,
    /// See `quadric_offset`.
    pub quadric_scale: f64,
    /// Optimizer iterations per vertex.
    pub max_smooth_iterations: usize,
    /// Step halvings per line search.
    pub max_line_iterations: usize,

    /// Remove interior edges.
    pub edge_removal: bool,
    /// Remove boundary edges between coplanar boundary faces.
    pub boundary_edge_removal: bool,
    /// Remove single faces with 2-3 flips.
    pub single_face_removal: bool,
    /// Remove trees of faces.
    pub multi_face_removal: bool,
    /// Allow 2-2 flips on the boundary.
    pub flip22: bool,
    /// Contract edges.
    pub edge_contraction: bool,

    /// Run insertion passes.
    pub enable_insert: bool,
    /// Insert at tet barycenters.
    pub insert_body: bool,
    /// Insert at boundary face barycenters.
    pub insert_facet: bool,
    /// Insert at boundary edge midpoints.
    pub insert_segment: bool,
    /// Absorb blocking tets with three wall faces into a cavity, which can
    /// delete a vertex.
    pub cavity_vertex_deletion: bool,
    /// Weigh the qualities of deleted tets as well as new faces when
    /// choosing a cavity.
    pub cavity_consider_deleted: bool,
    /// Cavity growth stops at this depth.
    pub cavity_depth_limit: usize,
    /// Multiplier of face quality by tet depth. The last entry covers every
    /// deeper level.
    pub depth_weights: Vec<f64>,
    /// Fraction of the worst tets attacked by an insertion pass.
    pub percent_worst: f64,
    /// Tets at least this good are never split. `None` picks the default of
    /// the active measure.
    pub max_insert_quality: Option<f64>,

    /// Minimum mean improvement for smoothing and topological passes.
    pub min_step_improvement: f64,
    /// Minimum mean improvement for insertion passes.
    pub min_insertion_improvement: f64,

    /// Accept local passes that raise the local means without lowering the
    /// minimum once the mesh is good enough.
    pub dynamic_improvement: bool,
    /// Minimum quality before `dynamic_improvement` applies.
    pub dyn_min_quality: f64,
    /// Quality targeted by dynamic improvement.
    pub dyn_improve_to: f64,

    /// Reject results with edges far from `target_edge_length`.
    pub sizing: bool,
    /// Desired edge length; `0` means the mean edge length.
    pub target_edge_length: f64,
    /// Edges longer than `target * longer_factor` are too long.
    pub longer_factor: f64,
    /// Edges shorter than `target * shorter_factor` are too short.
    pub shorter_factor: f64,

    /// Stop once every dihedral angle exceeds this many degrees...
    pub goal_angle_min: f64,
    /// ...and none exceeds this many.
    pub goal_angle_max: f64,
}

impl Default for ImproveConfig {
    fn default() -> Self {
        Self {
            measure: QualityMeasure::MinSine,
            sine_warp_factor: DEFAULT_SINE_WARP_FACTOR,
            nonsmooth: true,
            facet_smooth: true,
            segment_smooth: true,
            fixed_smooth: false,
            use_quadrics: true,
            quadric_offset: 0.8,
            quadric_scale: 300.0,
            max_smooth_iterations: 50,
            max_line_iterations: 50,
            edge_removal: true,
            boundary_edge_removal: false,
            single_face_removal: true,
            multi_face_removal: true,
            flip22: true,
            edge_contraction: true,
            enable_insert: true,
            insert_body: true,
            insert_facet: true,
            insert_segment: true,
            cavity_vertex_deletion: true,
            cavity_consider_deleted: false,
            cavity_depth_limit: 6,
            depth_weights: DEFAULT_DEPTH_WEIGHTS.to_vec(),
            percent_worst: 0.035,
            max_insert_quality: None,
            min_step_improvement: 1.0e-4,
            min_insertion_improvement: 1.0e-3,
            dynamic_improvement: false,
            dyn_min_quality: SINE20,
            dyn_improve_to: SINE25,
            sizing: false,
            target_edge_length: 0.0,
            longer_factor: 2.0,
            shorter_factor: 0.5,
            goal_angle_min: 90.0,
            goal_angle_max: 90.0,
        }
    }
}

impl ImproveConfig {
    /// Oracle for the configured measure.
    #[must_use]
    pub const fn oracle(&self) -> QualityOracle {
        QualityOracle {
            measure: self.measure,
            sine_warp_factor: self.sine_warp_factor,
        }
    }

    /// Bitmask of constrained vertex kinds the smoother may move.
    #[must_use]
    pub const fn smooth_kinds(&self) -> u8 {
        let mut kinds = 0;
        if self.facet_smooth {
            kinds |= SMOOTH_FACET_VERTICES;
        }
        if self.segment_smooth {
            kinds |= SMOOTH_SEGMENT_VERTICES;
        }
        if self.fixed_smooth {
            kinds |= SMOOTH_FIXED_VERTICES;
        }
        kinds
    }

    /// Weight of a cavity face at `depth`.
    #[must_use]
    pub fn depth_weight(&self, depth: usize) -> f64 {
        self.depth_weights
            .get(depth)
            .or_else(|| self.depth_weights.last())
            .copied()
            .unwrap_or(1.0)
    }

    /// Quality above which tets are not split.
    #[must_use]
    pub fn max_insert_quality(&self) -> f64 {
        self.max_insert_quality.unwrap_or(match self.measure {
            QualityMeasure::RadiusRatio | QualityMeasure::VolumeLengthRatio => 0.7,
            QualityMeasure::MinAngle => 40.0,
            QualityMeasure::MaxAngle => 80.0,
            _ => SINE40,
        })
    }

    /// Quality below which a desperate pass attacks tets, given the current
    /// worst quality of the mesh.
    #[must_use]
    pub fn desperate_threshold(&self, worst: f64) -> f64 {
        let max_insert = self.max_insert_quality();
        if worst + QUALITY_FROM_DESPERATE < max_insert {
            worst + QUALITY_FROM_DESPERATE
        } else if worst > max_insert {
            worst + QUALITY_UP_FROM_DESPERATE
        } else {
            max_insert
        }
    }

    /// Whether any topological operation is enabled.
    #[must_use]
    pub const fn any_topological(&self) -> bool {
        self.edge_removal || self.single_face_removal || self.multi_face_removal
    }

    /// Whether any insertion variant is enabled.
    #[must_use]
    pub const fn any_insertion(&self) -> bool {
        self.enable_insert && (self.insert_body || self.insert_facet || self.insert_segment)
    }
}

// =============================================================================
// TESTS
// =============================================================================
