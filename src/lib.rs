//! # tetimprove
//!
//! Quality improvement of tetrahedral meshes. Given a valid mesh, the engine
//! repeatedly smooths vertices, flips edges and faces, contracts edges and
//! inserts new vertices so that the *worst* tetrahedron gets better, without
//! ever producing an inverted or degenerate element.
//!
//! # Features
//!
//! - Eight quality measures (dihedral sines, radius ratio, volume-length ratio, angles, …) with
//!   analytic gradients where they exist
//! - Non-smooth vertex optimization that maximizes the minimum quality around a vertex, with
//!   boundary vertices kept on their plane, line or surface quadric
//! - Edge removal by optimal re-triangulation of the ring, single- and multi-face removal,
//!   boundary 2-2 flips
//! - Edge contraction across every pairing of vertex kinds
//! - Vertex insertion with lexicographically optimal cavities
//! - A transactional journal: every failed attempt is rolled back exactly
//! - Optional anisotropic evaluation through a deformation field
//! - Serialization/Deserialization of configuration and statistics with [serde](https://serde.rs)
//!
//! # Basic Usage
//!
//! ```rust
//! use tetimprove::prelude::*;
//!
//! // Eight tets fanned from an off-center interior vertex to an octahedron
//! let points = vec![
//!     Point3::new(0.7, 0.1, 0.05),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(-1.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//!     Point3::new(0.0, -1.0, 0.0),
//!     Point3::new(0.0, 0.0, 1.0),
//!     Point3::new(0.0, 0.0, -1.0),
//! ];
//! let mut tets = Vec::new();
//! for x in [1, 2] {
//!     for y in [3, 4] {
//!         for z in [5, 6] {
//!             let t = [0, x, y, z];
//!             let p = |i: usize| points[t[i]];
//!             // keep every tet positively oriented
//!             if orient3d(&p(0), &p(1), &p(2), &p(3)) > 0.0 {
//!                 tets.push(t);
//!             } else {
//!                 tets.push([t[1], t[0], t[2], t[3]]);
//!             }
//!         }
//!     }
//! }
//!
//! let (mut mesh, _tags) = ImproveMesh::from_tets(&points, &tets).unwrap();
//! let config = ImproveConfig::default();
//! let stats = improve_mesh(&mut mesh, &config).unwrap();
//!
//! assert!(stats.last.min >= stats.initial.min);
//! println!("{} -> {}", stats.initial, stats.last);
//! ```
//!
//! # Mesh Invariants
//!
//! Every operation preserves the following:
//!
//! - **Orientation** – every live tet is positively oriented, by tag order and by geometry.
//! - **Manifold faces** – each face is shared by at most two tets, one on either side.
//! - **Boundary shape** – boundary vertices move only within their plane or line (or near their
//!   quadric, when fixed vertices may move), and boundary edges are flipped only between coplanar
//!   faces.
//! - **Monotonicity** – a pass that lowers the worst quality of its worklist is rolled back,
//!   leaving the mesh exactly as it was.
//!
//! Failures to improve are not errors: operations report them through their return value after
//! rolling back. An [`ImproveError`](core::algorithms::improve::ImproveError) means the complex
//! itself is inconsistent.
//!
//! # References
//!
//! - Klingner, B.M. and Shewchuk, J.R. (2007) - "Aggressive Tetrahedral Mesh Improvement",
//!   Proceedings of the 16th International Meshing Roundtable
//! - Freitag, L.A. and Ollivier-Gooch, C. (1997) - "Tetrahedral Mesh Improvement Using Swapping
//!   and Smoothing", International Journal for Numerical Methods in Engineering
//! - Shewchuk, J.R. (2002) - "Two Discrete Optimization Algorithms for the Topological
//!   Improvement of Tetrahedral Meshes"

// Allow multiple crate versions due to transitive dependencies
#![allow(clippy::multiple_crate_versions)]
// Forbid unsafe code throughout the entire crate
#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// The `core` module contains the tetrahedral complex, the mesh wrapper with its journal, vertex
/// classification and the improvement algorithms.
pub mod core {
    /// Mesh improvement algorithms
    pub mod algorithms {
        /// Edge contraction
        pub mod contraction;
        /// Flip primitives and their journaled application
        pub mod flips;
        /// Static improvement schedule and engine errors
        pub mod improve;
        /// Vertex insertion with optimal cavities
        pub mod insertion;
        /// Non-smooth vertex optimization
        pub mod smoothing;
        /// Edge and face removal
        pub mod topological;
    }
    pub mod boundary;
    /// High-performance collection types
    pub mod collections;
    pub mod complex;
    pub mod config;
    pub mod journal;
    pub mod mesh;
    pub mod stats;
    pub mod vertex;
    pub mod worklist;

    // Re-export the `core` modules.
    pub use boundary::*;
    pub use complex::*;
    pub use config::*;
    pub use journal::*;
    pub use mesh::*;
    pub use stats::*;
    pub use vertex::*;
    pub use worklist::*;
    // Note: collections module not re-exported here to avoid namespace pollution
    // Import specific types via prelude or use crate::core::collections::
}

/// Contains the geometric predicates, quality measures and their gradients, surface quadrics and
/// anisotropic deformation fields.
pub mod geometry {
    pub mod anisotropy;
    pub mod gradient;
    pub mod predicates;
    pub mod quadric;
    /// Geometric quality measures for tetrahedra
    pub mod quality;
    pub use anisotropy::*;
    pub use predicates::*;
    pub use quadric::*;
    pub use quality::*;
}

/// A prelude module that re-exports commonly used types.
/// This makes it easier to import the most commonly used items from the crate.
pub mod prelude {
    // Re-export from core
    pub use crate::core::{
        algorithms::{
            contraction::{ContractionOutcome, contract_pass},
            flips::{Flip, FlipKind},
            improve::{ImproveError, improve_mesh},
            insertion::{InsertionKind, InsertionOutcome, insert_pass, insert_vertex},
            smoothing::{optimize_vertex, smooth_pass},
            topological::topo_pass,
        },
        boundary::*,
        complex::*,
        config::*,
        mesh::*,
        stats::*,
        vertex::*,
        worklist::*,
    };

    // Re-export commonly used collection types from core::collections
    pub use crate::core::collections::{
        FastHashMap, FastHashSet, SmallBuffer, fast_hash_map_with_capacity,
        fast_hash_set_with_capacity,
    };

    // Re-export from geometry
    pub use crate::geometry::{anisotropy::*, predicates::*, quadric::*, quality::*};

    pub use nalgebra::Point3;
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================
