//! Vertex insertion with optimal cavities.
//!
//! A bad tet is attacked by inserting a new vertex at the barycenter of one of
//! its boundary faces (facet insertion), at its own barycenter (body
//! insertion) or at the midpoint of one of its boundary edges (segment
//! insertion). The initial split is only a seed: the tets around the new
//! vertex are then grown into a *cavity*, chosen among every star-shaped
//! region reachable from the seed so that the qualities of the tets joining
//! the new vertex to the cavity boundary are lexicographically maximal.
//!
//! # Algorithm
//!
//! The search runs in three phases over a [`CavityDag`]:
//!
//! 1. **Growth.** Starting from the split tets, faces are popped from a
//!    worklist. The tet beyond a face joins the DAG if the new vertex sees all
//!    of its other faces; otherwise it is *blocking* and the face becomes a
//!    wall. A blocking tet joins later once two of its faces are walls (three
//!    with vertex deletion) and the rest face the vertex. Growth stops at the
//!    configured depth.
//! 2. **Labelling.** Every face of the DAG is an edge from its tet to the tet
//!    beyond (or to a sink for walls), weighted by the quality of the tet it
//!    would create times a per-depth weight. Edges are visited from worst to
//!    best and each one either forces its parent out of the cavity, forces
//!    its child into it, becomes a boundary face, or is kept for later
//!    propagation.
//! 3. **Commit.** Tets labelled as cavity are deleted and every boundary face
//!    is joined to the new vertex.
//!
//! The new cavity is then improved by smoothing and topological passes, and
//! the insertion is kept only if its worst tet beats the worst tet it
//! replaced.
//!
//! # References
//! - Klingner, B.M. and Shewchuk, J.R. (2007) - "Aggressive Tetrahedral Mesh
//!   Improvement"

use std::fmt;

use nalgebra::Point3;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::algorithms::contraction::{MIN_SIZE_TET_QUALITY, MIN_TET_QUALITY};
use crate::core::algorithms::flips::Flip;
use crate::core::algorithms::improve::ImproveError;
use crate::core::algorithms::smoothing::{optimize_vertex, smooth_pass};
use crate::core::algorithms::topological::topo_pass;
use crate::core::boundary::{BoundaryAnalysis, EdgeRing};
use crate::core::collections::{
    FastHashMap, FastHashSet, SmallBuffer, fast_hash_map_with_capacity, fast_hash_set_with_capacity,
};
use crate::core::complex::{Face, Tet, TetComplex, VertexTag, canonical_face, tet_key};
use crate::core::config::{ImproveConfig, SINE2};
use crate::core::mesh::{ImproveMesh, MeshError};
use crate::core::stats::{InsertionStats, PassKind, PassStats, Tally};
use crate::core::vertex::{VertexInfo, classify_star};
use crate::core::worklist::{
    TetStack, fill_by_percent, fill_by_quality, mesh_quality, stack_edge_extremes, stack_quality,
};
use crate::geometry::predicates::{face_barycenter, orient3d, tet_barycenter};

/// The new vertex must lie this far (in orientation units) in front of a
/// face for the tet behind it to join the cavity.
pub const MIN_FACING: f64 = 1.0e-7;
/// Cavity growth stops once the DAG holds this many tets.
pub const MAX_CAVITY_TETS: usize = 10_000;
/// An insertion must raise the local worst quality by more than this.
pub const MIN_CAVITY_IMPROVEMENT: f64 = 1.0e-13;
/// Cavity improvement stops once this many tets are affected.
pub const MAX_CAVITY_STACK: usize = 250;
/// Budget multiplier for insertions at the worst tets.
pub const TRY_HARD_FACTOR: usize = 15;
/// Tets within this much of the worst get the larger budget.
pub const CLOSE_TO_WORST: f64 = SINE2;

const MIN_SUBMESH_IMPROVEMENT: f64 = 1.0e-3;
const MAX_SUBMESH_ITERATIONS: usize = 8;
const TRY_HARD_MIN_SUBMESH_IMPROVEMENT: f64 = 1.0e-10;
const TRY_HARD_MAX_SUBMESH_ITERATIONS: usize = 20;

/// Errors raised when a cavity DAG breaks its structural invariants.
///
/// These indicate an inconsistent complex or a bug in the search, never a
/// property of the input geometry.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum CavityError {
    /// A face on the worklist is not in the complex.
    #[error("Cavity face {face:?} is not in the complex")]
    MissingFace {
        /// The face.
        face: Face,
    },

    /// No cavity tet owns a face on the worklist or a wall.
    #[error("No cavity tet owns face {face:?}")]
    OrphanFace {
        /// The face.
        face: Face,
    },

    /// A tet was reached a second time after joining the cavity.
    #[error("Tet {tet:?} was reached again after joining the cavity")]
    Revisited {
        /// The tet.
        tet: Tet,
    },

    /// A face the new vertex should see is inverted from it.
    #[error("Cavity face {face:?} makes a tet of quality {quality} with the new vertex")]
    InvertedFace {
        /// The face.
        face: Face,
        /// Quality of the tet it would form.
        quality: f64,
    },

    /// A cavity tet is no longer in the complex.
    #[error("Cavity tet {tet:?} is not in the complex")]
    MissingTet {
        /// The tet.
        tet: Tet,
    },

    /// A grown tet has the wrong number of links.
    #[error("Cavity tet {tet:?} has {parents} parents and {faces} faces")]
    LinkCount {
        /// The tet.
        tet: Tet,
        /// Number of parents.
        parents: usize,
        /// Number of outward faces.
        faces: usize,
    },

    /// A child does not list the tet that points at it as a parent.
    #[error("Cavity tet {child:?} does not list {parent:?} as a parent")]
    MissingParentLink {
        /// The parent tet.
        parent: Tet,
        /// The child tet.
        child: Tet,
    },
}

// =============================================================================
// CAVITY DAG
// =============================================================================

/// An outward face of a cavity tet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CavityFace {
    /// The face, oriented away from its tet.
    pub face: Face,
    /// Quality of the tet joining the face to the new vertex.
    pub quality: f64,
    /// The cavity tet beyond the face, or `None` for a wall.
    pub child: Option<usize>,
    kept: bool,
}

impl CavityFace {
    const fn new(face: Face, quality: f64, child: Option<usize>) -> Self {
        Self {
            face,
            quality,
            child,
            kept: false,
        }
    }
}

/// A tet that may be deleted to form the cavity.
#[derive(Clone, Debug, PartialEq)]
pub struct CavityNode {
    /// The tet.
    pub tet: Tet,
    /// Its quality; split tets report `1.0`.
    pub quality: f64,
    /// Shortest distance from the split tets.
    pub depth: usize,
    /// Tets whose faces lead here.
    pub parents: SmallBuffer<usize, 3>,
    /// Faces leading away from the new vertex.
    pub faces: SmallBuffer<CavityFace, 4>,
}

impl CavityNode {
    fn new(tet: Tet, quality: f64, depth: usize) -> Self {
        Self {
            tet,
            quality,
            depth,
            parents: SmallBuffer::new(),
            faces: SmallBuffer::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Label {
    Unlabeled,
    Cavity,
    AntiCavity,
}

enum EdgeLink {
    /// The tet itself, weighed by its own quality.
    Tet,
    /// Outward face `slot` of the parent.
    Face { slot: usize, child: Option<usize> },
}

struct WeightedEdge {
    weight: f64,
    parent: usize,
    link: EdgeLink,
}

/// The cavity chosen from a [`CavityDag`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CavitySelection {
    /// DAG nodes to delete, besides the split tets.
    pub nodes: Vec<usize>,
    /// Faces to join to the new vertex, oriented away from the cavity.
    pub faces: Vec<Face>,
    /// Deepest node deleted.
    pub deepest: usize,
}

/// A committed cavity.
#[derive(Clone, Debug, PartialEq)]
pub struct CavityCommit {
    /// The tets created around the new vertex.
    pub created: Vec<Tet>,
    /// Number of tets deleted.
    pub deleted: usize,
    /// Worst quality among the deleted tets; split tets count as `1.0`.
    pub worst_deleted: f64,
    /// Worst quality among the created tets.
    pub worst_created: f64,
    /// Size of the DAG the cavity was chosen from.
    pub dag_size: usize,
}

/// Directed acyclic graph of the tets that may join a cavity around a new
/// vertex.
///
/// The first `seed_count` nodes are the tets of the initial split. Every
/// other node has `parents.len() + faces.len() == 4`: each of its faces
/// either leads back to a parent or away from the vertex.
#[derive(Clone, Debug)]
pub struct CavityDag {
    vertex: VertexTag,
    nodes: Vec<CavityNode>,
    seeds: usize,
}

/// Faces of `tet` other than `(tet[1], tet[2], tet[3])`, oriented into it.
const fn inward_faces(tet: &Tet) -> [Face; 3] {
    let [t0, t1, t2, t3] = *tet;
    [[t2, t1, t0], [t3, t2, t0], [t0, t1, t3]]
}

const fn reversed(face: &Face) -> Face {
    [face[2], face[1], face[0]]
}

/// Whether `point` lies strictly in front of the oriented face.
fn faces_point<C>(mesh: &ImproveMesh<C>, point: &Point3<f64>, face: &Face) -> Result<bool, MeshError>
where
    C: TetComplex,
{
    let a = mesh.position(face[0])?;
    let b = mesh.position(face[1])?;
    let c = mesh.position(face[2])?;
    Ok(orient3d(point, &a, &b, &c) > MIN_FACING)
}

impl CavityDag {
    /// Grows the largest cavity around `vertex` reachable from the split
    /// tets `seeds`, whose outward faces are `faces`.
    ///
    /// # Errors
    ///
    /// Returns [`CavityError`] if the complex does not match the split, and
    /// [`MeshError`] for unknown vertices.
    pub fn build<C>(
        mesh: &ImproveMesh<C>,
        config: &ImproveConfig,
        vertex: VertexTag,
        seeds: &[Tet],
        faces: &[Face],
    ) -> Result<Self, ImproveError>
    where
        C: TetComplex,
    {
        let oracle = config.oracle();
        let point = mesh.position(vertex)?;
        let depth_limit = config.cavity_depth_limit;

        let mut dag = Self {
            vertex,
            nodes: Vec::with_capacity(seeds.len() * 4),
            seeds: seeds.len(),
        };
        let mut index: FastHashMap<Tet, usize> = fast_hash_map_with_capacity(seeds.len() * 4);
        for &seed in seeds {
            index.insert(tet_key(&seed), dag.nodes.len());
            dag.nodes.push(CavityNode::new(seed, 1.0, 0));
        }
        let mut blocking: FastHashSet<Tet> = fast_hash_set_with_capacity(faces.len());
        let mut walls: FastHashSet<Face> = fast_hash_set_with_capacity(faces.len() * 2);
        let mut pending: Vec<Face> = faces.to_vec();
        let mut capped = false;

        while let Some(face) = pending.pop() {
            let [f0, f1, f2] = face;
            let adjacency = mesh
                .complex()
                .adjacencies(&face)
                .ok_or(CavityError::MissingFace { face })?;
            let bottom = adjacency.bottom.ok_or(CavityError::MissingFace { face })?;
            let parent = *index
                .get(&tet_key(&[bottom, f2, f1, f0]))
                .ok_or(CavityError::OrphanFace { face })?;
            let face_quality = mesh.quality(&[vertex, f2, f1, f0], &oracle)?;
            if face_quality <= 0.0 {
                return Err(CavityError::InvertedFace {
                    face,
                    quality: face_quality,
                }
                .into());
            }

            let Some(top) = adjacency.top else {
                dag.nodes[parent]
                    .faces
                    .push(CavityFace::new(face, face_quality, None));
                walls.insert(canonical_face(&face));
                continue;
            };
            let tet = [top, f0, f1, f2];
            let key = tet_key(&tet);
            if index.contains_key(&key) {
                return Err(CavityError::Revisited { tet }.into());
            }
            if !capped && dag.nodes.len() >= MAX_CAVITY_TETS {
                tracing::warn!(tets = dag.nodes.len(), "cavity growth capped");
                capped = true;
            }

            let others = inward_faces(&tet);
            let on_wall = others.map(|other| walls.contains(&canonical_face(&other)));
            let absorb = if capped {
                false
            } else if blocking.contains(&key) {
                let wall_count = 1 + on_wall.iter().filter(|&&w| w).count();
                let enough_walls = wall_count == 2
                    || (wall_count == 3 && config.cavity_vertex_deletion);
                let mut facing = true;
                for (other, &wall) in others.iter().zip(&on_wall) {
                    if !wall && !faces_point(mesh, &point, other)? {
                        facing = false;
                    }
                }
                enough_walls && facing
            } else {
                let mut facing = true;
                for other in &others {
                    if !faces_point(mesh, &point, other)? {
                        facing = false;
                    }
                }
                if !facing {
                    blocking.insert(key);
                }
                facing
            };

            if !absorb {
                dag.nodes[parent]
                    .faces
                    .push(CavityFace::new(face, face_quality, None));
                walls.insert(canonical_face(&face));
                continue;
            }

            // a tet that was blocking has walls shared with other cavity tets
            let absorbed_walls = blocking.remove(&key);
            let child = dag.nodes.len();
            let mut node = CavityNode::new(
                tet,
                mesh.quality(&tet, &oracle)?,
                dag.nodes[parent].depth + 1,
            );
            node.parents.push(parent);
            dag.nodes[parent]
                .faces
                .push(CavityFace::new(face, face_quality, Some(child)));

            let mut open = SmallBuffer::<Face, 3>::new();
            for (other, &wall) in others.iter().zip(&on_wall) {
                if !(absorbed_walls && wall) {
                    open.push(reversed(other));
                    continue;
                }
                walls.remove(&canonical_face(other));
                let owner_bottom = mesh
                    .complex()
                    .adjacencies(other)
                    .and_then(|adjacency| adjacency.bottom)
                    .ok_or(CavityError::MissingFace { face: *other })?;
                let owner = *index
                    .get(&tet_key(&[owner_bottom, other[2], other[1], other[0]]))
                    .ok_or(CavityError::OrphanFace { face: *other })?;
                let target = canonical_face(other);
                let slot = dag.nodes[owner]
                    .faces
                    .iter_mut()
                    .find(|candidate| canonical_face(&candidate.face) == target)
                    .ok_or(CavityError::OrphanFace { face: *other })?;
                slot.child = Some(child);
                node.parents.push(owner);
                node.depth = node.depth.min(dag.nodes[owner].depth);
            }

            let depth = node.depth;
            index.insert(key, child);
            dag.nodes.push(node);
            for outward in open {
                if depth < depth_limit {
                    pending.push(outward);
                } else {
                    let [o0, o1, o2] = outward;
                    let quality = mesh.quality(&[vertex, o2, o1, o0], &oracle)?;
                    dag.nodes[child]
                        .faces
                        .push(CavityFace::new(outward, quality, None));
                    walls.insert(canonical_face(&outward));
                }
            }
        }

        tracing::trace!(
            ?vertex,
            tets = dag.nodes.len(),
            blocking = blocking.len(),
            walls = walls.len(),
            "grew cavity"
        );
        Ok(dag)
    }

    /// The inserted vertex.
    #[must_use]
    pub const fn vertex(&self) -> VertexTag {
        self.vertex
    }

    /// Every node, split tets first.
    #[must_use]
    pub fn nodes(&self) -> &[CavityNode] {
        &self.nodes
    }

    /// Number of split tets.
    #[must_use]
    pub const fn seed_count(&self) -> usize {
        self.seeds
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the DAG has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Checks the structural invariants of the DAG against `mesh`.
    ///
    /// # Errors
    ///
    /// Returns the first [`CavityError`] found.
    pub fn check<C>(&self, mesh: &ImproveMesh<C>) -> Result<(), CavityError>
    where
        C: TetComplex,
    {
        for (index, node) in self.nodes.iter().enumerate() {
            if !mesh.tet_exists(&node.tet) {
                return Err(CavityError::MissingTet { tet: node.tet });
            }
            if index >= self.seeds && node.parents.len() + node.faces.len() != 4 {
                return Err(CavityError::LinkCount {
                    tet: node.tet,
                    parents: node.parents.len(),
                    faces: node.faces.len(),
                });
            }
            for face in &node.faces {
                if face.quality <= 0.0 {
                    return Err(CavityError::InvertedFace {
                        face: face.face,
                        quality: face.quality,
                    });
                }
                if !face.face.iter().all(|v| node.tet.contains(v)) {
                    return Err(CavityError::OrphanFace { face: face.face });
                }
                if let Some(child) = face.child {
                    let child_node = &self.nodes[child];
                    if !child_node.parents.contains(&index) {
                        return Err(CavityError::MissingParentLink {
                            parent: node.tet,
                            child: child_node.tet,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Merges the split tets into node 0 so the DAG has a single root.
    fn merge_seeds(&mut self) {
        for seed in 1..self.seeds {
            let faces = std::mem::take(&mut self.nodes[seed].faces);
            for face in &faces {
                if let Some(child) = face.child {
                    for parent in &mut self.nodes[child].parents {
                        if *parent == seed {
                            *parent = 0;
                        }
                    }
                }
            }
            self.nodes[0].faces.extend(faces);
        }
    }

    /// Chooses the cavity of lexicographically maximal quality.
    ///
    /// Node 0 (the merged split tets) is always in the cavity. The DAG is
    /// modified: split tets are merged and the faces kept for propagation are
    /// marked.
    pub fn select(&mut self, config: &ImproveConfig) -> CavitySelection {
        self.merge_seeds();
        let mut labels = vec![Label::Unlabeled; self.nodes.len()];
        labels[0] = Label::Cavity;

        let mut edges = Vec::with_capacity(self.nodes.len() * 4);
        for (index, node) in self.nodes.iter_mut().enumerate() {
            let weight = config.depth_weight(node.depth);
            if config.cavity_consider_deleted && index >= self.seeds {
                edges.push(WeightedEdge {
                    weight: node.quality * weight,
                    parent: index,
                    link: EdgeLink::Tet,
                });
            }
            for (slot, face) in node.faces.iter_mut().enumerate() {
                face.kept = false;
                edges.push(WeightedEdge {
                    weight: face.quality * weight,
                    parent: index,
                    link: EdgeLink::Face {
                        slot,
                        child: face.child,
                    },
                });
            }
        }
        edges.sort_by_key(|edge| OrderedFloat(edge.weight));

        let mut selection = CavitySelection::default();
        for edge in &edges {
            let parent = edge.parent;
            let EdgeLink::Face { slot, child } = edge.link else {
                if labels[parent] == Label::Unlabeled {
                    self.label_cavity(&mut labels, parent);
                }
                continue;
            };
            let child_label = child.map_or(Label::AntiCavity, |c| labels[c]);
            match (labels[parent], child_label) {
                (Label::Cavity, Label::AntiCavity) => {
                    selection.faces.push(self.nodes[parent].faces[slot].face);
                }
                (Label::Cavity, Label::Unlabeled) => {
                    if let Some(child) = child {
                        self.label_cavity(&mut labels, child);
                    }
                }
                (Label::Unlabeled, Label::AntiCavity) => {
                    self.label_anticavity(&mut labels, parent);
                }
                (Label::Unlabeled, _) => {
                    self.nodes[parent].faces[slot].kept = true;
                }
                _ => {}
            }
        }

        for (index, label) in labels.iter().enumerate().skip(1) {
            if *label == Label::Cavity {
                selection.nodes.push(index);
                selection.deepest = selection.deepest.max(self.nodes[index].depth);
            }
        }
        selection
    }

    /// Labels `start`, its ancestors and its kept descendants as cavity.
    fn label_cavity(&self, labels: &mut [Label], start: usize) {
        labels[start] = Label::Cavity;
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            for &parent in &node.parents {
                if labels[parent] == Label::Unlabeled {
                    labels[parent] = Label::Cavity;
                    stack.push(parent);
                }
            }
            for face in node.faces.iter().filter(|face| face.kept) {
                if let Some(child) = face.child {
                    if labels[child] == Label::Unlabeled {
                        labels[child] = Label::Cavity;
                        stack.push(child);
                    }
                }
            }
        }
    }

    /// Labels `start`, its descendants and its ancestors through kept faces
    /// as anti-cavity.
    fn label_anticavity(&self, labels: &mut [Label], start: usize) {
        labels[start] = Label::AntiCavity;
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            for &parent in &node.parents {
                if labels[parent] != Label::Unlabeled {
                    continue;
                }
                let kept = self.nodes[parent]
                    .faces
                    .iter()
                    .any(|face| face.kept && face.child == Some(index));
                if kept {
                    labels[parent] = Label::AntiCavity;
                    stack.push(parent);
                }
            }
            for face in &node.faces {
                if let Some(child) = face.child {
                    if labels[child] == Label::Unlabeled {
                        labels[child] = Label::AntiCavity;
                        stack.push(child);
                    }
                }
            }
        }
    }

    /// Deletes the split tets and the selected nodes, then joins every
    /// selected face to the new vertex.
    ///
    /// # Errors
    ///
    /// Returns [`CavityError::InvertedFace`] if a new tet would not be
    /// positive, or a [`MeshError`] from the journaled mutations.
    pub fn commit<C>(
        &self,
        mesh: &mut ImproveMesh<C>,
        config: &ImproveConfig,
        selection: &CavitySelection,
    ) -> Result<CavityCommit, ImproveError>
    where
        C: TetComplex,
    {
        let oracle = config.oracle();
        let mut worst_deleted = f64::INFINITY;
        let mut deleted = 0;
        for node in self.nodes.iter().take(self.seeds) {
            mesh.delete_tet(node.tet)?;
            worst_deleted = worst_deleted.min(node.quality);
            deleted += 1;
        }
        for &index in &selection.nodes {
            if index < self.seeds {
                continue;
            }
            let node = &self.nodes[index];
            mesh.delete_tet(node.tet)?;
            worst_deleted = worst_deleted.min(node.quality);
            deleted += 1;
        }

        let mut created = Vec::with_capacity(selection.faces.len());
        let mut worst_created = f64::INFINITY;
        for &[f0, f1, f2] in &selection.faces {
            let tet = [self.vertex, f2, f1, f0];
            let quality = mesh.quality(&tet, &oracle)?;
            if quality <= 0.0 {
                return Err(CavityError::InvertedFace {
                    face: [f0, f1, f2],
                    quality,
                }
                .into());
            }
            mesh.insert_tet(tet)?;
            worst_created = worst_created.min(quality);
            created.push(tet);
        }
        tracing::trace!(
            vertex = ?self.vertex,
            deleted,
            created = created.len(),
            deepest = selection.deepest,
            "committed cavity"
        );
        Ok(CavityCommit {
            created,
            deleted,
            worst_deleted,
            worst_created,
            dag_size: self.nodes.len(),
        })
    }
}

/// Grows, selects and commits the optimal cavity around `vertex`.
///
/// `seeds` are the tets created by the initial split and `faces` their faces
/// that point away from the vertex.
///
/// # Errors
///
/// Returns an [`ImproveError`] if the DAG or the complex is inconsistent.
pub fn optimal_cavity<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    vertex: VertexTag,
    seeds: &[Tet],
    faces: &[Face],
) -> Result<CavityCommit, ImproveError>
where
    C: TetComplex,
{
    let mut dag = CavityDag::build(mesh, config, vertex, seeds, faces)?;
    dag.check(mesh)?;
    let selection = dag.select(config);
    dag.commit(mesh, config, &selection)
}

// =============================================================================
// CAVITY IMPROVEMENT
// =============================================================================

/// Result of improving a committed cavity.
#[derive(Clone, Debug)]
pub struct ImprovedCavity {
    /// Worst quality among the affected tets.
    pub quality: f64,
    /// The tets touched by the improvement.
    pub affected: TetStack,
    /// Shortest edge among the affected tets.
    pub shortest: f64,
    /// Longest edge among the affected tets.
    pub longest: f64,
    /// In anisotropic mode, whether every affected tet is positive in
    /// physical space.
    pub physically_valid: bool,
}

/// Smooths the new vertex and runs local topological and smoothing passes
/// on the cavity until the worst quality stops rising.
///
/// With `try_hard` the passes get a larger budget and a smaller improvement
/// threshold.
///
/// # Errors
///
/// Returns an [`ImproveError`] if a pass finds the complex inconsistent.
pub fn improve_cavity<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    vertex: VertexTag,
    tets: &[Tet],
    try_hard: bool,
    stats: &mut PassStats,
) -> Result<ImprovedCavity, ImproveError>
where
    C: TetComplex,
{
    let oracle = config.oracle();
    let (max_stack, min_improvement, max_passes) = if try_hard {
        (
            MAX_CAVITY_STACK * TRY_HARD_FACTOR,
            TRY_HARD_MIN_SUBMESH_IMPROVEMENT,
            TRY_HARD_MAX_SUBMESH_ITERATIONS,
        )
    } else {
        (
            MAX_CAVITY_STACK,
            MIN_SUBMESH_IMPROVEMENT,
            MAX_SUBMESH_ITERATIONS,
        )
    };

    let mut current = TetStack::new();
    let mut old_worst = f64::INFINITY;
    for &tet in tets {
        let quality = mesh.quality(&tet, &oracle)?;
        old_worst = old_worst.min(quality);
        current.push(tet, quality);
    }

    let mut new_worst: Option<f64> = None;
    let mut passes = 0;
    let (mut smoothed, mut flipped) = (true, true);
    while new_worst.is_none_or(|worst| worst > old_worst + min_improvement)
        && passes <= max_passes
        && (smoothed || flipped)
    {
        if let Some(worst) = new_worst {
            old_worst = worst;
        }
        let star = mesh.star(vertex);
        if star.tets.is_empty() {
            break;
        }
        smoothed = optimize_vertex(mesh, config, vertex, &star, &mut stats.smoothing)?.is_some();
        let mut next = TetStack::new();
        let topo = topo_pass(mesh, config, &current, Some(&mut next))?;
        stats.absorb(&topo);
        flipped = topo.accepted;
        current = next;
        new_worst = Some(topo.min_after);
        passes += 1;
    }

    let mut worst = new_worst.unwrap_or(old_worst);
    while current.len() < max_stack && passes < max_passes {
        let mut influence = TetStack::new();
        let pass = smooth_pass(mesh, config, &current, Some(&mut influence))?;
        stats.absorb(&pass);
        if !pass.accepted || pass.min_after - worst <= min_improvement {
            break;
        }
        worst = pass.min_after;
        current.append_unique(&influence);
        passes += 1;
    }

    current.retain_live(mesh);
    let summary = stack_quality(mesh, &oracle, &current)?;
    let quality = if summary.tet_count == 0 {
        0.0
    } else {
        summary.min
    };
    let (shortest, longest) = stack_edge_extremes(mesh, &current)?;
    let mut physically_valid = true;
    if mesh.is_anisotropic() {
        for entry in current.iter() {
            if mesh.physical_quality(&entry.tet, &oracle)? <= MIN_SIZE_TET_QUALITY {
                physically_valid = false;
                break;
            }
        }
    }
    tracing::trace!(?vertex, passes, quality, tets = current.len(), "improved cavity");
    Ok(ImprovedCavity {
        quality,
        affected: current,
        shortest,
        longest,
        physically_valid,
    })
}

// =============================================================================
// INITIAL SPLITS
// =============================================================================

/// Where a new vertex is inserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertionKind {
    /// At the barycenter of a boundary face.
    Facet,
    /// At the barycenter of a tet.
    Body,
    /// At the midpoint of a boundary edge.
    Segment,
}

impl fmt::Display for InsertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Facet => "facet",
            Self::Body => "body",
            Self::Segment => "segment",
        };
        f.write_str(name)
    }
}

/// A new vertex and the tets of its initial split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitialSplit {
    /// The new vertex.
    pub vertex: VertexTag,
    /// The tets created by the split.
    pub tets: Vec<Tet>,
    /// Faces of the split tets facing away from the vertex, excluding faces
    /// on the boundary.
    pub faces: Vec<Face>,
}

/// Classifies a freshly split vertex from its star and, for boundary
/// vertices, gives it a quadric. Returns `false` if the quadric is needed
/// but degenerate.
fn classify_new_vertex<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    vertex: VertexTag,
) -> Result<bool, MeshError>
where
    C: TetComplex,
{
    let star = mesh.star(vertex);
    let mut info = classify_star(mesh.complex(), &star);
    if config.use_quadrics && info.kind.is_boundary() {
        let Some(quadric) = mesh.star_quadric(vertex, &star)? else {
            return Ok(false);
        };
        info.quadric = Some(quadric);
    }
    mesh.set_info(vertex, info);
    Ok(true)
}

/// Whether every tet in `tets` is positive, in physical space as well when
/// the mesh is anisotropic.
fn all_valid<C>(mesh: &ImproveMesh<C>, config: &ImproveConfig, tets: &[Tet]) -> Result<bool, MeshError>
where
    C: TetComplex,
{
    let oracle = config.oracle();
    for tet in tets {
        if mesh.is_anisotropic() && mesh.physical_quality(tet, &oracle)? <= MIN_SIZE_TET_QUALITY {
            return Ok(false);
        }
        if mesh.quality(tet, &oracle)? <= MIN_TET_QUALITY {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Splits `tet` with a vertex at the barycenter of its boundary face `face`
/// (oriented away from `tet`) using a 1-3 flip.
///
/// Returns `None`, with the split still applied, if a new tet is inverted or
/// the vertex's quadric is degenerate; the caller rolls back.
///
/// # Errors
///
/// Returns a [`MeshError`] if `tet` or `face` do not match the complex.
pub fn split_facet<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    tet: &Tet,
    face: &Face,
) -> Result<Option<InitialSplit>, MeshError>
where
    C: TetComplex,
{
    let Some(&apex) = tet.iter().find(|v| !face.contains(v)) else {
        return Err(MeshError::MissingTet { tet: *tet });
    };
    let [f0, f1, f2] = *face;
    let split = [apex, f2, f1, f0];
    if !mesh.tet_exists(&split) {
        return Err(MeshError::MissingTet { tet: split });
    }
    let position = face_barycenter(
        &mesh.position(f0)?,
        &mesh.position(f1)?,
        &mesh.position(f2)?,
    );
    let vertex = mesh.add_vertex(position, VertexInfo::free());
    let flip = Flip::flip13(&split, vertex);
    mesh.flip(flip)?;
    let tets: Vec<Tet> = flip.new_tets().to_vec();
    if !classify_new_vertex(mesh, config, vertex)? || !all_valid(mesh, config, &tets)? {
        return Ok(None);
    }
    let [t0, t1, t2, t3] = split;
    Ok(Some(InitialSplit {
        vertex,
        tets,
        faces: vec![[t0, t1, t2], [t0, t3, t1], [t0, t2, t3]],
    }))
}

/// Splits `tet` with a vertex at its barycenter using a 1-4 flip.
///
/// The new vertex is strictly inside `tet`, so no boundary face touches it
/// and it stays [`Free`](crate::core::vertex::VertexKind::Free) without
/// classification.
///
/// # Errors
///
/// Returns a [`MeshError`] if `tet` is not live.
pub fn split_body<C>(mesh: &mut ImproveMesh<C>, tet: &Tet) -> Result<InitialSplit, MeshError>
where
    C: TetComplex,
{
    let position = tet_barycenter(&mesh.tet_points(tet)?);
    let vertex = mesh.add_vertex(position, VertexInfo::free());
    let flip = Flip::flip14(tet, vertex);
    mesh.flip(flip)?;
    let [v1, v2, v3, v4] = *tet;
    Ok(InitialSplit {
        vertex,
        tets: flip.new_tets().to_vec(),
        faces: vec![[v1, v2, v3], [v1, v3, v4], [v1, v4, v2], [v2, v4, v3]],
    })
}

/// Splits every tet around the boundary edge of `ring` with a vertex at the
/// edge midpoint, one 1-2 flip per tet.
///
/// Returns `None`, with the splits applied so far, if a new tet is inverted
/// or the vertex's quadric is degenerate; the caller rolls back.
///
/// # Errors
///
/// Returns a [`MeshError`] if the ring does not match the complex.
pub fn split_segment<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    ring: &EdgeRing,
) -> Result<Option<InitialSplit>, MeshError>
where
    C: TetComplex,
{
    let a = mesh.position(ring.origin)?;
    let b = mesh.position(ring.destination)?;
    let vertex = mesh.add_vertex(nalgebra::center(&a, &b), VertexInfo::free());
    let mut tets = Vec::with_capacity(ring.tet_count() * 2);
    let mut faces = Vec::with_capacity(ring.tet_count() * 2);
    for ring_tet in ring.tets() {
        let flip = Flip::flip12(&ring_tet, vertex);
        mesh.flip(flip)?;
        let halves = flip.new_tets();
        if !all_valid(mesh, config, &halves)? {
            return Ok(None);
        }
        tets.extend_from_slice(&halves);
        let [e0, e1, c, d] = ring_tet;
        faces.push([e0, c, d]);
        faces.push([e1, d, c]);
    }
    if !classify_new_vertex(mesh, config, vertex)? {
        return Ok(None);
    }
    Ok(Some(InitialSplit {
        vertex,
        tets,
        faces,
    }))
}

// =============================================================================
// VERTEX INSERTION
// =============================================================================

/// What an insertion attempt did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InsertionOutcome {
    /// A vertex was inserted and kept.
    Inserted {
        /// The new vertex.
        vertex: VertexTag,
        /// How it was placed.
        kind: InsertionKind,
        /// Worst quality the insertion had to beat.
        min_before: f64,
        /// Worst quality of the improved cavity.
        min_after: f64,
    },
    /// Every enabled variant was tried and rolled back.
    Rejected,
    /// The tet is no longer in the mesh.
    Stale,
}

impl InsertionOutcome {
    /// Whether a vertex was inserted.
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

fn tally(stats: &mut InsertionStats, kind: InsertionKind) -> &mut Tally {
    match kind {
        InsertionKind::Facet => &mut stats.facet,
        InsertionKind::Body => &mut stats.body,
        InsertionKind::Segment => &mut stats.segment,
    }
}

/// Grows, commits and improves the cavity of `split`, keeping it if it beats
/// `trigger_quality` and the worst tet it deleted. Returns `None` when the
/// caller must roll back.
#[allow(clippy::too_many_arguments)]
fn finish_insertion<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    kind: InsertionKind,
    split: Option<InitialSplit>,
    trigger_quality: f64,
    try_hard: bool,
    output: Option<&mut TetStack>,
    stats: &mut PassStats,
) -> Result<Option<InsertionOutcome>, ImproveError>
where
    C: TetComplex,
{
    let Some(split) = split else {
        tally(&mut stats.insertion, kind).record(false);
        return Ok(None);
    };

    let cavity = optimal_cavity(mesh, config, split.vertex, &split.tets, &split.faces)?;
    stats.insertion.largest_cavity = stats.insertion.largest_cavity.max(cavity.dag_size);
    let min_before = cavity.worst_deleted.min(trigger_quality);
    let improved = improve_cavity(mesh, config, split.vertex, &cavity.created, try_hard, stats)?;

    let size_ok = !config.sizing
        || config.target_edge_length <= 0.0
        || (improved.longest <= config.target_edge_length * config.longer_factor
            && improved.shortest >= config.target_edge_length * config.shorter_factor);
    if !size_ok {
        stats.insertion.too_long += 1;
    }
    if improved.quality > min_before + MIN_CAVITY_IMPROVEMENT
        && size_ok
        && improved.physically_valid
    {
        tally(&mut stats.insertion, kind).record(true);
        stats.insertion.cavity_tets_deleted += cavity.deleted;
        stats.insertion.cavity_tets_created += cavity.created.len();
        if let Some(output) = output {
            for entry in improved.affected.iter() {
                output.push_unique(entry.tet, entry.quality);
            }
        }
        tracing::debug!(
            vertex = ?split.vertex,
            %kind,
            deleted = cavity.deleted,
            created = cavity.created.len(),
            before = min_before,
            after = improved.quality,
            "inserted vertex"
        );
        return Ok(Some(InsertionOutcome::Inserted {
            vertex: split.vertex,
            kind,
            min_before,
            min_after: improved.quality,
        }));
    }
    tracing::trace!(
        vertex = ?split.vertex,
        %kind,
        before = min_before,
        after = improved.quality,
        size_ok,
        "insertion did not improve"
    );
    tally(&mut stats.insertion, kind).record(false);
    Ok(None)
}

/// Tries to improve `tet` (of quality `quality`) by inserting a vertex on
/// one of its boundary faces, inside it, or on one of its boundary edges,
/// in that order, keeping the first insertion that improves the region.
///
/// Affected tets of a kept insertion are pushed on `output`.
///
/// # Errors
///
/// Returns an [`ImproveError`] if the complex is found inconsistent.
pub fn insert_vertex<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    tet: &Tet,
    quality: f64,
    try_hard: bool,
    mut output: Option<&mut TetStack>,
    stats: &mut PassStats,
) -> Result<InsertionOutcome, ImproveError>
where
    C: TetComplex,
{
    if !mesh.tet_exists(tet) {
        return Ok(InsertionOutcome::Stale);
    }
    let checkpoint = mesh.checkpoint();

    if config.insert_facet {
        let faces = mesh.complex().boundary_faces(tet);
        for face in faces {
            let split = split_facet(mesh, config, tet, &face)?;
            let outcome = finish_insertion(
                mesh,
                config,
                InsertionKind::Facet,
                split,
                quality,
                try_hard,
                output.as_deref_mut(),
                stats,
            )?;
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
            mesh.revert_to(checkpoint)?;
        }
    }

    if config.insert_body {
        let split = split_body(mesh, tet)?;
        let outcome = finish_insertion(
            mesh,
            config,
            InsertionKind::Body,
            Some(split),
            quality,
            try_hard,
            output.as_deref_mut(),
            stats,
        )?;
        if let Some(outcome) = outcome {
            return Ok(outcome);
        }
        mesh.revert_to(checkpoint)?;
    }

    if config.insert_segment {
        let edges = mesh.complex().boundary_edges(tet)?;
        for edge in &edges {
            let split = split_segment(mesh, config, &edge.ring)?;
            let outcome = finish_insertion(
                mesh,
                config,
                InsertionKind::Segment,
                split,
                quality,
                try_hard,
                output.as_deref_mut(),
                stats,
            )?;
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
            mesh.revert_to(checkpoint)?;
        }
    }
    Ok(InsertionOutcome::Rejected)
}

// =============================================================================
// PASS DRIVERS
// =============================================================================

fn run_insert_pass<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    stack: &TetStack,
    mut output: Option<&mut TetStack>,
    kind: PassKind,
) -> Result<PassStats, ImproveError>
where
    C: TetComplex,
{
    let oracle = config.oracle();
    let mut stats = PassStats::new(kind);
    let local = output.is_some();
    if let Some(output) = output.as_deref_mut() {
        output.clear();
        output.append_unique(stack);
    }
    let before = if local {
        stack_quality(mesh, &oracle, stack)?
    } else {
        mesh_quality(mesh, &oracle)?
    };
    stats.min_before = before.min;
    if !config.any_insertion() {
        stats.min_after = before.min;
        return Ok(stats);
    }

    let checkpoint = mesh.checkpoint();
    let mut work = stack.clone();
    let mut inserted = 0_usize;
    while let Some(entry) = work.pop() {
        if !mesh.tet_exists(&entry.tet) {
            continue;
        }
        // an earlier insertion may have changed it
        let quality = mesh.quality(&entry.tet, &oracle)?;
        let try_hard = quality - before.min < CLOSE_TO_WORST;
        let outcome = insert_vertex(
            mesh,
            config,
            &entry.tet,
            quality,
            try_hard,
            output.as_deref_mut(),
            &mut stats,
        )?;
        if outcome.is_inserted() {
            inserted += 1;
        }
    }

    let after = match output.as_deref() {
        Some(output) => stack_quality(mesh, &oracle, output)?,
        None => mesh_quality(mesh, &oracle)?,
    };
    let rejected = after.min < before.min || (local && inserted == 0);
    if rejected {
        if inserted > 0 {
            tracing::debug!(
                before = before.min,
                after = after.min,
                inserted,
                "insertion pass did not improve; rolling back"
            );
        }
        mesh.revert_to(checkpoint)?;
        if let Some(output) = output {
            output.clear();
            output.append_unique(stack);
        }
        stats.min_after = before.min;
        stats.accepted = false;
    } else {
        stats.min_after = after.min;
        stats.accepted = inserted > 0;
    }
    tracing::debug!(
        %kind,
        inserted,
        min_before = stats.min_before,
        min_after = stats.min_after,
        "insertion pass done"
    );
    Ok(stats)
}

/// One insertion pass over `stack`.
///
/// With `output` the pass is local: the output starts as a copy of `stack`,
/// collects every tet touched by a kept insertion, and the pass is rolled
/// back unless something was inserted without lowering the worst quality on
/// it. Without `output` the pass is rolled back only if the mesh minimum
/// fell. The pass reports `accepted` only if it kept an insertion.
///
/// # Errors
///
/// Returns an [`ImproveError`] if the complex is found inconsistent.
pub fn insert_pass<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    stack: &TetStack,
    output: Option<&mut TetStack>,
) -> Result<PassStats, ImproveError>
where
    C: TetComplex,
{
    run_insert_pass(mesh, config, stack, output, PassKind::Insert)
}

/// Global insertion pass over the worst tets.
///
/// Normally the worst `percent_worst` of the tets are attacked. In desperate
/// mode every tet under [`ImproveConfig::desperate_threshold`] is.
///
/// # Errors
///
/// Returns an [`ImproveError`] if the complex is found inconsistent.
pub fn worst_tet_attack<C>(
    mesh: &mut ImproveMesh<C>,
    config: &ImproveConfig,
    desperate: bool,
) -> Result<PassStats, ImproveError>
where
    C: TetComplex,
{
    let oracle = config.oracle();
    let (stack, kind) = if desperate {
        let worst = mesh_quality(mesh, &oracle)?.min;
        (
            fill_by_quality(mesh, &oracle, config.desperate_threshold(worst))?,
            PassKind::Desperate,
        )
    } else {
        (
            fill_by_percent(mesh, &oracle, config.percent_worst)?,
            PassKind::Insert,
        )
    };
    tracing::debug!(tets = stack.len(), desperate, "attacking worst tets");
    run_insert_pass(mesh, config, &stack, None, kind)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ImproveConfigBuilder;
    use crate::core::complex::same_tet;
    use crate::core::journal::JournalEntry;
    use crate::core::vertex::VertexKind;
    use crate::geometry::predicates::tet_volume;
    use approx::assert_relative_eq;

    fn orient(points: &[Point3<f64>], t: [usize; 4]) -> [usize; 4] {
        if orient3d(&points[t[0]], &points[t[1]], &points[t[2]], &points[t[3]]) > 0.0 {
            t
        } else {
            [t[1], t[0], t[2], t[3]]
        }
    }

    /// Eight tets fanned from vertex 0 to the faces of the unit octahedron
    /// with corners 1..=6 at `±x`, `±y`, `±z`.
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
        let mut tets = Vec::new();
        for x in [1, 2] {
            for y in [3, 4] {
                for z in [5, 6] {
                    tets.push(orient(&points, [0, x, y, z]));
                }
            }
        }
        let (mut mesh, tags) = ImproveMesh::from_tets(&points, &tets).unwrap();
        mesh.classify_vertices();
        (mesh, tags)
    }

    fn single_tet() -> (ImproveMesh, Tet) {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let (mut mesh, t) = ImproveMesh::from_tets(&points, &[[0, 1, 2, 3]]).unwrap();
        mesh.classify_vertices();
        (mesh, [t[0], t[1], t[2], t[3]])
    }

    /// Three tets fanned around the boundary edge `(0, 1)` over four rim
    /// vertices a quarter turn apart.
    fn boundary_fan() -> (ImproveMesh, Vec<VertexTag>) {
        let mut points = vec![Point3::new(0.0, 0.0, -1.0), Point3::new(0.0, 0.0, 1.0)];
        for i in 0..4_u32 {
            let angle = std::f64::consts::TAU * f64::from(i) / 4.0;
            points.push(Point3::new(angle.cos(), angle.sin(), 0.0));
        }
        let tets: Vec<[usize; 4]> = (0..3).map(|i| [0, 1, 2 + (i + 1) % 4, 2 + i]).collect();
        let (mut mesh, tags) = ImproveMesh::from_tets(&points, &tets).unwrap();
        mesh.classify_vertices();
        (mesh, tags)
    }

    fn octant(mesh: &ImproveMesh, t: &[VertexTag]) -> Tet {
        mesh.tets()
            .into_iter()
            .find(|tet| [t[0], t[1], t[3], t[5]].iter().all(|v| tet.contains(v)))
            .unwrap()
    }

    fn total_volume(mesh: &ImproveMesh) -> f64 {
        mesh.tets()
            .iter()
            .map(|tet| tet_volume(&mesh.tet_points(tet).unwrap()))
            .sum()
    }

    fn sorted_keys(mesh: &ImproveMesh) -> Vec<Tet> {
        let mut keys: Vec<Tet> = mesh.tets().iter().map(tet_key).collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn test_body_split_journals_only_vertex_and_flip() {
        let (mut mesh, tet) = single_tet();
        let journal = mesh.journal().len();
        let split = split_body(&mut mesh, &tet).unwrap();
        assert_eq!(mesh.kind(split.vertex), VertexKind::Free);
        assert!(mesh.star(split.vertex).interior);
        assert_eq!(mesh.journal().len(), journal + 2);
        assert!(
            mesh.journal().entries()[journal..]
                .iter()
                .all(|entry| !matches!(entry, JournalEntry::Classify { .. }))
        );
    }

    #[test]
    fn test_body_insertion_into_single_tet() {
        let (mut mesh, tet) = single_tet();
        let config = ImproveConfig::default();
        let split = split_body(&mut mesh, &tet).unwrap();
        assert_eq!(mesh.kind(split.vertex), VertexKind::Free);
        let cavity =
            optimal_cavity(&mut mesh, &config, split.vertex, &split.tets, &split.faces).unwrap();

        // every face is on the boundary, so the cavity is the tet itself
        assert_eq!(cavity.created.len(), 4);
        assert_eq!(cavity.dag_size, 4);
        assert_eq!(mesh.number_of_tets(), 4);
        let mut covered: Vec<Face> = Vec::new();
        for created in &cavity.created {
            assert!(mesh.tet_exists(created));
            assert_eq!(created[0], split.vertex);
            covered.push(canonical_face(&[created[3], created[2], created[1]]));
        }
        for face in crate::core::complex::outward_faces(&tet).map(|(face, _)| canonical_face(&face)) {
            assert!(covered.contains(&face));
        }
        assert_relative_eq!(total_volume(&mesh), 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_segment_insertion_doubles_ring() {
        let (mut mesh, t) = boundary_fan();
        let config = ImproveConfig::default();
        let ring = mesh.complex().edge_ring(&[t[0], t[1], t[4], t[3]]).unwrap();
        assert_eq!(ring.tet_count(), 3);
        let split = split_segment(&mut mesh, &config, &ring).unwrap().unwrap();

        assert_eq!(split.tets.len(), 6);
        assert_eq!(mesh.number_of_tets(), 6);
        for tet in &split.tets {
            assert!(mesh.tet_exists(tet));
            assert!(tet.contains(&split.vertex));
        }
        let surface = mesh.complex().surface_faces();
        assert!(
            !surface
                .iter()
                .any(|face| face.contains(&t[0]) && face.contains(&t[1]))
        );
        let touching = surface.iter().filter(|face| face.contains(&split.vertex)).count();
        assert_eq!(touching, 4);
        // the two boundary planes meet at the edge
        assert_eq!(mesh.kind(split.vertex), VertexKind::Segment);
        assert!(mesh.info(split.vertex).quadric.is_some());
    }

    #[test]
    fn test_facet_split_produces_facet_vertex() {
        let (mut mesh, tet) = single_tet();
        let config = ImproveConfig::default();
        let face = mesh.complex().boundary_faces(&tet)[0];
        let split = split_facet(&mut mesh, &config, &tet, &face).unwrap().unwrap();
        assert_eq!(split.tets.len(), 3);
        assert_eq!(split.faces.len(), 3);
        assert_eq!(mesh.kind(split.vertex), VertexKind::Facet);
        for tet in &split.tets {
            assert!(mesh.tet_exists(tet));
        }
    }

    #[test]
    fn test_cavity_dag_invariants() {
        let (mut mesh, t) = octahedron(Point3::origin());
        let config = ImproveConfig::default();
        let tet = octant(&mesh, &t);
        let split = split_body(&mut mesh, &tet).unwrap();
        let dag = CavityDag::build(&mesh, &config, split.vertex, &split.tets, &split.faces).unwrap();

        dag.check(&mesh).unwrap();
        assert_eq!(dag.seed_count(), 4);
        // the vertex sees past the three faces it shares with other octants
        assert!(dag.len() > 4);
        for node in &dag.nodes()[dag.seed_count()..] {
            assert_eq!(node.parents.len() + node.faces.len(), 4);
            assert!(node.depth >= 1);
        }
    }

    #[test]
    fn test_depth_limit_bounds_growth() {
        let (mut mesh, t) = octahedron(Point3::origin());
        let config = ImproveConfigBuilder::default()
            .cavity_depth_limit(1_usize)
            .build()
            .unwrap();
        let tet = octant(&mesh, &t);
        let split = split_body(&mut mesh, &tet).unwrap();
        let dag = CavityDag::build(&mesh, &config, split.vertex, &split.tets, &split.faces).unwrap();
        dag.check(&mesh).unwrap();
        assert_eq!(dag.len(), 7);
        assert!(dag.nodes()[4..].iter().all(|node| node.depth == 1));
    }

    #[test]
    fn test_committed_cavity_fills_the_same_volume() {
        let (mut mesh, t) = octahedron(Point3::origin());
        let config = ImproveConfig::default();
        let volume = total_volume(&mesh);
        let tet = octant(&mesh, &t);
        let split = split_body(&mut mesh, &tet).unwrap();
        let cavity =
            optimal_cavity(&mut mesh, &config, split.vertex, &split.tets, &split.faces).unwrap();

        assert!(cavity.deleted >= 4);
        assert!(cavity.worst_created > 0.0);
        assert_relative_eq!(total_volume(&mesh), volume, epsilon = 1e-12);
        let oracle = config.oracle();
        for tet in mesh.tets() {
            assert!(mesh.quality(&tet, &oracle).unwrap() > 0.0);
        }
        for created in &cavity.created {
            assert!(mesh.tet_exists(created));
            assert_eq!(created[0], split.vertex);
        }
    }

    #[test]
    fn test_select_keeps_root_and_closes_boundary() {
        let (mut mesh, t) = octahedron(Point3::origin());
        let config = ImproveConfigBuilder::default()
            .cavity_consider_deleted(true)
            .build()
            .unwrap();
        let tet = octant(&mesh, &t);
        let split = split_body(&mut mesh, &tet).unwrap();
        let mut dag =
            CavityDag::build(&mesh, &config, split.vertex, &split.tets, &split.faces).unwrap();
        let selection = dag.select(&config);
        // every seed's faces now hang off node 0
        assert!(dag.nodes()[1..4].iter().all(|node| node.faces.is_empty()));
        assert!(!selection.faces.is_empty());
        assert!(!selection.nodes.contains(&0));
        let committed = dag.commit(&mut mesh, &config, &selection).unwrap();
        assert_eq!(committed.deleted, 4 + selection.nodes.len());
        assert_eq!(committed.created.len(), selection.faces.len());
    }

    #[test]
    fn test_failed_insertion_leaves_mesh_unchanged() {
        let (mut mesh, tet) = single_tet();
        let config = ImproveConfig::default();
        let before = sorted_keys(&mesh);
        let journaled = mesh.journal().len();
        let quality = mesh.quality(&tet, &config.oracle()).unwrap();
        let mut stats = PassStats::new(PassKind::Insert);
        let outcome = insert_vertex(&mut mesh, &config, &tet, quality, false, None, &mut stats).unwrap();

        match outcome {
            InsertionOutcome::Inserted { min_before, min_after, .. } => {
                assert!(min_after > min_before);
            }
            _ => {
                assert_eq!(sorted_keys(&mesh), before);
                assert_eq!(mesh.journal().len(), journaled);
            }
        }
        assert!(stats.insertion.facet.attempts >= 1);
        assert!(stats.insertion.body.attempts <= 1);
    }

    #[test]
    fn test_stale_and_disabled_insertion() {
        let (mut mesh, tet) = single_tet();
        let config = ImproveConfigBuilder::default()
            .insert_body(false)
            .insert_facet(false)
            .insert_segment(false)
            .build()
            .unwrap();
        let mut stats = PassStats::new(PassKind::Insert);
        let journaled = mesh.journal().len();
        let stale = [tet[1], tet[0], tet[2], tet[3]];
        assert_eq!(
            insert_vertex(&mut mesh, &config, &stale, 0.5, false, None, &mut stats).unwrap(),
            InsertionOutcome::Stale
        );
        assert_eq!(
            insert_vertex(&mut mesh, &config, &tet, 0.5, false, None, &mut stats).unwrap(),
            InsertionOutcome::Rejected
        );
        assert_eq!(mesh.journal().len(), journaled);

        let stack = TetStack::from_entries(std::iter::once(crate::core::worklist::StackTet {
            tet,
            quality: 0.5,
        }));
        let mut output = TetStack::new();
        let pass = insert_pass(&mut mesh, &config, &stack, Some(&mut output)).unwrap();
        assert!(!pass.accepted);
        assert_eq!(output.len(), 1);
        assert!(same_tet(&output.tets()[0], &tet));
    }

    #[test]
    fn test_local_insert_pass_is_monotone() {
        let (mut mesh, _) = octahedron(Point3::new(0.9, 0.03, 0.02));
        let config = ImproveConfig::default();
        let oracle = config.oracle();
        let before_keys = sorted_keys(&mesh);
        let stack = fill_by_quality(&mesh, &oracle, f64::INFINITY).unwrap();
        let before = stack_quality(&mesh, &oracle, &stack).unwrap().min;
        let mut output = TetStack::new();
        let pass = insert_pass(&mut mesh, &config, &stack, Some(&mut output)).unwrap();

        assert_relative_eq!(pass.min_before, before);
        if pass.accepted {
            assert!(pass.min_after >= before);
            assert!(stack_quality(&mesh, &oracle, &output).unwrap().min >= before);
        } else {
            assert_eq!(sorted_keys(&mesh), before_keys);
            assert_eq!(output.len(), stack.len());
        }
        for tet in mesh.tets() {
            assert!(mesh.quality(&tet, &oracle).unwrap() > 0.0);
        }
    }

    #[test]
    fn test_worst_tet_attack_never_lowers_minimum() {
        let (mut mesh, _) = octahedron(Point3::new(0.9, 0.03, 0.02));
        let config = ImproveConfigBuilder::default()
            .percent_worst(0.5)
            .build()
            .unwrap();
        let before = mesh_quality(&mesh, &config.oracle()).unwrap().min;
        for desperate in [false, true] {
            let pass = worst_tet_attack(&mut mesh, &config, desperate).unwrap();
            assert!(pass.min_after >= before);
            let now = mesh_quality(&mesh, &config.oracle()).unwrap().min;
            assert!(now >= before);
        }
    }

    #[test]
    fn test_insertion_round_trip() {
        let (mut mesh, t) = octahedron(Point3::origin());
        let config = ImproveConfig::default();
        let before = sorted_keys(&mesh);
        let checkpoint = mesh.checkpoint();
        let tet = octant(&mesh, &t);
        let split = split_body(&mut mesh, &tet).unwrap();
        optimal_cavity(&mut mesh, &config, split.vertex, &split.tets, &split.faces).unwrap();
        assert_ne!(sorted_keys(&mesh), before);
        mesh.revert_to(checkpoint).unwrap();
        assert_eq!(sorted_keys(&mesh), before);
        assert!(mesh.position(split.vertex).is_err());
    }
}
