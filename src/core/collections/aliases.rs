use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::core::complex::{Face, Tet};

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend for vertex records in the bundled complex.
///
/// Slot keys stay valid until the vertex is removed, and a removed key is
/// never confused with a later insertion thanks to slotmap versioning.
pub type StorageMap<K, V> = slotmap::SlotMap<K, V>;

/// Secondary map keyed by the same slot keys as a [`StorageMap`].
///
/// Used for per-vertex data that lives outside the complex (kind, constraint
/// vector, quadric).
pub type SecondaryMap<K, V> = slotmap::SecondaryMap<K, V>;

// =============================================================================
// CORE OPTIMIZED TYPES
// =============================================================================

/// Optimized `HashMap` type for performance-critical operations.
///
/// Not DoS-resistant: keys here are always internal vertex tags.
///
/// # Examples
///
/// ```rust
/// use tetimprove::core::collections::FastHashMap;
///
/// let mut map: FastHashMap<u64, usize> = FastHashMap::default();
/// map.insert(123, 456);
/// ```
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// Build hasher for the fast collections.
pub type FastBuildHasher = FxBuildHasher;

/// Optimized `HashSet` type for performance-critical operations.
///
/// # Examples
///
/// ```rust
/// use tetimprove::core::collections::FastHashSet;
///
/// let mut set: FastHashSet<u64> = FastHashSet::default();
/// set.insert(7);
/// assert!(set.contains(&7));
/// ```
pub type FastHashSet<T> = FxHashSet<T>;

/// Small-optimized Vec that uses stack allocation for small collections.
///
/// # Size Guidelines
///
/// - **N=3**: parents of a cavity tet
/// - **N=4**: faces of one tet
/// - **N=8**: tets and faces touched by one flip
///
/// # Examples
///
/// ```rust
/// use tetimprove::core::collections::SmallBuffer;
///
/// let mut buffer: SmallBuffer<i32, 8> = SmallBuffer::new();
/// for i in 0..5 {
///     buffer.push(i);
/// }
/// assert_eq!(buffer.len(), 5);
/// ```
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

// =============================================================================
// DOMAIN-SPECIFIC TYPES
// =============================================================================

/// Buffer of tetrahedra touched by a single flip or local operation.
pub type TetBuffer = SmallBuffer<Tet, 8>;

/// Buffer of faces, e.g. the boundary faces of a tet or a cavity frontier.
pub type FaceBuffer = SmallBuffer<Face, 8>;
