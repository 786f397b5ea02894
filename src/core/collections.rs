//! Collection aliases used throughout the mesh.
//!
//! The mesh stores every entity in a slotmap arena and indexes them with
//! fast, non-cryptographic hash maps. Keeping the concrete choices behind
//! aliases lets the storage backend be switched with a feature flag.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

#[cfg(not(feature = "dense-slotmap"))]
use slotmap::SlotMap;

#[cfg(feature = "dense-slotmap")]
use slotmap::DenseSlotMap;

use crate::core::{space_node::NodeKey, tetrahedron::TetrahedronKey};

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Arena backing the nodes, edges, triangles and tetrahedra of a mesh.
///
/// - **default**: `DenseSlotMap` (the `dense-slotmap` feature)
/// - **--no-default-features**: `SlotMap`
///
/// Not exposed in public signatures; accessors return iterators instead.
#[cfg(not(feature = "dense-slotmap"))]
pub type StorageMap<K, V> = SlotMap<K, V>;

/// Arena backing the nodes, edges, triangles and tetrahedra of a mesh.
#[cfg(feature = "dense-slotmap")]
pub type StorageMap<K, V> = DenseSlotMap<K, V>;

// =============================================================================
// HASHING
// =============================================================================

/// `HashMap` with `FxHasher`.
///
/// ⚠️ Not DoS-resistant. Keys are internal slotmap keys only.
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// `HashSet` with `FxHasher`.
pub type FastHashSet<T> = FxHashSet<T>;

// =============================================================================
// SMALL BUFFERS
// =============================================================================

/// Stack-first vector for short, bounded lists.
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

/// Typical size of a node star (tetrahedra incident to one node).
pub const STAR_BUFFER_SIZE: usize = 32;

/// Tetrahedra around one node.
pub type StarBuffer = SmallBuffer<TetrahedronKey, STAR_BUFFER_SIZE>;

/// Set of node keys.
pub type NodeKeySet = FastHashSet<NodeKey>;

/// Set of tetrahedron keys.
pub type TetrahedronKeySet = FastHashSet<TetrahedronKey>;

/// Creates a [`FastHashMap`] with the given capacity.
///
/// # Examples
///
/// ```rust
/// use spatial_organization::core::collections::fast_hash_map_with_capacity;
///
/// let map = fast_hash_map_with_capacity::<u32, u32>(16);
/// assert!(map.capacity() >= 16);
/// ```
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_helpers() {
        let mut map = fast_hash_map_with_capacity::<u64, usize>(8);
        assert!(map.capacity() >= 8);
        map.insert(1, 2);
        assert_eq!(map.get(&1), Some(&2));
    }

    #[test]
    fn test_small_buffer_spills() {
        let mut buffer: SmallBuffer<u8, 2> = SmallBuffer::new();
        buffer.push(1);
        buffer.push(2);
        assert!(!buffer.spilled());
        buffer.push(3);
        assert!(buffer.spilled());
    }
}
