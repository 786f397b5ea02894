//! Observers of node lifecycle events.
//!
//! Listeners registered with
//! [`SpatialOrganizer::add_listener`](crate::core::spatial_organizer::SpatialOrganizer::add_listener)
//! are called synchronously around every insertion, movement and removal,
//! in registration order. All methods default to no-ops.
//!
//! # Examples
//!
//! ```rust
//! use spatial_organization::prelude::*;
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Counter(Arc<Mutex<usize>>);
//!
//! impl NodeListener<u32> for Counter {
//!     fn node_added(&mut self, _node: NodeKey, _position: &Position) {
//!         *self.0.lock().unwrap() += 1;
//!     }
//! }
//!
//! let added = Arc::new(Mutex::new(0));
//! let mut organizer = SpatialOrganizer::new();
//! organizer.add_listener(Counter(Arc::clone(&added)));
//! organizer.insert([0.0, 0.0, 0.0], 1).unwrap();
//! organizer.insert([1.0, 0.0, 0.0], 2).unwrap();
//! assert_eq!(*added.lock().unwrap(), 2);
//! ```

use crate::core::space_node::NodeKey;
use crate::geometry::util::Position;

/// Callbacks around node insertion, movement and removal.
#[allow(unused_variables)]
pub trait NodeListener<T> {
    /// A node with `content` is about to be inserted at `position`.
    fn node_about_to_be_added(&mut self, position: &Position, content: &T) {}

    /// `node` was inserted at `position`.
    fn node_added(&mut self, node: NodeKey, position: &Position) {}

    /// `node` is about to move from `from` to `to`.
    fn node_about_to_move(&mut self, node: NodeKey, from: &Position, to: &Position) {}

    /// `node` moved from `from` to `to`.
    fn node_moved(&mut self, node: NodeKey, from: &Position, to: &Position) {}

    /// `node` at `position` is about to be removed.
    fn node_about_to_be_removed(&mut self, node: NodeKey, position: &Position) {}

    /// `node`, last seen at `position`, was removed; its key is now stale.
    fn node_removed(&mut self, node: NodeKey, position: &Position) {}
}
