//! # Scene
//!
//! Batch nodes flatten a tree of renderable items into one [`QuadBuffer`]
//! whose slot order is the tree's draw order.
//!
//! ## Draw order
//!
//! Siblings are ordered by [`DrawOrder`]: z-order first, then arrival
//! sequence. A node's children with negative z draw behind it, the rest in
//! front, so a subtree flattens as
//!
//! ```text
//! [negative-z children...] [node] [non-negative-z children...]
//! ```
//!
//! ## Slot handles
//!
//! Each batched node caches the slot its quad lives in as an [`AtlasSlot`].
//! The slot is owned by the batch, revalidated by it on every structural
//! change, and never used by items to reach into storage themselves.
//!
//! [`QuadBuffer`]: crate::render::QuadBuffer

pub mod batch_node;
pub mod particle_batch;
pub mod sprite;

#[cfg(test)]
mod tests;

pub use batch_node::{BatchNode, Batchable, Subtree};
pub use particle_batch::{Particle, ParticleBatchNode, ParticleSystem};
pub use sprite::{Sprite, SpriteBatchNode, SpriteFlags};

use crate::foundation::collections::new_key_type;

new_key_type! {
    /// Handle to a node owned by a batch
    pub struct NodeId;
}

/// Tag value for nodes that were not given one
pub const INVALID_TAG: i32 = -1;

/// Cached position of a node's first quad inside its batch's buffer.
///
/// This is a lookup hint kept valid by the owning batch, not a reference to
/// storage. It goes stale the moment the node leaves the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AtlasSlot(usize);

impl AtlasSlot {
    /// Wrap a slot index
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Slot index
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Sort key of a node among its siblings: z-order, then arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawOrder {
    /// Local z-order
    pub z_order: i32,
    /// Monotonic arrival sequence, breaks z ties
    pub arrival: u64,
}

impl DrawOrder {
    /// True for nodes drawn behind their parent
    pub const fn is_behind_parent(&self) -> bool {
        self.z_order < 0
    }
}

/// Position at which a node with z-order `z` joins a list already sorted by z:
/// after every entry whose z is less than or equal to `z`.
pub fn search_new_position_for_z<T>(sorted: &[T], z: i32, z_of: impl Fn(&T) -> i32) -> usize {
    sorted.partition_point(|entry| z_of(entry) <= z)
}

/// Stable insertion sort; near-linear on nearly sorted input.
///
/// Returns true if anything moved.
pub fn insertion_sort_by_key<T: Copy, K: Ord>(items: &mut [T], key: impl Fn(&T) -> K) -> bool {
    let mut moved = false;
    for i in 1..items.len() {
        let current = items[i];
        let current_key = key(&current);
        let mut j = i;
        while j > 0 && key(&items[j - 1]) > current_key {
            items[j] = items[j - 1];
            j -= 1;
        }
        if j != i {
            items[j] = current;
            moved = true;
        }
    }
    moved
}

#[cfg(test)]
mod order_tests {
    use super::*;

    #[test]
    fn test_search_position_after_equal_z() {
        let zs = [-1, 0, 0, 3];
        assert_eq!(search_new_position_for_z(&zs, 0, |z| *z), 3);
        assert_eq!(search_new_position_for_z(&zs, -5, |z| *z), 0);
        assert_eq!(search_new_position_for_z(&zs, 9, |z| *z), 4);
    }

    #[test]
    fn test_insertion_sort_is_stable() {
        let mut items = [(5, 'a'), (-1, 'b'), (0, 'c'), (-1, 'd')];
        let moved = insertion_sort_by_key(&mut items, |(z, _)| *z);
        assert!(moved);
        let names: String = items.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, "bdca");

        assert!(!insertion_sort_by_key(&mut items, |(z, _)| *z));
    }

    #[test]
    fn test_draw_order_compares_z_then_arrival() {
        let a = DrawOrder { z_order: 0, arrival: 9 };
        let b = DrawOrder { z_order: 1, arrival: 1 };
        let c = DrawOrder { z_order: 1, arrival: 2 };
        assert!(a < b && b < c);
        assert!(DrawOrder { z_order: -1, arrival: 0 }.is_behind_parent());
    }
}
