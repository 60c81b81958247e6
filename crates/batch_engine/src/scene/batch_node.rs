//! # Batch Node
//!
//! A [`BatchNode`] owns a tree of [`Batchable`] items and one [`QuadBuffer`]
//! holding a quad per item, stored in the tree's draw order so the whole
//! tree renders with a single draw call.
//!
//! ## Storage
//!
//! ```text
//! nodes:       SlotMap<NodeId, NodeEntry>      (item, parent, children, order, slot)
//! descendants: [n0][n1][n2] ... [n(count-1)]   (co-indexed with the quads)
//! quads:       [q0][q1][q2] ... [q(count-1)]
//! ```
//!
//! After every public operation `descendants[i]` is the node whose cached
//! slot is `i`, and its quad is `quads[i]`. Draw order is only guaranteed
//! after [`BatchNode::sort_all_children`], which [`BatchNode::draw`] runs
//! whenever a reorder is pending.
//!
//! ## Insertion paths
//!
//! - [`BatchNode::append_child`]: push to the end, fix order lazily
//! - [`BatchNode::add_child`] / [`BatchNode::add_child_to`]: place the quad
//!   at its draw-order slot immediately
//! - [`BatchNode::insert_quad_from_item`]: caller supplies the slot (tile
//!   maps filled in row order)

use crate::config::{BatchConfig, GrowthFactor};
use crate::foundation::collections::{DenseArray, SlotMap};
use crate::foundation::math::Affine2;
use crate::render::dispatch::{DrawDispatch, RenderStats};
use crate::render::quad::{BlendFunc, Quad, MAX_QUADS};
use crate::render::quad_buffer::QuadBuffer;
use crate::render::texture::{Texture, TextureHandle, TextureId};
use crate::render::{BatchError, BatchResult};
use crate::scene::{
    insertion_sort_by_key, search_new_position_for_z, AtlasSlot, DrawOrder, NodeId, INVALID_TAG,
};

/// An item that can be drawn as one quad of a batch.
///
/// Items describe their content; the owning batch decides where the quad
/// lives and writes it.
pub trait Batchable {
    /// Texture the item was created for. `None` adopts the batch texture.
    fn texture_id(&self) -> Option<TextureId>;

    /// Node-to-parent transform
    fn local_transform(&self) -> Affine2 {
        Affine2::identity()
    }

    /// Quad for this item given its node-to-batch transform
    fn build_quad(&self, to_batch: &Affine2, texture: &Texture) -> Quad;

    /// Hidden items keep their slot but draw nothing
    fn is_visible(&self) -> bool {
        true
    }

    /// True when the item's quad needs rewriting
    fn is_dirty(&self) -> bool;

    /// Set or clear the rewrite flag
    fn set_dirty(&mut self, dirty: bool);
}

/// An item with its placement and children, detached from any batch
#[derive(Debug, Clone, PartialEq)]
pub struct Subtree<I> {
    /// The item
    pub item: I,
    /// Z-order among its siblings
    pub z_order: i32,
    /// User tag
    pub tag: i32,
    /// Child subtrees, in arrival order
    pub children: Vec<Subtree<I>>,
}

impl<I> Subtree<I> {
    /// Leaf with z-order 0 and no tag
    pub fn new(item: I) -> Self {
        Self {
            item,
            z_order: 0,
            tag: INVALID_TAG,
            children: Vec::new(),
        }
    }

    /// Set the z-order
    pub fn with_z_order(mut self, z_order: i32) -> Self {
        self.z_order = z_order;
        self
    }

    /// Set the tag
    pub fn with_tag(mut self, tag: i32) -> Self {
        self.tag = tag;
        self
    }

    /// Add a child subtree
    pub fn with_child(mut self, child: Subtree<I>) -> Self {
        self.children.push(child);
        self
    }

    /// Number of items in the subtree, itself included
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Subtree::node_count).sum::<usize>()
    }
}

#[derive(Debug)]
struct NodeEntry<I> {
    item: I,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    order: DrawOrder,
    tag: i32,
    slot: AtlasSlot,
}

/// A tree of items rendered from one shared quad buffer
#[derive(Debug)]
pub struct BatchNode<I> {
    nodes: SlotMap<NodeId, NodeEntry<I>>,
    children: Vec<NodeId>,
    descendants: DenseArray<NodeId>,
    buffer: QuadBuffer,
    blend: BlendFunc,
    blend_overridden: bool,
    growth: GrowthFactor,
    next_arrival: u64,
    reorder_dirty: bool,
}

impl<I: Batchable> BatchNode<I> {
    /// Create a batch for `texture` with room for `capacity` items (0 picks the default)
    pub fn with_texture(texture: TextureHandle, capacity: usize) -> BatchResult<Self> {
        Self::with_config(texture, capacity, &BatchConfig::default())
    }

    /// Create a batch using the defaults and growth policy of `config`
    pub fn with_config(
        texture: TextureHandle,
        capacity: usize,
        config: &BatchConfig,
    ) -> BatchResult<Self> {
        config.validate()?;
        let capacity = config.sprite_capacity_or_default(capacity);
        let blend = BlendFunc::for_texture(texture.has_premultiplied_alpha());
        let buffer = QuadBuffer::with_capacity(texture, capacity)?;
        let descendants = DenseArray::try_with_capacity(capacity)
            .map_err(|_| BatchError::ResourceExhausted { requested: capacity })?;

        log::debug!(
            "created batch node for texture {} with capacity {}",
            buffer.texture().id(),
            capacity
        );

        Ok(Self {
            nodes: SlotMap::with_key(),
            children: Vec::new(),
            descendants,
            buffer,
            blend,
            blend_overridden: false,
            growth: config.growth,
            next_arrival: 0,
            reorder_dirty: false,
        })
    }

    // ---- insertion ----

    /// Add a subtree under the batch without searching for its slot.
    ///
    /// Quads go to the end of the buffer in pre-order; the draw order is
    /// repaired by the next [`BatchNode::sort_all_children`].
    pub fn append_child(&mut self, subtree: Subtree<I>) -> BatchResult<NodeId> {
        self.check_textures(&subtree)?;
        self.ensure_room(subtree.node_count())?;
        let id = self.append_subtree(None, subtree);
        self.reorder_dirty = true;
        Ok(id)
    }

    /// Add a subtree under the batch at its draw-order slot
    pub fn add_child(&mut self, subtree: Subtree<I>) -> BatchResult<NodeId> {
        self.insert_child(None, subtree)
    }

    /// Add a subtree under `parent` at its draw-order slot
    pub fn add_child_to(&mut self, parent: NodeId, subtree: Subtree<I>) -> BatchResult<NodeId> {
        self.entry(parent)?;
        self.insert_child(Some(parent), subtree)
    }

    /// Add a leaf under the batch with its quad at a caller-chosen `slot`.
    ///
    /// Used to populate a batch in an order the caller already knows (tile
    /// rows). A slot that disagrees with the z-order is repaired by the next
    /// reindex.
    pub fn insert_quad_from_item(
        &mut self,
        item: I,
        z_order: i32,
        tag: i32,
        slot: usize,
    ) -> BatchResult<NodeId> {
        let subtree = Subtree::new(item).with_z_order(z_order).with_tag(tag);
        self.check_textures(&subtree)?;
        let count = self.descendants.len();
        if slot > count {
            return Err(BatchError::IndexOutOfRange { index: slot, len: count });
        }
        self.ensure_room(1)?;

        let Subtree { mut item, .. } = subtree;
        let quad = self.quad_for(None, &item);
        item.set_dirty(false);
        let order = self.next_order(z_order);
        let id = self.nodes.insert(NodeEntry {
            item,
            parent: None,
            children: Vec::new(),
            order,
            tag,
            slot: AtlasSlot::new(slot),
        });
        let position = search_new_position_for_z(&self.children, z_order, |sibling| {
            self.nodes[*sibling].order.z_order
        });
        self.children.insert(position, id);

        self.descendants.insert(slot, id);
        self.buffer.insert_quad(&quad, slot);
        self.resync_slots(slot);
        self.reorder_dirty = true;
        Ok(id)
    }

    fn insert_child(&mut self, parent: Option<NodeId>, subtree: Subtree<I>) -> BatchResult<NodeId> {
        self.check_textures(&subtree)?;
        self.ensure_room(subtree.node_count())?;
        // the slot search reads sibling order and cached slots
        self.sort_all_children();
        Ok(self.insert_subtree(parent, subtree))
    }

    fn insert_subtree(&mut self, parent: Option<NodeId>, subtree: Subtree<I>) -> NodeId {
        let Subtree {
            mut item,
            z_order,
            tag,
            children,
        } = subtree;

        let quad = self.quad_for(parent, &item);
        item.set_dirty(false);
        let order = self.next_order(z_order);
        let id = self.nodes.insert(NodeEntry {
            item,
            parent,
            children: Vec::new(),
            order,
            tag,
            slot: AtlasSlot::default(),
        });

        let position = search_new_position_for_z(self.siblings(parent), z_order, |sibling| {
            self.nodes[*sibling].order.z_order
        });
        self.siblings_mut(parent).insert(position, id);

        let slot = self.atlas_index_for_child(id, z_order);
        self.descendants.insert(slot, id);
        self.buffer.insert_quad(&quad, slot);
        self.resync_slots(slot);

        for child in children {
            self.insert_subtree(Some(id), child);
        }
        id
    }

    fn append_subtree(&mut self, parent: Option<NodeId>, subtree: Subtree<I>) -> NodeId {
        let Subtree {
            mut item,
            z_order,
            tag,
            children,
        } = subtree;

        let quad = self.quad_for(parent, &item);
        item.set_dirty(false);
        let order = self.next_order(z_order);
        let slot = self.descendants.len();
        let id = self.nodes.insert(NodeEntry {
            item,
            parent,
            children: Vec::new(),
            order,
            tag,
            slot: AtlasSlot::new(slot),
        });
        self.siblings_mut(parent).push(id);
        self.descendants.push(id);
        self.buffer.insert_quad(&quad, slot);

        for child in children {
            self.append_subtree(Some(id), child);
        }
        id
    }

    /// Slot a freshly attached node takes, from its position among its
    /// siblings. The node must already be in its sibling list but not yet in
    /// the descendants table.
    pub(crate) fn atlas_index_for_child(&self, id: NodeId, z_order: i32) -> usize {
        let parent = self.nodes[id].parent;
        let siblings = self.siblings(parent);
        let position = siblings.iter().position(|sibling| *sibling == id).unwrap_or(0);
        let prev = position.checked_sub(1).map(|prev| siblings[prev]);

        match (parent, prev) {
            (None, None) => 0,
            (None, Some(prev)) => self.highest_slot(prev) + 1,
            (Some(parent), None) => {
                let parent_slot = self.nodes[parent].slot.index();
                if z_order >= 0 {
                    return parent_slot + 1;
                }
                // in front of any sibling run already drawn behind the parent
                match siblings.get(position + 1) {
                    Some(next) if self.nodes[*next].order.is_behind_parent() => {
                        self.lowest_slot(*next)
                    }
                    _ => parent_slot,
                }
            }
            (Some(parent), Some(prev)) => {
                let prev_behind = self.nodes[prev].order.is_behind_parent();
                if prev_behind == (z_order < 0) {
                    self.highest_slot(prev) + 1
                } else {
                    self.nodes[parent].slot.index() + 1
                }
            }
        }
    }

    // ---- removal ----

    /// Remove a node and its subtree.
    ///
    /// Returns the detached subtree for reuse, or `None` when `cleanup` is set.
    pub fn remove_child(&mut self, id: NodeId, cleanup: bool) -> BatchResult<Option<Subtree<I>>> {
        let parent = self.entry(id)?.parent;
        let siblings = self.siblings_mut(parent);
        if let Some(position) = siblings.iter().position(|sibling| *sibling == id) {
            siblings.remove(position);
        }

        let subtree = self.detach_from_atlas(id);
        Ok(if cleanup { None } else { subtree })
    }

    /// Remove `child` from `parent`, failing if it is not a direct child
    pub fn remove_child_from(
        &mut self,
        parent: NodeId,
        child: NodeId,
        cleanup: bool,
    ) -> BatchResult<Option<Subtree<I>>> {
        self.entry(parent)?;
        if self.entry(child)?.parent != Some(parent) {
            return Err(BatchError::NotAChild(child));
        }
        self.remove_child(child, cleanup)
    }

    /// Remove the batch's `index`-th direct child
    pub fn remove_child_at_index(
        &mut self,
        index: usize,
        cleanup: bool,
    ) -> BatchResult<Option<Subtree<I>>> {
        let id = *self.children.get(index).ok_or(BatchError::IndexOutOfRange {
            index,
            len: self.children.len(),
        })?;
        self.remove_child(id, cleanup)
    }

    /// Remove every node. Returns the detached subtrees unless `cleanup` is set.
    pub fn remove_all_children(&mut self, cleanup: bool) -> Vec<Subtree<I>> {
        let roots = std::mem::take(&mut self.children);
        let subtrees: Vec<_> = roots
            .into_iter()
            .filter_map(|id| self.extract_subtree(id))
            .collect();

        self.descendants.clear();
        self.buffer.remove_all_quads();
        self.reorder_dirty = false;

        if cleanup {
            Vec::new()
        } else {
            subtrees
        }
    }

    fn detach_from_atlas(&mut self, id: NodeId) -> Option<Subtree<I>> {
        let child_ids = std::mem::take(&mut self.nodes.get_mut(id)?.children);
        let children = child_ids
            .into_iter()
            .filter_map(|child| self.detach_from_atlas(child))
            .collect();

        let entry = self.nodes.remove(id)?;
        let slot = entry.slot.index();
        assert_eq!(
            self.descendants.get(slot),
            Some(&id),
            "descendants table out of step at slot {}",
            slot
        );
        self.descendants.remove(slot);
        self.buffer.remove_quad_at_index(slot);
        self.resync_slots(slot);

        let mut item = entry.item;
        item.set_dirty(true);
        Some(Subtree {
            item,
            z_order: entry.order.z_order,
            tag: entry.tag,
            children,
        })
    }

    fn extract_subtree(&mut self, id: NodeId) -> Option<Subtree<I>> {
        let NodeEntry {
            mut item,
            children,
            order,
            tag,
            ..
        } = self.nodes.remove(id)?;
        item.set_dirty(true);
        Some(Subtree {
            item,
            z_order: order.z_order,
            tag,
            children: children
                .into_iter()
                .filter_map(|child| self.extract_subtree(child))
                .collect(),
        })
    }

    // ---- ordering ----

    /// Change a node's z-order. Takes effect at the next reindex.
    ///
    /// The node goes behind siblings already at the new z-order.
    pub fn reorder_child(&mut self, id: NodeId, z_order: i32) -> BatchResult<()> {
        if self.entry(id)?.order.z_order == z_order {
            return Ok(());
        }
        let order = self.next_order(z_order);
        self.nodes[id].order = order;
        self.reorder_dirty = true;
        Ok(())
    }

    /// True when the slot order may not match the draw order
    pub fn is_reorder_pending(&self) -> bool {
        self.reorder_dirty
    }

    /// Sort every child list and move quads into draw order.
    ///
    /// Only slots whose occupant changes are touched.
    pub fn sort_all_children(&mut self) {
        if !self.reorder_dirty {
            return;
        }

        let nodes = &self.nodes;
        insertion_sort_by_key(&mut self.children, |id| nodes[*id].order);
        let ids: Vec<NodeId> = self.nodes.keys().collect();
        for id in ids {
            let mut children = std::mem::take(&mut self.nodes[id].children);
            insertion_sort_by_key(&mut children, |child| self.nodes[*child].order);
            self.nodes[id].children = children;
        }

        let mut cursor = 0;
        for index in 0..self.children.len() {
            let child = self.children[index];
            self.update_atlas_index(child, &mut cursor);
        }
        assert_eq!(
            cursor,
            self.descendants.len(),
            "reindex visited {} of {} quads",
            cursor,
            self.descendants.len()
        );

        self.reorder_dirty = false;
        log::trace!("reindexed {} quads", cursor);
    }

    fn update_atlas_index(&mut self, id: NodeId, cursor: &mut usize) {
        let mut placed = false;
        for index in 0..self.nodes[id].children.len() {
            let child = self.nodes[id].children[index];
            if !placed && !self.nodes[child].order.is_behind_parent() {
                self.claim_slot(id, cursor);
                placed = true;
            }
            self.update_atlas_index(child, cursor);
        }
        if !placed {
            self.claim_slot(id, cursor);
        }
    }

    fn claim_slot(&mut self, id: NodeId, cursor: &mut usize) {
        let current = self.nodes[id].slot.index();
        if current != *cursor {
            self.swap(current, *cursor);
        }
        *cursor += 1;
    }

    /// Exchange the quads in slots `a` and `b` and their owners' cached slots
    pub fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let count = self.descendants.len();
        assert!(a < count && b < count, "swap {} <-> {} with {} quads", a, b, count);

        let first = self.descendants.as_slice()[a];
        let second = self.descendants.as_slice()[b];
        self.buffer.swap(a, b);
        self.descendants.swap(a, b);
        self.nodes[first].slot = AtlasSlot::new(b);
        self.nodes[second].slot = AtlasSlot::new(a);
    }

    /// Nodes in the order their quads must be drawn, computed from the tree
    /// alone. Matches [`BatchNode::descendants`] once no reorder is pending.
    pub fn draw_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.descendants.len());
        for id in self.sorted(&self.children) {
            self.collect_draw_order(id, &mut order);
        }
        order
    }

    fn collect_draw_order(&self, id: NodeId, order: &mut Vec<NodeId>) {
        let children = self.sorted(&self.nodes[id].children);
        let split = children.partition_point(|child| self.nodes[*child].order.is_behind_parent());
        for child in &children[..split] {
            self.collect_draw_order(*child, order);
        }
        order.push(id);
        for child in &children[split..] {
            self.collect_draw_order(*child, order);
        }
    }

    fn sorted(&self, ids: &[NodeId]) -> Vec<NodeId> {
        let mut sorted = ids.to_vec();
        sorted.sort_by_key(|id| self.nodes[*id].order);
        sorted
    }

    /// Largest slot used by `id`'s subtree
    pub fn highest_atlas_index_in_child(&self, id: NodeId) -> BatchResult<usize> {
        self.entry(id)?;
        Ok(self.highest_slot(id))
    }

    /// Smallest slot used by `id`'s subtree
    pub fn lowest_atlas_index_in_child(&self, id: NodeId) -> BatchResult<usize> {
        self.entry(id)?;
        Ok(self.lowest_slot(id))
    }

    fn highest_slot(&self, id: NodeId) -> usize {
        let entry = &self.nodes[id];
        match entry.children.last() {
            Some(last) if !self.nodes[*last].order.is_behind_parent() => self.highest_slot(*last),
            _ => entry.slot.index(),
        }
    }

    fn lowest_slot(&self, id: NodeId) -> usize {
        let entry = &self.nodes[id];
        match entry.children.first() {
            Some(first) if self.nodes[*first].order.is_behind_parent() => self.lowest_slot(*first),
            _ => entry.slot.index(),
        }
    }

    // ---- capacity ----

    /// Grow to hold at least `capacity` items. Never shrinks.
    pub fn reserve_capacity(&mut self, capacity: usize) -> BatchResult<()> {
        if capacity <= self.buffer.capacity() {
            return Ok(());
        }
        self.resize(capacity)
    }

    fn ensure_room(&mut self, extra: usize) -> BatchResult<()> {
        let needed = self.descendants.len() + extra;
        let mut capacity = self.buffer.capacity();
        if needed <= capacity {
            return Ok(());
        }
        while capacity < needed {
            capacity = self.growth.next_capacity(capacity);
        }
        self.resize(capacity.min(MAX_QUADS).max(needed))
    }

    fn resize(&mut self, capacity: usize) -> BatchResult<()> {
        let old = self.buffer.capacity();
        let descendants = self
            .descendants
            .resized(capacity)
            .map_err(|_| BatchError::ResourceExhausted { requested: capacity })?;
        self.buffer.resize_capacity(capacity)?;
        self.descendants = descendants;
        if capacity > old {
            self.buffer.fill_with_empty_quads_from_index(old, capacity - old);
        }

        log::debug!("batch node capacity {} -> {}", old, capacity);
        Ok(())
    }

    // ---- content ----

    /// Rewrite the quads of dirty items, and of everything below them, in batch space.
    ///
    /// Hidden items and items under hidden ancestors get a collapsed quad.
    pub fn update_transforms(&mut self) {
        let identity = Affine2::identity();
        for index in 0..self.children.len() {
            let child = self.children[index];
            self.write_subtree(child, &identity, false, true);
        }
    }

    fn write_subtree(&mut self, id: NodeId, parent_to_batch: &Affine2, force: bool, shown: bool) {
        let entry = &mut self.nodes[id];
        let to_batch = parent_to_batch * entry.item.local_transform();
        let shown = shown && entry.item.is_visible();
        let rewrite = force || entry.item.is_dirty();

        if rewrite {
            let mut quad = entry.item.build_quad(&to_batch, self.buffer.texture());
            if !shown {
                quad.collapse();
            }
            self.buffer.update_quad(&quad, entry.slot.index());
            entry.item.set_dirty(false);
        }

        for index in 0..self.nodes[id].children.len() {
            let child = self.nodes[id].children[index];
            self.write_subtree(child, &to_batch, rewrite, shown);
        }
    }

    fn quad_for(&self, parent: Option<NodeId>, item: &I) -> Quad {
        let mut to_batch = Affine2::identity();
        let mut shown = item.is_visible();
        let mut cursor = parent;
        while let Some(id) = cursor {
            let entry = &self.nodes[id];
            to_batch = entry.item.local_transform() * to_batch;
            shown &= entry.item.is_visible();
            cursor = entry.parent;
        }
        to_batch *= item.local_transform();

        let mut quad = item.build_quad(&to_batch, self.buffer.texture());
        if !shown {
            quad.collapse();
        }
        quad
    }

    // ---- rendering ----

    /// Reindex if needed, write dirty quads, and draw everything in one call
    pub fn draw(&mut self, dispatch: &mut dyn DrawDispatch) -> RenderStats {
        if self.buffer.is_empty() {
            return RenderStats::default();
        }
        self.sort_all_children();
        self.update_transforms();
        let count = self.buffer.total_quads();
        self.buffer.draw_range(0, count, self.blend, dispatch)
    }

    /// Free the GPU buffer
    pub fn release(&mut self, dispatch: &mut dyn DrawDispatch) {
        self.buffer.release(dispatch);
    }

    // ---- accessors ----

    /// Item behind `id`
    pub fn item(&self, id: NodeId) -> Option<&I> {
        self.nodes.get(id).map(|entry| &entry.item)
    }

    /// Mutable item behind `id`; the item is flagged for rewrite
    pub fn item_mut(&mut self, id: NodeId) -> Option<&mut I> {
        self.nodes.get_mut(id).map(|entry| {
            entry.item.set_dirty(true);
            &mut entry.item
        })
    }

    /// True if `id` is part of this batch
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Slot holding `id`'s quad
    pub fn atlas_slot(&self, id: NodeId) -> Option<AtlasSlot> {
        self.nodes.get(id).map(|entry| entry.slot)
    }

    /// Z-order of `id`
    pub fn z_order(&self, id: NodeId) -> Option<i32> {
        self.nodes.get(id).map(|entry| entry.order.z_order)
    }

    /// Tag of `id`
    pub fn tag(&self, id: NodeId) -> Option<i32> {
        self.nodes.get(id).map(|entry| entry.tag)
    }

    /// Parent of `id`; `None` for direct children of the batch
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|entry| entry.parent)
    }

    /// First direct child of the batch carrying `tag`
    pub fn child_by_tag(&self, tag: i32) -> Option<NodeId> {
        self.children
            .iter()
            .copied()
            .find(|id| self.nodes[*id].tag == tag)
    }

    /// Direct children of the batch
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Direct children of `id`
    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|entry| entry.children.as_slice())
            .unwrap_or(&[])
    }

    /// Every node, indexed by slot
    pub fn descendants(&self) -> &[NodeId] {
        self.descendants.as_slice()
    }

    /// Number of items in the batch
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the batch holds no items
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Shared texture
    pub fn texture(&self) -> &TextureHandle {
        self.buffer.texture()
    }

    /// Switch texture. Every item is rewritten at the next draw.
    pub fn set_texture(&mut self, texture: TextureHandle) {
        if !self.blend_overridden {
            self.blend = BlendFunc::for_texture(texture.has_premultiplied_alpha());
        }
        self.buffer.set_texture(texture);
        for entry in self.nodes.values_mut() {
            entry.item.set_dirty(true);
        }
    }

    /// Blend function used to draw the batch
    pub fn blend_func(&self) -> BlendFunc {
        self.blend
    }

    /// Override the blend function. Later texture changes keep it.
    pub fn set_blend_func(&mut self, blend: BlendFunc) {
        self.blend = blend;
        self.blend_overridden = true;
    }

    /// Underlying quad storage
    pub fn quad_buffer(&self) -> &QuadBuffer {
        &self.buffer
    }

    // ---- helpers ----

    fn entry(&self, id: NodeId) -> BatchResult<&NodeEntry<I>> {
        self.nodes.get(id).ok_or(BatchError::UnknownNode(id))
    }

    fn siblings(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(parent) => &self.nodes[parent].children,
            None => &self.children,
        }
    }

    fn siblings_mut(&mut self, parent: Option<NodeId>) -> &mut Vec<NodeId> {
        match parent {
            Some(parent) => &mut self.nodes[parent].children,
            None => &mut self.children,
        }
    }

    fn next_order(&mut self, z_order: i32) -> DrawOrder {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        DrawOrder { z_order, arrival }
    }

    fn check_textures(&self, subtree: &Subtree<I>) -> BatchResult<()> {
        let expected = self.buffer.texture().id();
        if let Some(found) = subtree.item.texture_id() {
            if found != expected {
                log::warn!("rejected item with texture {} in batch of texture {}", found, expected);
                return Err(BatchError::TextureMismatch { expected, found });
            }
        }
        subtree
            .children
            .iter()
            .try_for_each(|child| self.check_textures(child))
    }

    fn resync_slots(&mut self, from: usize) {
        for (index, id) in self.descendants.as_slice().iter().enumerate().skip(from) {
            self.nodes[*id].slot = AtlasSlot::new(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::transform_point;
    use crate::render::dispatch::{DispatchEvent, RecordingDispatch};
    use crate::render::quad::{Color4B, Vertex3F};

    #[derive(Debug, Clone, PartialEq)]
    struct Marker {
        tag: u8,
        texture: Option<TextureId>,
        offset: (f32, f32),
        visible: bool,
        dirty: bool,
    }

    fn marker(tag: u8) -> Marker {
        Marker {
            tag,
            texture: None,
            offset: (0.0, 0.0),
            visible: true,
            dirty: true,
        }
    }

    impl Batchable for Marker {
        fn texture_id(&self) -> Option<TextureId> {
            self.texture
        }

        fn local_transform(&self) -> Affine2 {
            let mut matrix = Affine2::identity();
            matrix[(0, 2)] = self.offset.0;
            matrix[(1, 2)] = self.offset.1;
            matrix
        }

        fn build_quad(&self, to_batch: &Affine2, _texture: &Texture) -> Quad {
            let mut quad = Quad::EMPTY;
            let corner = |x, y| {
                let p = transform_point(to_batch, x, y);
                Vertex3F::new(p.x, p.y, 0.0)
            };
            quad.bl.position = corner(0.0, 0.0);
            quad.br.position = corner(1.0, 0.0);
            quad.tl.position = corner(0.0, 1.0);
            quad.tr.position = corner(1.0, 1.0);
            quad.set_color(Color4B::new(self.tag, 0, 0, 255));
            quad
        }

        fn is_visible(&self) -> bool {
            self.visible
        }

        fn is_dirty(&self) -> bool {
            self.dirty
        }

        fn set_dirty(&mut self, dirty: bool) {
            self.dirty = dirty;
        }
    }

    fn leaf(tag: u8, z_order: i32) -> Subtree<Marker> {
        Subtree::new(marker(tag)).with_z_order(z_order).with_tag(i32::from(tag))
    }

    fn batch(capacity: usize) -> BatchNode<Marker> {
        let texture = Texture::shared(TextureId(1), 64, 64, true);
        BatchNode::with_texture(texture, capacity).unwrap()
    }

    fn tags(batch: &BatchNode<Marker>) -> Vec<u8> {
        batch
            .quad_buffer()
            .quads()
            .iter()
            .map(|quad| quad.tl.color.r)
            .collect()
    }

    fn assert_consistent(batch: &BatchNode<Marker>) {
        assert_eq!(batch.descendants().len(), batch.quad_buffer().total_quads());
        for (slot, id) in batch.descendants().iter().enumerate() {
            assert_eq!(batch.atlas_slot(*id), Some(AtlasSlot::new(slot)));
            let tag = batch.item(*id).unwrap().tag;
            assert_eq!(batch.quad_buffer().quads()[slot].tl.color.r, tag);
        }
    }

    #[test]
    fn test_append_keeps_arrival_order_until_sorted() {
        let mut batch = batch(8);
        batch.append_child(leaf(1, 3)).unwrap();
        batch.append_child(leaf(2, -2)).unwrap();
        batch.append_child(leaf(3, 0)).unwrap();
        assert_eq!(tags(&batch), vec![1, 2, 3]);
        assert!(batch.is_reorder_pending());
        assert_consistent(&batch);

        batch.sort_all_children();
        assert_eq!(tags(&batch), vec![2, 3, 1]);
        assert_eq!(batch.descendants(), batch.draw_order().as_slice());
        assert_consistent(&batch);
    }

    #[test]
    fn test_add_child_places_quad_immediately() {
        let mut batch = batch(8);
        batch.add_child(leaf(1, 5)).unwrap();
        batch.add_child(leaf(2, -1)).unwrap();
        batch.add_child(leaf(3, 0)).unwrap();
        batch.add_child(leaf(4, -1)).unwrap();

        assert_eq!(tags(&batch), vec![2, 4, 3, 1]);
        assert!(!batch.is_reorder_pending());
        assert_consistent(&batch);
    }

    #[test]
    fn test_children_split_around_parent() {
        let mut batch = batch(8);
        let parent = batch.add_child(leaf(1, 0)).unwrap();
        batch.add_child_to(parent, leaf(2, 1)).unwrap();
        batch.add_child_to(parent, leaf(3, -1)).unwrap();
        batch.add_child_to(parent, leaf(4, -2)).unwrap();
        batch.add_child(leaf(5, 0)).unwrap();

        assert_eq!(tags(&batch), vec![4, 3, 1, 2, 5]);
        assert_eq!(batch.lowest_atlas_index_in_child(parent).unwrap(), 0);
        assert_eq!(batch.highest_atlas_index_in_child(parent).unwrap(), 3);
        assert_eq!(batch.descendants(), batch.draw_order().as_slice());
        assert_consistent(&batch);
    }

    #[test]
    fn test_add_nested_subtree() {
        let mut batch = batch(8);
        batch.add_child(leaf(9, 1)).unwrap();
        let tree = leaf(1, 0).with_child(leaf(2, -1)).with_child(leaf(3, 2));
        let root = batch.add_child(tree).unwrap();

        assert_eq!(tags(&batch), vec![2, 1, 3, 9]);
        assert_eq!(batch.children_of(root).len(), 2);
        assert_consistent(&batch);
    }

    #[test]
    fn test_remove_child_returns_subtree() {
        let mut batch = batch(8);
        let keep = batch.add_child(leaf(1, 0)).unwrap();
        let tree = leaf(2, 1).with_child(leaf(3, -1)).with_child(leaf(4, 1));
        let root = batch.add_child(tree).unwrap();
        assert_eq!(tags(&batch), vec![1, 3, 2, 4]);

        let detached = batch.remove_child(root, false).unwrap().unwrap();
        assert_eq!(detached.node_count(), 3);
        assert_eq!(detached.item.tag, 2);
        assert!(detached.item.dirty);
        assert_eq!(tags(&batch), vec![1]);
        assert_eq!(batch.atlas_slot(keep), Some(AtlasSlot::new(0)));
        assert!(!batch.contains(root));
        assert_consistent(&batch);

        let again = batch.add_child(detached).unwrap();
        assert_eq!(tags(&batch), vec![1, 3, 2, 4]);
        assert_eq!(batch.remove_child(again, true).unwrap(), None);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_remove_unknown_and_foreign_nodes() {
        let mut batch = batch(4);
        let a = batch.add_child(leaf(1, 0)).unwrap();
        let b = batch.add_child(leaf(2, 0)).unwrap();
        batch.remove_child(a, true).unwrap();

        assert!(matches!(
            batch.remove_child(a, true),
            Err(BatchError::UnknownNode(id)) if id == a
        ));
        let c = batch.add_child_to(b, leaf(3, 0)).unwrap();
        let d = batch.add_child(leaf(4, 0)).unwrap();
        assert!(matches!(
            batch.remove_child_from(d, c, true),
            Err(BatchError::NotAChild(_))
        ));
        assert!(batch.remove_child_from(b, c, true).is_ok());
        assert!(matches!(
            batch.remove_child_at_index(7, true),
            Err(BatchError::IndexOutOfRange { index: 7, len: 2 })
        ));
    }

    #[test]
    fn test_texture_mismatch_leaves_batch_untouched() {
        let mut batch = batch(4);
        batch.add_child(leaf(1, 0)).unwrap();

        let mut foreign = marker(2);
        foreign.texture = Some(TextureId(7));
        let tree = leaf(3, 0).with_child(Subtree::new(foreign));
        let result = batch.add_child(tree);

        assert!(matches!(
            result,
            Err(BatchError::TextureMismatch {
                expected: TextureId(1),
                found: TextureId(7)
            })
        ));
        assert_eq!(tags(&batch), vec![1]);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_reorder_is_lazy() {
        let mut batch = batch(4);
        let a = batch.add_child(leaf(1, 0)).unwrap();
        batch.add_child(leaf(2, 1)).unwrap();

        batch.reorder_child(a, 5).unwrap();
        assert_eq!(tags(&batch), vec![1, 2]);

        let mut dispatch = RecordingDispatch::new();
        batch.draw(&mut dispatch);
        assert_eq!(tags(&batch), vec![2, 1]);
        assert_consistent(&batch);
    }

    #[test]
    fn test_reorder_to_same_z_goes_behind_peers() {
        let mut batch = batch(4);
        let a = batch.add_child(leaf(1, 1)).unwrap();
        batch.add_child(leaf(2, 2)).unwrap();
        batch.reorder_child(a, 2).unwrap();
        batch.sort_all_children();
        assert_eq!(tags(&batch), vec![2, 1]);
    }

    #[test]
    fn test_growth_preserves_quads() {
        let mut batch = batch(4);
        for tag in 1..=5 {
            batch.add_child(leaf(tag, 0)).unwrap();
        }
        assert_eq!(batch.quad_buffer().capacity(), 6);
        assert_eq!(tags(&batch), vec![1, 2, 3, 4, 5]);
        assert_consistent(&batch);
    }

    #[test]
    fn test_subtree_larger_than_one_growth_step() {
        let mut batch = batch(1);
        let mut tree = leaf(1, 0);
        for tag in 2..=10 {
            tree = tree.with_child(leaf(tag, 0));
        }
        batch.append_child(tree).unwrap();
        assert!(batch.quad_buffer().capacity() >= 10);
        assert_eq!(batch.len(), 10);
    }

    #[test]
    fn test_hidden_ancestor_collapses_subtree() {
        let mut batch = batch(4);
        let parent = batch.add_child(leaf(1, 0)).unwrap();
        let child = batch.add_child_to(parent, leaf(2, 0)).unwrap();

        batch.item_mut(parent).unwrap().visible = false;
        batch.update_transforms();

        let quads = batch.quad_buffer().quads();
        assert!(quads[0].is_collapsed());
        assert!(quads[1].is_collapsed());
        assert_eq!(quads[1].tl.color.r, 2);
        assert!(!batch.item(child).unwrap().dirty);
    }

    #[test]
    fn test_parent_transform_reaches_children() {
        let mut batch = batch(4);
        let parent = batch.add_child(leaf(1, 0)).unwrap();
        let mut moved = marker(2);
        moved.offset = (1.0, 0.0);
        batch.add_child_to(parent, Subtree::new(moved)).unwrap();

        batch.item_mut(parent).unwrap().offset = (10.0, 20.0);
        batch.update_transforms();

        let child_quad = batch.quad_buffer().quads()[1];
        assert_eq!(child_quad.bl.position, Vertex3F::new(11.0, 20.0, 0.0));
    }

    #[test]
    fn test_clean_items_are_not_reuploaded() {
        let mut batch = batch(4);
        batch.add_child(leaf(1, 0)).unwrap();
        let b = batch.add_child(leaf(2, 0)).unwrap();
        batch.add_child(leaf(3, 0)).unwrap();

        let mut dispatch = RecordingDispatch::new();
        let first = batch.draw(&mut dispatch);
        assert_eq!(first.uploaded_bytes, 3 * Quad::SIZE);

        batch.item_mut(b).unwrap().offset = (2.0, 2.0);
        let second = batch.draw(&mut dispatch);
        assert_eq!(second.uploaded_bytes, Quad::SIZE);
        let draw = dispatch.draws().last().unwrap();
        assert_eq!(draw.upload, Some(Quad::SIZE..2 * Quad::SIZE));
    }

    #[test]
    fn test_empty_batch_draws_nothing() {
        let mut batch = batch(4);
        let mut dispatch = RecordingDispatch::new();
        assert_eq!(batch.draw(&mut dispatch), RenderStats::default());
        assert!(dispatch.events().is_empty());

        let a = batch.add_child(leaf(1, 0)).unwrap();
        batch.remove_child(a, true).unwrap();
        batch.draw(&mut dispatch);
        assert!(dispatch.events().is_empty());
    }

    #[test]
    fn test_draw_is_one_call() {
        let mut batch = batch(4);
        for tag in 1..=4 {
            batch.append_child(leaf(tag, 4 - i32::from(tag))).unwrap();
        }
        let mut dispatch = RecordingDispatch::new();
        let stats = batch.draw(&mut dispatch);

        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.quads, 4);
        assert!(matches!(dispatch.events()[0], DispatchEvent::Allocate { .. }));
        assert_eq!(dispatch.draw_count(), 1);
        assert_eq!(tags(&batch), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_blend_follows_texture_alpha_until_overridden() {
        let straight = Texture::shared(TextureId(2), 8, 8, false);
        let mut batch: BatchNode<Marker> = BatchNode::with_texture(straight, 0).unwrap();
        assert_eq!(batch.blend_func(), BlendFunc::ALPHA_NON_PREMULTIPLIED);
        assert_eq!(batch.quad_buffer().capacity(), 29);

        batch.set_texture(Texture::shared(TextureId(3), 8, 8, true));
        assert_eq!(batch.blend_func(), BlendFunc::ALPHA_PREMULTIPLIED);

        batch.set_blend_func(BlendFunc::ADDITIVE);
        batch.set_texture(Texture::shared(TextureId(4), 8, 8, false));
        assert_eq!(batch.blend_func(), BlendFunc::ADDITIVE);
    }

    #[test]
    fn test_config_with_zero_growth_denominator_rejected() {
        let config = BatchConfig {
            growth: GrowthFactor {
                numerator: 4,
                denominator: 0,
            },
            ..BatchConfig::default()
        };
        let texture = Texture::shared(TextureId(1), 64, 64, true);
        let result = BatchNode::<Marker>::with_config(texture, 1, &config);
        assert!(matches!(result, Err(BatchError::InvalidConfig(_))));
    }

    #[test]
    fn test_failed_growth_leaves_batch_unchanged() {
        let mut batch = batch(MAX_QUADS);
        for _ in 0..MAX_QUADS {
            batch.append_child(Subtree::new(marker(0))).unwrap();
        }
        let before: Vec<NodeId> = batch.descendants().to_vec();

        let appended = batch.append_child(leaf(1, 0));
        assert!(matches!(appended, Err(BatchError::CapacityLimit { .. })));
        let added = batch.add_child(leaf(2, 0));
        assert!(matches!(added, Err(BatchError::CapacityLimit { .. })));

        assert_eq!(batch.len(), MAX_QUADS);
        assert_eq!(batch.descendants(), before.as_slice());
        assert_eq!(batch.quad_buffer().capacity(), MAX_QUADS);
        assert_eq!(batch.quad_buffer().total_quads(), MAX_QUADS);
    }

    #[test]
    fn test_child_by_tag_and_remove_all() {
        let mut batch = batch(4);
        batch.add_child(leaf(1, 0)).unwrap();
        let b = batch.add_child(leaf(2, 0).with_child(leaf(3, 0))).unwrap();
        assert_eq!(batch.child_by_tag(2), Some(b));
        assert_eq!(batch.child_by_tag(3), None);

        let detached = batch.remove_all_children(false);
        assert_eq!(detached.len(), 2);
        assert_eq!(detached[1].children.len(), 1);
        assert!(batch.is_empty());
        assert_eq!(batch.quad_buffer().total_quads(), 0);
        assert!(batch.descendants().is_empty());
    }

    #[test]
    fn test_insert_quad_from_item_in_row_order() {
        let mut batch = batch(4);
        for (slot, tag) in [1u8, 2, 3].iter().enumerate() {
            batch
                .insert_quad_from_item(marker(*tag), 0, i32::from(*tag), slot)
                .unwrap();
        }
        assert_eq!(tags(&batch), vec![1, 2, 3]);
        batch.sort_all_children();
        assert_eq!(tags(&batch), vec![1, 2, 3]);

        assert!(matches!(
            batch.insert_quad_from_item(marker(4), 0, 4, 9),
            Err(BatchError::IndexOutOfRange { index: 9, len: 3 })
        ));
    }

    #[test]
    fn test_swap_updates_both_owners() {
        let mut batch = batch(4);
        let a = batch.add_child(leaf(1, 0)).unwrap();
        let b = batch.add_child(leaf(2, 0)).unwrap();
        batch.swap(0, 1);
        assert_eq!(batch.atlas_slot(a), Some(AtlasSlot::new(1)));
        assert_eq!(batch.atlas_slot(b), Some(AtlasSlot::new(0)));
        assert_consistent(&batch);
    }
}
