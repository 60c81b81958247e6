//! Scene-level tests exercising sprite batches end to end

mod randomized_consistency;

use crate::foundation::math::Rect;
use crate::render::texture::{Texture, TextureHandle, TextureId};
use crate::scene::{AtlasSlot, NodeId, Sprite, SpriteBatchNode, Subtree};

pub(super) fn atlas() -> TextureHandle {
    Texture::shared(TextureId(42), 128, 128, true)
}

/// Opaque sprite whose quad colour encodes `tag` in the red channel
pub(super) fn tagged_sprite(tag: u8) -> Sprite {
    let mut sprite = Sprite::with_rect(Rect::new(0.0, 0.0, 8.0, 8.0));
    sprite.set_color(tag, 0, 0);
    sprite
}

pub(super) fn node(tag: u8, z_order: i32) -> Subtree<Sprite> {
    Subtree::new(tagged_sprite(tag))
        .with_z_order(z_order)
        .with_tag(i32::from(tag))
}

pub(super) fn tags_in_slot_order(batch: &SpriteBatchNode) -> Vec<i32> {
    batch
        .descendants()
        .iter()
        .filter_map(|id| batch.tag(*id))
        .collect()
}

/// Slot table, cached slots and quad contents agree
pub(super) fn assert_slots_consistent(batch: &SpriteBatchNode) {
    let quads = batch.quad_buffer().quads();
    assert_eq!(batch.descendants().len(), quads.len());
    assert_eq!(batch.len(), quads.len());
    for (slot, id) in batch.descendants().iter().enumerate() {
        assert_eq!(batch.atlas_slot(*id), Some(AtlasSlot::new(slot)), "slot {}", slot);
        let tag = batch.tag(*id).unwrap_or_default();
        assert_eq!(i32::from(quads[slot].tl.color.r), tag, "quad in slot {}", slot);
    }
}

/// Slot order equals the tree's draw order
pub(super) fn assert_draw_ordered(batch: &SpriteBatchNode) {
    let expected: Vec<NodeId> = batch.draw_order();
    assert_eq!(batch.descendants(), expected.as_slice());
}
