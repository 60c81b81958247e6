//! Sprites
//!
//! A sprite draws one textured rectangle. Inside a [`SpriteBatchNode`] its quad
//! is written by the batch; on its own it keeps a one-quad buffer and issues
//! its own draw call.

use std::rc::Rc;

use bitflags::bitflags;

use crate::foundation::math::{transform_point, Affine2, Rect, Transform2D, Vec2};
use crate::render::dispatch::{DrawDispatch, RenderStats};
use crate::render::quad::{BlendFunc, Color4B, Quad, Tex2F, Vertex3F};
use crate::render::quad_buffer::QuadBuffer;
use crate::render::texture::{Texture, TextureHandle, TextureId};
use crate::render::BatchResult;
use crate::scene::batch_node::{BatchNode, Batchable};

/// Batch of sprites sharing one texture
pub type SpriteBatchNode = BatchNode<Sprite>;

bitflags! {
    /// Texture mapping flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SpriteFlags: u8 {
        /// Mirror horizontally
        const FLIP_X = 0b0001;
        /// Mirror vertically
        const FLIP_Y = 0b0010;
        /// The texture region is stored rotated 90 degrees clockwise
        const ROTATED = 0b0100;
    }
}

/// A textured rectangle
#[derive(Debug)]
pub struct Sprite {
    texture: Option<TextureHandle>,
    rect: Rect,
    flags: SpriteFlags,
    transform: Transform2D,
    anchor: Vec2,
    offset: Vec2,
    vertex_z: f32,
    color: Color4B,
    visible: bool,
    dirty: bool,
    own_buffer: Option<QuadBuffer>,
}

impl Default for Sprite {
    fn default() -> Self {
        Self {
            texture: None,
            rect: Rect::default(),
            flags: SpriteFlags::empty(),
            transform: Transform2D::default(),
            anchor: Vec2::new(0.5, 0.5),
            offset: Vec2::zeros(),
            vertex_z: 0.0,
            color: Color4B::WHITE,
            visible: true,
            dirty: true,
            own_buffer: None,
        }
    }
}

impl Sprite {
    /// Sprite showing the whole texture
    pub fn with_texture(texture: TextureHandle) -> Self {
        let rect = Rect::new(0.0, 0.0, texture.width() as f32, texture.height() as f32);
        Self::with_texture_rect(texture, rect)
    }

    /// Sprite showing `rect` (in pixels) of `texture`
    pub fn with_texture_rect(texture: TextureHandle, rect: Rect) -> Self {
        Self {
            texture: Some(texture),
            rect,
            ..Self::default()
        }
    }

    /// Sprite showing `rect` of whatever texture its batch uses
    pub fn with_rect(rect: Rect) -> Self {
        Self {
            rect,
            ..Self::default()
        }
    }

    /// Region of the texture shown
    pub fn texture_rect(&self) -> Rect {
        self.rect
    }

    /// Change the region shown; `rotated` marks a region stored rotated in the atlas
    pub fn set_texture_rect(&mut self, rect: Rect, rotated: bool) {
        self.rect = rect;
        self.flags.set(SpriteFlags::ROTATED, rotated);
        self.dirty = true;
    }

    /// Texture the sprite was created with
    pub fn texture(&self) -> Option<&TextureHandle> {
        self.texture.as_ref()
    }

    /// Replace the texture
    pub fn set_texture(&mut self, texture: TextureHandle) {
        if let Some(buffer) = self.own_buffer.as_mut() {
            buffer.set_texture(Rc::clone(&texture));
        }
        self.texture = Some(texture);
        self.dirty = true;
    }

    /// Texture mapping flags
    pub fn flags(&self) -> SpriteFlags {
        self.flags
    }

    /// Mirror horizontally
    pub fn set_flipped_x(&mut self, flipped: bool) {
        self.flags.set(SpriteFlags::FLIP_X, flipped);
        self.dirty = true;
    }

    /// Mirror vertically
    pub fn set_flipped_y(&mut self, flipped: bool) {
        self.flags.set(SpriteFlags::FLIP_Y, flipped);
        self.dirty = true;
    }

    /// Position of the anchor point in parent space
    pub fn position(&self) -> Vec2 {
        self.transform.position
    }

    /// Move the sprite
    pub fn set_position(&mut self, x: f32, y: f32) {
        self.transform.position = Vec2::new(x, y);
        self.dirty = true;
    }

    /// Clockwise rotation in degrees
    pub fn rotation(&self) -> f32 {
        self.transform.rotation
    }

    /// Rotate around the anchor point
    pub fn set_rotation(&mut self, degrees: f32) {
        self.transform.rotation = degrees;
        self.dirty = true;
    }

    /// Scale factors
    pub fn scale(&self) -> Vec2 {
        self.transform.scale
    }

    /// Scale around the anchor point
    pub fn set_scale(&mut self, x: f32, y: f32) {
        self.transform.scale = Vec2::new(x, y);
        self.dirty = true;
    }

    /// Anchor point, normalized to the content size
    pub fn anchor_point(&self) -> Vec2 {
        self.anchor
    }

    /// Set the anchor point
    pub fn set_anchor_point(&mut self, x: f32, y: f32) {
        self.anchor = Vec2::new(x, y);
        self.dirty = true;
    }

    /// Offset of the quad inside the content box (trimmed atlas frames)
    pub fn set_offset(&mut self, x: f32, y: f32) {
        self.offset = Vec2::new(x, y);
        self.dirty = true;
    }

    /// Depth written to every vertex
    pub fn set_vertex_z(&mut self, z: f32) {
        self.vertex_z = z;
        self.dirty = true;
    }

    /// Tint and opacity
    pub fn color(&self) -> Color4B {
        self.color
    }

    /// Set the tint, keeping opacity
    pub fn set_color(&mut self, r: u8, g: u8, b: u8) {
        self.color = Color4B::new(r, g, b, self.color.a);
        self.dirty = true;
    }

    /// Set the opacity
    pub fn set_opacity(&mut self, opacity: u8) {
        self.color.a = opacity;
        self.dirty = true;
    }

    /// Show or hide
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        self.dirty = true;
    }

    /// Size of the untransformed quad
    pub fn content_size(&self) -> Vec2 {
        self.rect.size()
    }

    fn tex_coords(&self, texture: &Texture) -> [Tex2F; 4] {
        let rect = self.rect;
        let flip_x = self.flags.contains(SpriteFlags::FLIP_X);
        let flip_y = self.flags.contains(SpriteFlags::FLIP_Y);

        if self.flags.contains(SpriteFlags::ROTATED) {
            let (mut left, mut top) = texture.normalize(rect.x, rect.y);
            let (mut right, mut bottom) =
                texture.normalize(rect.x + rect.height, rect.y + rect.width);
            if flip_x {
                std::mem::swap(&mut top, &mut bottom);
            }
            if flip_y {
                std::mem::swap(&mut left, &mut right);
            }
            // [tl, bl, tr, br]
            [
                Tex2F::new(right, top),
                Tex2F::new(left, top),
                Tex2F::new(right, bottom),
                Tex2F::new(left, bottom),
            ]
        } else {
            let (mut left, mut top) = texture.normalize(rect.x, rect.y);
            let (mut right, mut bottom) =
                texture.normalize(rect.x + rect.width, rect.y + rect.height);
            if flip_x {
                std::mem::swap(&mut left, &mut right);
            }
            if flip_y {
                std::mem::swap(&mut top, &mut bottom);
            }
            [
                Tex2F::new(left, top),
                Tex2F::new(left, bottom),
                Tex2F::new(right, top),
                Tex2F::new(right, bottom),
            ]
        }
    }

    // ---- standalone rendering ----

    /// Draw the sprite on its own, outside any batch.
    ///
    /// A one-quad buffer is created on first use. Sprites without a texture,
    /// and hidden sprites, draw nothing.
    pub fn draw_self(&mut self, dispatch: &mut dyn DrawDispatch) -> BatchResult<RenderStats> {
        let Some(texture) = self.texture.clone() else {
            return Ok(RenderStats::default());
        };
        if !self.visible {
            return Ok(RenderStats::default());
        }

        if self.own_buffer.is_none() {
            self.own_buffer = Some(QuadBuffer::with_capacity(Rc::clone(&texture), 1)?);
        }
        let quad = self.build_quad(&self.local_transform(), &texture);
        let rewrite = self.dirty;
        let Some(buffer) = self.own_buffer.as_mut() else {
            return Ok(RenderStats::default());
        };

        if rewrite || buffer.is_empty() {
            buffer.update_quad(&quad, 0);
        }
        self.dirty = false;

        let blend = BlendFunc::for_texture(texture.has_premultiplied_alpha());
        Ok(buffer.draw_quads(blend, dispatch))
    }

    /// Free the standalone buffer, if any
    pub fn release_self(&mut self, dispatch: &mut dyn DrawDispatch) {
        if let Some(mut buffer) = self.own_buffer.take() {
            buffer.release(dispatch);
        }
    }
}

impl Batchable for Sprite {
    fn texture_id(&self) -> Option<TextureId> {
        self.texture.as_ref().map(|texture| texture.id())
    }

    fn local_transform(&self) -> Affine2 {
        let size = self.content_size();
        let pivot = Vec2::new(self.anchor.x * size.x, self.anchor.y * size.y);
        self.transform.to_matrix(pivot)
    }

    fn build_quad(&self, to_batch: &Affine2, texture: &Texture) -> Quad {
        let x1 = self.offset.x;
        let y1 = self.offset.y;
        let x2 = x1 + self.rect.width;
        let y2 = y1 + self.rect.height;
        let vertex = |x, y| {
            let p = transform_point(to_batch, x, y);
            Vertex3F::new(p.x, p.y, self.vertex_z)
        };

        let [tl, bl, tr, br] = self.tex_coords(texture);
        let mut quad = Quad::EMPTY;
        quad.tl.position = vertex(x1, y2);
        quad.bl.position = vertex(x1, y1);
        quad.tr.position = vertex(x2, y2);
        quad.br.position = vertex(x2, y1);
        quad.tl.tex_coords = tl;
        quad.bl.tex_coords = bl;
        quad.tr.tex_coords = tr;
        quad.br.tex_coords = br;

        let color = if texture.has_premultiplied_alpha() {
            self.color.premultiplied()
        } else {
            self.color
        };
        quad.set_color(color);
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
