//! Quad vertex records
//!
//! These are the exact bytes uploaded to the GPU vertex buffer: position,
//! packed RGBA colour and texture coordinate per vertex, four vertices per quad.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Vertex position
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex3F {
    /// X
    pub x: f32,
    /// Y
    pub y: f32,
    /// Z (vertex depth, usually 0)
    pub z: f32,
}

impl Vertex3F {
    /// Create a new position
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// RGBA colour, one byte per channel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct Color4B {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha
    pub a: u8,
}

impl Color4B {
    /// Opaque white
    pub const WHITE: Self = Self::new(255, 255, 255, 255);

    /// Create a new colour
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Multiply the colour channels by alpha, as sampled from a premultiplied texture
    pub fn premultiplied(self) -> Self {
        let scale = |c: u8| ((u16::from(c) * u16::from(self.a)) / 255) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b), self.a)
    }
}

/// Texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Tex2F {
    /// Horizontal coordinate
    pub u: f32,
    /// Vertical coordinate
    pub v: f32,
}

impl Tex2F {
    /// Create a new texture coordinate
    pub const fn new(u: f32, v: f32) -> Self {
        Self { u, v }
    }
}

/// One vertex of a quad: position, colour, texture coordinate (24 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct QuadVertex {
    /// Position
    pub position: Vertex3F,
    /// Colour
    pub color: Color4B,
    /// Texture coordinate
    pub tex_coords: Tex2F,
}

/// A textured rectangle, the atomic unit of batch storage.
///
/// Vertex order is top-left, bottom-left, top-right, bottom-right, which the
/// index pattern in [`quad_indices`] turns into two triangles.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Quad {
    /// Top-left vertex
    pub tl: QuadVertex,
    /// Bottom-left vertex
    pub bl: QuadVertex,
    /// Top-right vertex
    pub tr: QuadVertex,
    /// Bottom-right vertex
    pub br: QuadVertex,
}

impl Quad {
    /// All-zero quad; rasterizes to nothing
    pub const EMPTY: Self = Self {
        tl: QUAD_VERTEX_ZERO,
        bl: QUAD_VERTEX_ZERO,
        tr: QUAD_VERTEX_ZERO,
        br: QUAD_VERTEX_ZERO,
    };

    /// Size of one quad in bytes
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// True if the four positions coincide at the origin
    pub fn is_collapsed(&self) -> bool {
        let origin = Vertex3F::default();
        [self.tl, self.bl, self.tr, self.br]
            .iter()
            .all(|v| v.position == origin)
    }

    /// Set every vertex colour
    pub fn set_color(&mut self, color: Color4B) {
        self.tl.color = color;
        self.bl.color = color;
        self.tr.color = color;
        self.br.color = color;
    }

    /// Collapse geometry to the origin, keeping colours and texture coordinates
    pub fn collapse(&mut self) {
        let origin = Vertex3F::default();
        self.tl.position = origin;
        self.bl.position = origin;
        self.tr.position = origin;
        self.br.position = origin;
    }
}

const QUAD_VERTEX_ZERO: QuadVertex = QuadVertex {
    position: Vertex3F::new(0.0, 0.0, 0.0),
    color: Color4B::new(0, 0, 0, 0),
    tex_coords: Tex2F::new(0.0, 0.0),
};

/// Largest number of quads addressable with 16-bit indices
pub const MAX_QUADS: usize = (u16::MAX as usize + 1) / 4;

/// Index pattern for the quad stored at `slot` (two triangles)
pub fn quad_indices(slot: usize) -> [u16; 6] {
    debug_assert!(slot < MAX_QUADS);
    let base = (slot * 4) as u16;
    [base, base + 1, base + 2, base + 3, base + 2, base + 1]
}

/// Blend factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendFactor {
    /// 0
    Zero,
    /// 1
    One,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    OneMinusSrcAlpha,
    /// Destination colour
    DstColor,
}

/// Source/destination blend pair used for a batch draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlendFunc {
    /// Source factor
    pub src: BlendFactor,
    /// Destination factor
    pub dst: BlendFactor,
}

impl BlendFunc {
    /// Alpha blending for textures with premultiplied alpha (engine default)
    pub const ALPHA_PREMULTIPLIED: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::OneMinusSrcAlpha,
    };

    /// Alpha blending for straight-alpha textures
    pub const ALPHA_NON_PREMULTIPLIED: Self = Self {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };

    /// Additive blending
    pub const ADDITIVE: Self = Self {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::One,
    };

    /// Blending disabled
    pub const DISABLE: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
    };

    /// Default blend function for a texture
    pub fn for_texture(premultiplied_alpha: bool) -> Self {
        if premultiplied_alpha {
            Self::ALPHA_PREMULTIPLIED
        } else {
            Self::ALPHA_NON_PREMULTIPLIED
        }
    }
}

impl Default for BlendFunc {
    fn default() -> Self {
        Self::ALPHA_PREMULTIPLIED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_layout_has_no_padding() {
        assert_eq!(std::mem::size_of::<QuadVertex>(), 24);
        assert_eq!(Quad::SIZE, 96);
        assert_eq!(bytemuck::bytes_of(&Quad::EMPTY).len(), 96);
    }

    #[test]
    fn test_quad_indices_pattern() {
        assert_eq!(quad_indices(0), [0, 1, 2, 3, 2, 1]);
        assert_eq!(quad_indices(2), [8, 9, 10, 11, 10, 9]);
        assert_eq!(quad_indices(MAX_QUADS - 1)[3], u16::MAX);
    }

    #[test]
    fn test_premultiplied_color() {
        let color = Color4B::new(255, 128, 0, 128).premultiplied();
        assert_eq!(color, Color4B::new(128, 64, 0, 128));
        assert_eq!(Color4B::WHITE.premultiplied(), Color4B::WHITE);
    }

    #[test]
    fn test_collapse_keeps_color() {
        let mut quad = Quad::default();
        quad.tl.position = Vertex3F::new(1.0, 2.0, 0.0);
        quad.set_color(Color4B::WHITE);
        assert!(!quad.is_collapsed());

        quad.collapse();
        assert!(quad.is_collapsed());
        assert_eq!(quad.br.color, Color4B::WHITE);
    }

    #[test]
    fn test_blend_for_texture() {
        assert_eq!(BlendFunc::for_texture(true), BlendFunc::ALPHA_PREMULTIPLIED);
        assert_eq!(BlendFunc::for_texture(false), BlendFunc::ALPHA_NON_PREMULTIPLIED);
    }
}
