//! Texture handles
//!
//! Textures are decoded and uploaded elsewhere; batches only read their pixel
//! size (to normalize texture coordinates) and alpha mode (to pick a default
//! blend function). Handles are reference-counted and shared between batches.

use std::fmt;
use std::rc::Rc;

/// Backend name of an uploaded texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable description of a GPU texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    id: TextureId,
    width: u32,
    height: u32,
    premultiplied_alpha: bool,
}

/// Shared texture reference
pub type TextureHandle = Rc<Texture>;

impl Texture {
    /// Describe an uploaded texture
    pub fn new(id: TextureId, width: u32, height: u32, premultiplied_alpha: bool) -> Self {
        Self {
            id,
            width,
            height,
            premultiplied_alpha,
        }
    }

    /// Describe an uploaded texture and wrap it in a shared handle
    pub fn shared(id: TextureId, width: u32, height: u32, premultiplied_alpha: bool) -> TextureHandle {
        Rc::new(Self::new(id, width, height, premultiplied_alpha))
    }

    /// Backend name
    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether colour channels are stored multiplied by alpha
    pub fn has_premultiplied_alpha(&self) -> bool {
        self.premultiplied_alpha
    }

    /// Normalize a pixel coordinate to `[0, 1]` texture space.
    ///
    /// A zero-sized texture maps everything to 0.
    pub fn normalize(&self, x: f32, y: f32) -> (f32, f32) {
        if self.width == 0 || self.height == 0 {
            return (0.0, 0.0);
        }
        (x / self.width as f32, y / self.height as f32)
    }
}
