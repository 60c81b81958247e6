//! # Batch Engine
//!
//! Texture-atlas batching for 2D scene graphs: many small textured quads that
//! share one texture are stored in a single dense buffer, kept in draw order,
//! and rendered with one draw call.
//!
//! ## Features
//!
//! - **Quad Buffer**: dense, growable quad storage with dirty-span uploads
//! - **Sprite Batches**: a tree of items flattened into draw order, with lazy
//!   z-reordering repaired by swaps
//! - **Particle Batches**: particle systems sharing one buffer as contiguous runs
//! - **Backend Agnostic**: all GPU work goes through the [`render::DrawDispatch`] trait
//!
//! ## Quick Start
//!
//! ```rust
//! use batch_engine::prelude::*;
//!
//! fn main() -> Result<(), BatchError> {
//!     let atlas = Texture::shared(TextureId(1), 256, 256, true);
//!     let mut batch = SpriteBatchNode::with_texture(atlas, 0)?;
//!
//!     let mut ship = Sprite::with_rect(Rect::new(0.0, 0.0, 32.0, 32.0));
//!     ship.set_position(100.0, 80.0);
//!     batch.add_child(Subtree::new(ship).with_z_order(1))?;
//!     batch.add_child(Subtree::new(Sprite::with_rect(Rect::new(32.0, 0.0, 64.0, 64.0))))?;
//!
//!     let mut dispatch = RecordingDispatch::new();
//!     let stats = batch.draw(&mut dispatch);
//!     assert_eq!(stats.draw_calls, 1);
//!     assert_eq!(stats.quads, 2);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for batch users
pub mod prelude {
    pub use crate::{
        config::{BatchConfig, Config, ConfigError, GrowthFactor},
        foundation::math::{Rect, Vec2},
        render::{
            BatchError, BatchResult, BlendFunc, DrawDispatch, Quad, QuadBuffer,
            RecordingDispatch, RenderStats, Texture, TextureHandle, TextureId,
        },
        scene::{
            AtlasSlot, BatchNode, Batchable, NodeId, Particle, ParticleBatchNode,
            ParticleSystem, Sprite, SpriteBatchNode, Subtree,
        },
    };
}
