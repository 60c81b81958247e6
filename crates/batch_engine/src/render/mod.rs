//! # Render
//!
//! GPU-facing half of the batching core: the quad vertex records, the dense
//! [`QuadBuffer`] that stores them in draw order, shared texture handles and
//! the [`DrawDispatch`] seam through which buffers are uploaded and drawn.

pub mod dispatch;
pub mod quad;
pub mod quad_buffer;
pub mod texture;

pub use dispatch::{BufferId, DrawCall, DrawDispatch, RecordingDispatch, RenderStats, Upload};
pub use quad::{BlendFactor, BlendFunc, Color4B, Quad, QuadVertex, Tex2F, Vertex3F};
pub use quad_buffer::QuadBuffer;
pub use texture::{Texture, TextureHandle, TextureId};

use crate::config::ConfigError;
use crate::scene::NodeId;

/// Result type for batching operations
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors reported by quad buffers and batch nodes.
///
/// These are conditions a caller can recover from. Broken internal invariants
/// (a slot outside the live range, a descendants table out of step with the
/// quad storage) are bugs and panic instead.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Growing quad storage failed to allocate
    #[error("out of memory resizing quad buffer to {requested} quads")]
    ResourceExhausted {
        /// Capacity that was being allocated
        requested: usize,
    },

    /// Capacity exceeds what 16-bit indices can address
    #[error("quad capacity {requested} exceeds the index limit of {max}")]
    CapacityLimit {
        /// Requested capacity
        requested: usize,
        /// Largest supported capacity
        max: usize,
    },

    /// An item samples a different texture than the batch
    #[error("item texture {found} does not match batch texture {expected}")]
    TextureMismatch {
        /// Batch texture
        expected: TextureId,
        /// Item texture
        found: TextureId,
    },

    /// A particle system uses a different blend function than its batch
    #[error("blend function {found:?} does not match batch blend function {expected:?}")]
    BlendMismatch {
        /// Batch blend function
        expected: BlendFunc,
        /// Child blend function
        found: BlendFunc,
    },

    /// The node handle is not (or no longer) part of this batch
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// The node exists but is not a child of the node it was addressed through
    #[error("node {0:?} is not a child of the given parent")]
    NotAChild(NodeId),

    /// A child position is outside the children list
    #[error("child index {index} out of range for {len} children")]
    IndexOutOfRange {
        /// Requested position
        index: usize,
        /// Number of children
        len: usize,
    },

    /// Batch parameters rejected by [`BatchConfig::validate`]
    ///
    /// [`BatchConfig::validate`]: crate::config::BatchConfig::validate
    #[error("invalid batch configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}
