//! Draw dispatch abstraction
//!
//! The batching core never talks to a graphics API directly. It hands the
//! backend one [`DrawCall`] per batch draw: an optional upload of the dirty
//! byte range of the vertex buffer followed by an indexed draw.

use std::collections::HashMap;
use std::ops::Range;

use crate::render::quad::BlendFunc;
use crate::render::texture::TextureId;

/// Backend name of a vertex/index buffer pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Bytes to copy into the vertex buffer before drawing
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    /// Destination offset in the vertex buffer
    pub byte_offset: usize,
    /// Source bytes
    pub bytes: &'a [u8],
}

/// One "upload sub-range + draw indexed" request
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    /// Target buffer
    pub buffer: BufferId,
    /// Texture sampled by the draw
    pub texture: TextureId,
    /// Blend function for the draw
    pub blend: BlendFunc,
    /// Vertex data to upload first, if the buffer is dirty
    pub upload: Option<Upload<'a>>,
    /// First index to draw from
    pub first_index: usize,
    /// Number of indices (6 per quad)
    pub index_count: usize,
}

/// Graphics backend seen by the batching core
pub trait DrawDispatch {
    /// Create a vertex buffer of `vertex_bytes` bytes and an index buffer holding `indices`
    fn allocate_buffer(&mut self, vertex_bytes: usize, indices: &[u16]) -> BufferId;

    /// Free a buffer created by [`DrawDispatch::allocate_buffer`]
    fn release_buffer(&mut self, buffer: BufferId);

    /// Upload (if requested) and issue one indexed draw
    fn submit(&mut self, call: &DrawCall<'_>);
}

/// Per-frame draw counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Draw calls issued
    pub draw_calls: usize,
    /// Quads drawn
    pub quads: usize,
    /// Vertex bytes uploaded
    pub uploaded_bytes: usize,
}

impl RenderStats {
    /// Add another set of counters into this one
    pub fn accumulate(&mut self, other: Self) {
        self.draw_calls += other.draw_calls;
        self.quads += other.quads;
        self.uploaded_bytes += other.uploaded_bytes;
    }
}

/// A draw as seen by [`RecordingDispatch`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    /// Target buffer
    pub buffer: BufferId,
    /// Sampled texture
    pub texture: TextureId,
    /// Blend function
    pub blend: BlendFunc,
    /// Uploaded byte range, if any
    pub upload: Option<Range<usize>>,
    /// First index
    pub first_index: usize,
    /// Index count
    pub index_count: usize,
}

/// Dispatcher events in submission order
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// A buffer was created
    Allocate {
        /// New buffer
        buffer: BufferId,
        /// Vertex buffer size
        vertex_bytes: usize,
        /// Number of indices uploaded
        index_count: usize,
    },
    /// A buffer was freed
    Release(BufferId),
    /// A draw was submitted
    Draw(RecordedDraw),
}

/// Headless dispatcher that keeps a CPU mirror of every buffer.
///
/// Used by tests and tools to observe exactly what a batch uploads and draws.
#[derive(Debug, Default)]
pub struct RecordingDispatch {
    next_buffer: u64,
    buffers: HashMap<BufferId, Vec<u8>>,
    events: Vec<DispatchEvent>,
}

impl RecordingDispatch {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far
    pub fn events(&self) -> &[DispatchEvent] {
        &self.events
    }

    /// Only the draw events
    pub fn draws(&self) -> impl Iterator<Item = &RecordedDraw> {
        self.events.iter().filter_map(|event| match event {
            DispatchEvent::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    /// Number of draws submitted
    pub fn draw_count(&self) -> usize {
        self.draws().count()
    }

    /// Current contents of a live buffer's vertex storage
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Number of live buffers
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }
}

impl DrawDispatch for RecordingDispatch {
    fn allocate_buffer(&mut self, vertex_bytes: usize, indices: &[u16]) -> BufferId {
        let buffer = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(buffer, vec![0; vertex_bytes]);
        self.events.push(DispatchEvent::Allocate {
            buffer,
            vertex_bytes,
            index_count: indices.len(),
        });
        buffer
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
        self.events.push(DispatchEvent::Release(buffer));
    }

    fn submit(&mut self, call: &DrawCall<'_>) {
        let upload = call.upload.map(|upload| {
            let range = upload.byte_offset..upload.byte_offset + upload.bytes.len();
            if let Some(storage) = self.buffers.get_mut(&call.buffer) {
                if range.end <= storage.len() {
                    storage[range.clone()].copy_from_slice(upload.bytes);
                } else {
                    log::warn!(
                        "upload {:?} overflows buffer {:?} of {} bytes",
                        range,
                        call.buffer,
                        storage.len()
                    );
                }
            }
            range
        });

        self.events.push(DispatchEvent::Draw(RecordedDraw {
            buffer: call.buffer,
            texture: call.texture,
            blend: call.blend,
            upload,
            first_index: call.first_index,
            index_count: call.index_count,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_mirrors_uploads() {
        let mut dispatch = RecordingDispatch::new();
        let buffer = dispatch.allocate_buffer(8, &[0, 1, 2, 3, 2, 1]);

        let bytes = [1u8, 2, 3, 4];
        dispatch.submit(&DrawCall {
            buffer,
            texture: TextureId(1),
            blend: BlendFunc::default(),
            upload: Some(Upload {
                byte_offset: 2,
                bytes: &bytes,
            }),
            first_index: 0,
            index_count: 6,
        });

        assert_eq!(dispatch.buffer_contents(buffer), Some(&[0, 0, 1, 2, 3, 4, 0, 0][..]));
        let draw = dispatch.draws().next().unwrap();
        assert_eq!(draw.upload, Some(2..6));
        assert_eq!(draw.index_count, 6);
    }

    #[test]
    fn test_release_drops_mirror() {
        let mut dispatch = RecordingDispatch::new();
        let buffer = dispatch.allocate_buffer(4, &[]);
        assert_eq!(dispatch.live_buffers(), 1);

        dispatch.release_buffer(buffer);
        assert_eq!(dispatch.live_buffers(), 0);
        assert_eq!(dispatch.events().len(), 2);
    }

    #[test]
    fn test_stats_accumulate() {
        let mut total = RenderStats::default();
        total.accumulate(RenderStats {
            draw_calls: 1,
            quads: 3,
            uploaded_bytes: 288,
        });
        total.accumulate(RenderStats {
            draw_calls: 1,
            quads: 1,
            uploaded_bytes: 0,
        });
        assert_eq!(total.draw_calls, 2);
        assert_eq!(total.quads, 4);
    }
}
