//! # Quad Buffer
//!
//! Dense, reallocatable storage of render quads plus the derived triangle
//! index list, mirrored into one GPU vertex buffer.
//!
//! ## Layout
//!
//! ```text
//! quads:   [q0][q1][q2] ... [q(count-1)] | zeroed / stale ... [q(capacity-1)]
//! indices: 6 per slot for the whole capacity, derived from the slot number only
//! ```
//!
//! Slot order is draw order. Every structural operation keeps `[0, count)`
//! contiguous and records the span of slots whose bytes changed, so a draw
//! uploads only that span.
//!
//! Index arguments outside the documented ranges are contract violations and
//! panic; allocation failure while growing is reported as
//! [`BatchError::ResourceExhausted`] and leaves the buffer untouched.

use std::fmt;
use std::ops::Range;

use crate::foundation::collections::DenseArray;
use crate::render::dispatch::{BufferId, DrawCall, DrawDispatch, RenderStats, Upload};
use crate::render::quad::{quad_indices, BlendFunc, Quad, MAX_QUADS};
use crate::render::texture::TextureHandle;
use crate::render::{BatchError, BatchResult};

/// GPU-side buffer currently backing the quads
#[derive(Debug, Clone, Copy)]
struct GpuBuffer {
    id: BufferId,
    capacity: usize,
}

/// Dense quad storage bound to one texture
#[derive(Debug)]
pub struct QuadBuffer {
    quads: DenseArray<Quad>,
    indices: Vec<u16>,
    texture: TextureHandle,
    dirty: Option<Range<usize>>,
    gpu: Option<GpuBuffer>,
}

impl QuadBuffer {
    /// Create an empty buffer able to hold `capacity` quads
    pub fn with_capacity(texture: TextureHandle, capacity: usize) -> BatchResult<Self> {
        check_capacity(capacity)?;
        let quads = DenseArray::try_with_capacity(capacity)
            .map_err(|_| BatchError::ResourceExhausted { requested: capacity })?;
        let indices = build_indices(capacity)?;

        Ok(Self {
            quads,
            indices,
            texture,
            dirty: Some(0..0),
            gpu: None,
        })
    }

    /// Maximum number of quads storable without reallocation
    pub fn capacity(&self) -> usize {
        self.quads.capacity()
    }

    /// Number of live quads
    pub fn total_quads(&self) -> usize {
        self.quads.len()
    }

    /// True when there are no live quads
    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    /// Live quads in draw order
    pub fn quads(&self) -> &[Quad] {
        self.quads.as_slice()
    }

    /// Live quad at `slot`
    pub fn quad(&self, slot: usize) -> Option<&Quad> {
        self.quads.get(slot)
    }

    /// Triangle indices for the whole capacity
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// Texture the quads sample from
    pub fn texture(&self) -> &TextureHandle {
        &self.texture
    }

    /// Replace the sampled texture. Quads are left where they are.
    pub fn set_texture(&mut self, texture: TextureHandle) {
        self.texture = texture;
    }

    /// True when CPU-side quads differ from the last upload
    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// Slots changed since the last upload
    pub fn dirty_span(&self) -> Option<Range<usize>> {
        self.dirty.clone()
    }

    /// Insert `quad` at `slot`, shifting `[slot, count)` right by one.
    ///
    /// Requires `slot <= count < capacity`; grow the buffer first when full.
    pub fn insert_quad(&mut self, quad: &Quad, slot: usize) {
        self.insert_quads(std::slice::from_ref(quad), slot);
    }

    /// Insert a run of quads at `slot`, shifting the tail right by `quads.len()`
    pub fn insert_quads(&mut self, quads: &[Quad], slot: usize) {
        self.quads.insert_slice(slot, quads);
        self.mark_dirty(slot..self.quads.len());
    }

    /// Overwrite the quad at `slot` in place.
    ///
    /// Requires `slot < capacity`. Writing past `count` extends it, which lets
    /// callers fill pre-reserved ranges out of order.
    pub fn update_quad(&mut self, quad: &Quad, slot: usize) {
        self.quads.set(slot, *quad);
        self.mark_dirty(slot..slot + 1);
    }

    /// Move the quad at `old` to `new`, shifting the quads in between
    pub fn insert_quad_from_index(&mut self, old: usize, new: usize) {
        assert!(
            old < self.total_quads() && new < self.total_quads(),
            "insert_quad_from_index: {} -> {} outside {} quads",
            old,
            new,
            self.total_quads()
        );
        self.move_quads_from_index(old, 1, new);
    }

    /// Remove the quad at `slot`, shifting the tail left by one
    pub fn remove_quad_at_index(&mut self, slot: usize) {
        self.remove_quads_at_index(slot, 1);
    }

    /// Remove `amount` quads starting at `slot`. Requires `slot + amount <= count`.
    pub fn remove_quads_at_index(&mut self, slot: usize, amount: usize) {
        self.quads.remove_range(slot, amount);
        self.mark_dirty(slot..self.quads.len());
    }

    /// Drop every live quad
    pub fn remove_all_quads(&mut self) {
        self.quads.clear();
    }

    /// Relocate the run `[old, old + amount)` so that it starts at `new`.
    ///
    /// Quads between the two positions shift to fill the gap. Requires
    /// `old + amount <= count` and `new + amount <= count`.
    pub fn move_quads_from_index(&mut self, old: usize, amount: usize, new: usize) {
        if old == new || amount == 0 {
            return;
        }
        self.quads.move_range(old, amount, new);
        self.mark_dirty(old.min(new)..old.max(new) + amount);
    }

    /// Copy the tail `[from, count)` to start at `to` without changing `count`.
    ///
    /// Used to open a gap before [`QuadBuffer::increase_total_quads_with`].
    pub fn move_tail(&mut self, from: usize, to: usize) {
        let amount = self.total_quads().saturating_sub(from);
        self.quads.move_tail(from, to);
        self.mark_dirty(from.min(to)..from.max(to) + amount);
    }

    /// Extend `count` over slots that were already written or zeroed
    pub fn increase_total_quads_with(&mut self, amount: usize) {
        let start = self.total_quads();
        self.quads.grow_len(amount);
        self.mark_dirty(start..start + amount);
    }

    /// Exchange two live quads
    pub fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.quads.swap(a, b);
        self.mark_dirty(a..a + 1);
        self.mark_dirty(b..b + 1);
    }

    /// Zero `amount` slots starting at `slot` (clamped to capacity)
    pub fn fill_with_empty_quads_from_index(&mut self, slot: usize, amount: usize) {
        self.quads.fill(slot, amount, Quad::EMPTY);
        self.mark_dirty(slot..slot + amount);
    }

    /// Reallocate to hold `new_capacity` quads.
    ///
    /// `count` is clamped, new slots are zeroed and indices are rebuilt for the
    /// whole new capacity. Resizing to the current capacity is a no-op. Both
    /// replacement allocations are made before anything is committed, so on
    /// failure the buffer is unchanged.
    pub fn resize_capacity(&mut self, new_capacity: usize) -> BatchResult<()> {
        if new_capacity == self.capacity() {
            return Ok(());
        }
        check_capacity(new_capacity)?;

        let quads = self
            .quads
            .resized(new_capacity)
            .map_err(|_| BatchError::ResourceExhausted { requested: new_capacity })?;
        let indices = build_indices(new_capacity)?;

        log::debug!(
            "resizing quad buffer capacity from {} to {} ({} quads live)",
            self.capacity(),
            new_capacity,
            quads.len()
        );

        self.quads = quads;
        self.indices = indices;
        self.mark_dirty(0..self.quads.len());
        Ok(())
    }

    /// Draw every live quad
    pub fn draw_quads(&mut self, blend: BlendFunc, dispatch: &mut dyn DrawDispatch) -> RenderStats {
        self.draw_range(0, self.total_quads(), blend, dispatch)
    }

    /// Draw the first `amount` quads
    pub fn draw_number_of_quads(
        &mut self,
        amount: usize,
        blend: BlendFunc,
        dispatch: &mut dyn DrawDispatch,
    ) -> RenderStats {
        self.draw_range(0, amount, blend, dispatch)
    }

    /// Upload the dirty span (if any) and draw `amount` quads starting at `first`.
    ///
    /// Requires `first + amount <= count`. Drawing zero quads submits nothing.
    /// The GPU buffer is created on first use and recreated after a capacity
    /// change, in which case every live quad is uploaded.
    pub fn draw_range(
        &mut self,
        first: usize,
        amount: usize,
        blend: BlendFunc,
        dispatch: &mut dyn DrawDispatch,
    ) -> RenderStats {
        if amount == 0 {
            return RenderStats::default();
        }
        assert!(
            first + amount <= self.total_quads(),
            "draw_range: {}+{} past {} quads",
            first,
            amount,
            self.total_quads()
        );

        let buffer = self.ensure_gpu_buffer(dispatch);

        let span = self
            .dirty
            .take()
            .map(|span| span.start.min(self.total_quads())..span.end.min(self.total_quads()))
            .filter(|span| !span.is_empty());
        let upload = span.as_ref().map(|span| Upload {
            byte_offset: span.start * Quad::SIZE,
            bytes: bytemuck::cast_slice(&self.quads.as_slice()[span.clone()]),
        });
        let uploaded_bytes = upload.map_or(0, |upload| upload.bytes.len());

        dispatch.submit(&DrawCall {
            buffer,
            texture: self.texture.id(),
            blend,
            upload,
            first_index: first * 6,
            index_count: amount * 6,
        });

        RenderStats {
            draw_calls: 1,
            quads: amount,
            uploaded_bytes,
        }
    }

    /// Free the GPU buffer. The next draw creates a new one and uploads everything.
    pub fn release(&mut self, dispatch: &mut dyn DrawDispatch) {
        if let Some(gpu) = self.gpu.take() {
            dispatch.release_buffer(gpu.id);
            self.mark_dirty(0..self.total_quads());
        }
    }

    fn ensure_gpu_buffer(&mut self, dispatch: &mut dyn DrawDispatch) -> BufferId {
        match self.gpu {
            Some(gpu) if gpu.capacity == self.capacity() => gpu.id,
            stale => {
                if let Some(gpu) = stale {
                    dispatch.release_buffer(gpu.id);
                }
                let id = dispatch.allocate_buffer(self.capacity() * Quad::SIZE, &self.indices);
                self.gpu = Some(GpuBuffer {
                    id,
                    capacity: self.capacity(),
                });
                self.mark_dirty(0..self.total_quads());
                id
            }
        }
    }

    fn mark_dirty(&mut self, span: Range<usize>) {
        self.dirty = Some(match self.dirty.take() {
            Some(current) if !current.is_empty() => {
                current.start.min(span.start)..current.end.max(span.end)
            }
            _ => span,
        });
    }
}

impl fmt::Display for QuadBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<QuadBuffer | total quads = {}>", self.total_quads())
    }
}

fn check_capacity(capacity: usize) -> BatchResult<()> {
    if capacity > MAX_QUADS {
        return Err(BatchError::CapacityLimit {
            requested: capacity,
            max: MAX_QUADS,
        });
    }
    Ok(())
}

fn build_indices(capacity: usize) -> BatchResult<Vec<u16>> {
    let mut indices = Vec::new();
    indices
        .try_reserve_exact(capacity * 6)
        .map_err(|_| BatchError::ResourceExhausted { requested: capacity })?;
    for slot in 0..capacity {
        indices.extend_from_slice(&quad_indices(slot));
    }
    Ok(indices)
}
