//! Particle batches
//!
//! A [`ParticleBatchNode`] draws many [`ParticleSystem`]s sharing one texture
//! and blend function in a single call. Unlike sprite batches each child owns
//! a contiguous run of quads, one per particle slot:
//!
//! ```text
//! quads: [ system A: total_particles(A) ][ system B ... ][ system C ... ]
//!          ^ atlas_index(A)               ^ atlas_index(B)
//! ```
//!
//! Runs are kept in z-order eagerly, so there is no reindex pass.

use crate::config::BatchConfig;
use crate::foundation::collections::SlotMap;
use crate::foundation::math::{transform_point, Rect, Transform2D, Vec2};
use crate::render::dispatch::{DrawDispatch, RenderStats};
use crate::render::quad::{BlendFunc, Color4B, Quad, QuadVertex, Tex2F, Vertex3F};
use crate::render::quad_buffer::QuadBuffer;
use crate::render::texture::{Texture, TextureHandle, TextureId};
use crate::render::{BatchError, BatchResult};
use crate::scene::{search_new_position_for_z, AtlasSlot, DrawOrder, NodeId};

/// One live particle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    /// Position relative to the system
    pub position: Vec2,
    /// Units per second
    pub velocity: Vec2,
    /// Edge length of the particle quad
    pub size: f32,
    /// Clockwise rotation in degrees
    pub rotation: f32,
    /// RGBA in `[0, 1]`
    pub color: [f32; 4],
    /// Colour change per second
    pub color_delta: [f32; 4],
    /// Seconds left
    pub time_to_live: f32,
}

impl Particle {
    /// White particle of size 1
    pub fn new(position: Vec2, velocity: Vec2, time_to_live: f32) -> Self {
        Self {
            position,
            velocity,
            size: 1.0,
            rotation: 0.0,
            color: [1.0; 4],
            color_delta: [0.0; 4],
            time_to_live,
        }
    }

    fn color_bytes(&self) -> Color4B {
        let byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Color4B::new(
            byte(self.color[0]),
            byte(self.color[1]),
            byte(self.color[2]),
            byte(self.color[3]),
        )
    }
}

/// A fixed pool of particles drawn as quads
#[derive(Debug, Clone)]
pub struct ParticleSystem {
    texture: Option<TextureHandle>,
    texture_rect: Option<Rect>,
    blend: BlendFunc,
    total_particles: usize,
    particles: Vec<Particle>,
    gravity: Vec2,
    position: Vec2,
}

impl ParticleSystem {
    /// System with room for `total_particles`, sampling its batch's texture
    pub fn new(total_particles: usize) -> Self {
        Self {
            texture: None,
            texture_rect: None,
            blend: BlendFunc::default(),
            total_particles,
            particles: Vec::with_capacity(total_particles),
            gravity: Vec2::zeros(),
            position: Vec2::zeros(),
        }
    }

    /// System bound to `texture`; the blend function follows its alpha mode
    pub fn with_texture(texture: TextureHandle, total_particles: usize) -> Self {
        let mut system = Self::new(total_particles);
        system.set_texture(texture);
        system
    }

    /// Texture the system was created for
    pub fn texture_id(&self) -> Option<TextureId> {
        self.texture.as_ref().map(|texture| texture.id())
    }

    /// Switch texture. Resets the blend function to the texture's default.
    pub fn set_texture(&mut self, texture: TextureHandle) {
        self.blend = BlendFunc::for_texture(texture.has_premultiplied_alpha());
        self.texture = Some(texture);
    }

    /// Sample `rect` (pixels) instead of the whole texture
    pub fn set_texture_rect(&mut self, rect: Rect) {
        self.texture_rect = Some(rect);
    }

    /// Blend function
    pub fn blend_func(&self) -> BlendFunc {
        self.blend
    }

    /// Set the blend function
    pub fn set_blend_func(&mut self, blend: BlendFunc) {
        self.blend = blend;
    }

    /// Acceleration applied to every particle
    pub fn set_gravity(&mut self, x: f32, y: f32) {
        self.gravity = Vec2::new(x, y);
    }

    /// Origin of the system in batch space
    pub fn set_position(&mut self, x: f32, y: f32) {
        self.position = Vec2::new(x, y);
    }

    /// Number of quad slots the system occupies
    pub fn total_particles(&self) -> usize {
        self.total_particles
    }

    /// Live particles
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Number of live particles
    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// True when every slot holds a live particle
    pub fn is_full(&self) -> bool {
        self.particles.len() >= self.total_particles
    }

    /// Spawn a particle. Returns false when the pool is full.
    pub fn emit(&mut self, particle: Particle) -> bool {
        if self.is_full() {
            return false;
        }
        self.particles.push(particle);
        true
    }

    /// Advance every particle by `dt` seconds and drop expired ones
    pub fn update(&mut self, dt: f32) {
        let gravity = self.gravity;
        let mut index = 0;
        while index < self.particles.len() {
            let particle = &mut self.particles[index];
            particle.time_to_live -= dt;
            if particle.time_to_live > 0.0 {
                particle.velocity += gravity * dt;
                particle.position += particle.velocity * dt;
                for (channel, delta) in particle.color.iter_mut().zip(particle.color_delta) {
                    *channel = (*channel + delta * dt).clamp(0.0, 1.0);
                }
                index += 1;
            } else {
                self.particles.swap_remove(index);
            }
        }
    }

    /// Fill `quads` with one quad per live particle and empty quads after that
    pub fn write_quads(&self, quads: &mut [Quad], texture: &Texture) {
        let rect = self.texture_rect.unwrap_or_else(|| {
            Rect::new(0.0, 0.0, texture.width() as f32, texture.height() as f32)
        });
        let (left, top) = texture.normalize(rect.x, rect.y);
        let (right, bottom) = texture.normalize(rect.x + rect.width, rect.y + rect.height);
        let premultiplied = texture.has_premultiplied_alpha();

        for (index, quad) in quads.iter_mut().enumerate() {
            let Some(particle) = self.particles.get(index) else {
                *quad = Quad::EMPTY;
                continue;
            };

            let transform = Transform2D {
                position: self.position + particle.position,
                rotation: particle.rotation,
                ..Transform2D::default()
            };
            let matrix = transform.to_matrix(Vec2::zeros());
            let half = particle.size / 2.0;
            let mut color = particle.color_bytes();
            if premultiplied {
                color = color.premultiplied();
            }
            let vertex = |x, y, u, v| {
                let p = transform_point(&matrix, x, y);
                QuadVertex {
                    position: Vertex3F::new(p.x, p.y, 0.0),
                    color,
                    tex_coords: Tex2F::new(u, v),
                }
            };

            *quad = Quad {
                tl: vertex(-half, half, left, top),
                bl: vertex(-half, -half, left, bottom),
                tr: vertex(half, half, right, top),
                br: vertex(half, -half, right, bottom),
            };
        }
    }
}

#[derive(Debug)]
struct SystemEntry {
    system: ParticleSystem,
    order: DrawOrder,
    tag: i32,
    atlas_index: usize,
}

/// Particle systems sharing one quad buffer
#[derive(Debug)]
pub struct ParticleBatchNode {
    systems: SlotMap<NodeId, SystemEntry>,
    children: Vec<NodeId>,
    buffer: QuadBuffer,
    blend: BlendFunc,
    blend_overridden: bool,
    next_arrival: u64,
    scratch: Vec<Quad>,
}

impl ParticleBatchNode {
    /// Create a batch for `texture` with room for `capacity` quads (0 picks the default)
    pub fn with_texture(texture: TextureHandle, capacity: usize) -> BatchResult<Self> {
        Self::with_config(texture, capacity, &BatchConfig::default())
    }

    /// Create a batch using the defaults of `config`
    pub fn with_config(
        texture: TextureHandle,
        capacity: usize,
        config: &BatchConfig,
    ) -> BatchResult<Self> {
        config.validate()?;
        let capacity = config.particle_capacity_or_default(capacity);
        let blend = BlendFunc::for_texture(texture.has_premultiplied_alpha());
        let buffer = QuadBuffer::with_capacity(texture, capacity)?;
        log::debug!(
            "created particle batch for texture {} with capacity {}",
            buffer.texture().id(),
            capacity
        );

        Ok(Self {
            systems: SlotMap::with_key(),
            children: Vec::new(),
            buffer,
            blend,
            blend_overridden: false,
            next_arrival: 0,
            scratch: Vec::new(),
        })
    }

    /// Add a system, opening a run of `total_particles` quads at its z-order position.
    ///
    /// The first system sets the batch blend function; later ones must match it.
    pub fn add_child(
        &mut self,
        system: ParticleSystem,
        z_order: i32,
        tag: i32,
    ) -> BatchResult<NodeId> {
        let expected = self.buffer.texture().id();
        if let Some(found) = system.texture_id() {
            if found != expected {
                log::warn!("rejected particle system with texture {} in batch of {}", found, expected);
                return Err(BatchError::TextureMismatch { expected, found });
            }
        }
        let blend = if self.children.is_empty() {
            system.blend_func()
        } else {
            self.blend
        };
        if system.blend_func() != blend {
            return Err(BatchError::BlendMismatch {
                expected: blend,
                found: system.blend_func(),
            });
        }

        let total = system.total_particles();
        let count = self.buffer.total_quads();
        let needed = count + total;
        if needed > self.buffer.capacity() {
            self.buffer.resize_capacity(needed)?;
            let capacity = self.buffer.capacity();
            self.buffer.fill_with_empty_quads_from_index(capacity - total, total);
            log::debug!("particle batch capacity grown to {}", capacity);
        }
        self.blend = blend;

        let position = search_new_position_for_z(&self.children, z_order, |sibling| {
            self.systems[*sibling].order.z_order
        });
        let atlas_index = match position.checked_sub(1) {
            Some(prev) => {
                let prev = &self.systems[self.children[prev]];
                prev.atlas_index + prev.system.total_particles()
            }
            None => 0,
        };

        if atlas_index < count {
            self.buffer.move_tail(atlas_index, atlas_index + total);
        }
        self.buffer.fill_with_empty_quads_from_index(atlas_index, total);
        self.buffer.increase_total_quads_with(total);

        let order = self.next_order(z_order);
        let id = self.systems.insert(SystemEntry {
            system,
            order,
            tag,
            atlas_index,
        });
        self.children.insert(position, id);
        self.update_all_atlas_indexes();
        Ok(id)
    }

    /// Remove a system and close the gap its run leaves.
    ///
    /// Returns the system for reuse, or `None` when `cleanup` is set.
    pub fn remove_child(&mut self, id: NodeId, cleanup: bool) -> BatchResult<Option<ParticleSystem>> {
        let entry = self.systems.remove(id).ok_or(BatchError::UnknownNode(id))?;
        self.children.retain(|child| *child != id);

        let total = entry.system.total_particles();
        self.buffer.remove_quads_at_index(entry.atlas_index, total);
        let count = self.buffer.total_quads();
        self.buffer.fill_with_empty_quads_from_index(count, total);
        self.update_all_atlas_indexes();

        Ok(if cleanup { None } else { Some(entry.system) })
    }

    /// Remove the `index`-th system in draw order
    pub fn remove_child_at_index(
        &mut self,
        index: usize,
        cleanup: bool,
    ) -> BatchResult<Option<ParticleSystem>> {
        let id = *self.children.get(index).ok_or(BatchError::IndexOutOfRange {
            index,
            len: self.children.len(),
        })?;
        self.remove_child(id, cleanup)
    }

    /// Remove every system. Returns them in draw order unless `cleanup` is set.
    pub fn remove_all_children(&mut self, cleanup: bool) -> Vec<ParticleSystem> {
        let systems: Vec<_> = std::mem::take(&mut self.children)
            .into_iter()
            .filter_map(|id| self.systems.remove(id))
            .map(|entry| entry.system)
            .collect();
        self.buffer.remove_all_quads();

        if cleanup {
            Vec::new()
        } else {
            systems
        }
    }

    /// Move a system to z-order `z_order`, relocating its run immediately.
    ///
    /// The system goes behind siblings already at the new z-order.
    pub fn reorder_child(&mut self, id: NodeId, z_order: i32) -> BatchResult<()> {
        let entry = self.systems.get(id).ok_or(BatchError::UnknownNode(id))?;
        if entry.order.z_order == z_order {
            return Ok(());
        }

        if self.children.len() > 1 {
            let (old_index, new_index) = self.current_index(id, z_order);
            if old_index != new_index {
                let old_atlas = entry.atlas_index;
                let total = entry.system.total_particles();
                self.children.remove(old_index);
                self.children.insert(new_index, id);
                self.update_all_atlas_indexes();
                let new_atlas = self.systems[id].atlas_index;
                self.buffer.move_quads_from_index(old_atlas, total, new_atlas);
            }
        }

        let order = self.next_order(z_order);
        self.systems[id].order = order;
        Ok(())
    }

    /// Old and new positions of `id` in the children list for z-order `z_order`
    fn current_index(&self, id: NodeId, z_order: i32) -> (usize, usize) {
        let mut old_index = None;
        let mut new_index = None;
        let mut behind_self = false;

        for (index, child) in self.children.iter().enumerate() {
            if new_index.is_none() && self.systems[*child].order.z_order > z_order {
                new_index = Some(index);
            }
            if *child == id {
                old_index = Some(index);
                behind_self = new_index.is_none();
            }
            if old_index.is_some() && new_index.is_some() {
                break;
            }
        }

        let new_index = new_index.unwrap_or(self.children.len());
        // the list shrinks by one once the node is taken out in front of its target
        let new_index = if behind_self { new_index - 1 } else { new_index };
        (old_index.unwrap_or(0), new_index)
    }

    fn update_all_atlas_indexes(&mut self) {
        let mut index = 0;
        for child in &self.children {
            let entry = &mut self.systems[*child];
            entry.atlas_index = index;
            index += entry.system.total_particles();
        }
    }

    /// Collapse the quad in `slot` so it draws nothing until rewritten
    pub fn disable_particle(&mut self, slot: usize) {
        if let Some(quad) = self.buffer.quad(slot) {
            let mut quad = *quad;
            quad.collapse();
            self.buffer.update_quad(&quad, slot);
        }
    }

    /// Simulate every system by `dt` seconds and write its run of quads
    pub fn update(&mut self, dt: f32) {
        for index in 0..self.children.len() {
            let id = self.children[index];
            let entry = &mut self.systems[id];
            entry.system.update(dt);

            let total = entry.system.total_particles();
            self.scratch.clear();
            self.scratch.resize(total, Quad::EMPTY);
            entry.system.write_quads(&mut self.scratch, self.buffer.texture());
            for (offset, quad) in self.scratch.iter().enumerate() {
                self.buffer.update_quad(quad, entry.atlas_index + offset);
            }
        }
    }

    /// Draw every run in one call
    pub fn draw(&mut self, dispatch: &mut dyn DrawDispatch) -> RenderStats {
        if self.buffer.is_empty() {
            return RenderStats::default();
        }
        self.buffer.draw_quads(self.blend, dispatch)
    }

    /// Free the GPU buffer
    pub fn release(&mut self, dispatch: &mut dyn DrawDispatch) {
        self.buffer.release(dispatch);
    }

    // ---- accessors ----

    /// System behind `id`
    pub fn system(&self, id: NodeId) -> Option<&ParticleSystem> {
        self.systems.get(id).map(|entry| &entry.system)
    }

    /// Mutable system behind `id`.
    ///
    /// Its total particle count is fixed while it is batched.
    pub fn system_mut(&mut self, id: NodeId) -> Option<&mut ParticleSystem> {
        self.systems.get_mut(id).map(|entry| &mut entry.system)
    }

    /// First slot of `id`'s run
    pub fn atlas_index(&self, id: NodeId) -> Option<AtlasSlot> {
        self.systems.get(id).map(|entry| AtlasSlot::new(entry.atlas_index))
    }

    /// Z-order of `id`
    pub fn z_order(&self, id: NodeId) -> Option<i32> {
        self.systems.get(id).map(|entry| entry.order.z_order)
    }

    /// Tag of `id`
    pub fn tag(&self, id: NodeId) -> Option<i32> {
        self.systems.get(id).map(|entry| entry.tag)
    }

    /// First system carrying `tag`
    pub fn child_by_tag(&self, tag: i32) -> Option<NodeId> {
        self.children
            .iter()
            .copied()
            .find(|id| self.systems[*id].tag == tag)
    }

    /// Systems in draw order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Number of systems
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// True when no system is batched
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Shared texture
    pub fn texture(&self) -> &TextureHandle {
        self.buffer.texture()
    }

    /// Switch texture for the whole batch
    pub fn set_texture(&mut self, texture: TextureHandle) {
        if !self.blend_overridden {
            self.blend = BlendFunc::for_texture(texture.has_premultiplied_alpha());
        }
        self.buffer.set_texture(texture);
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

    fn next_order(&mut self, z_order: i32) -> DrawOrder {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        DrawOrder { z_order, arrival }
    }
}
