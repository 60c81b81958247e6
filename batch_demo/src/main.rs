//! Batch demo
//!
//! Headless walk-through of the batching core: a sprite batch and a particle
//! batch are churned for a few frames (adds, z-reorders, removals, movement)
//! and drawn through a dispatcher that logs every GPU request.
//!
//! Usage: `batch_demo [config.toml|config.ron]`

use std::rc::Rc;

use batch_engine::foundation::logging;
use batch_engine::prelude::*;
use batch_engine::render::{BufferId, DrawCall};
use rand::prelude::*;

const FRAMES: usize = 12;
const FRAME_TIME: f32 = 1.0 / 60.0;

/// Demo failures
#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("batch error: {0}")]
    Batch(#[from] BatchError),
}

/// Dispatcher that logs each request and forwards it to a recorder
struct LoggingDispatch {
    inner: RecordingDispatch,
    name: &'static str,
}

impl LoggingDispatch {
    fn new(name: &'static str) -> Self {
        Self {
            inner: RecordingDispatch::new(),
            name,
        }
    }
}

impl DrawDispatch for LoggingDispatch {
    fn allocate_buffer(&mut self, vertex_bytes: usize, indices: &[u16]) -> BufferId {
        let buffer = self.inner.allocate_buffer(vertex_bytes, indices);
        log::debug!(
            "[{}] allocate {:?}: {} vertex bytes, {} indices",
            self.name,
            buffer,
            vertex_bytes,
            indices.len()
        );
        buffer
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        log::debug!("[{}] release {:?}", self.name, buffer);
        self.inner.release_buffer(buffer);
    }

    fn submit(&mut self, call: &DrawCall<'_>) {
        match call.upload {
            Some(upload) => log::debug!(
                "[{}] upload {} bytes at {} then draw {} indices from {}",
                self.name,
                upload.bytes.len(),
                upload.byte_offset,
                call.index_count,
                call.first_index
            ),
            None => log::debug!(
                "[{}] draw {} indices from {}",
                self.name,
                call.index_count,
                call.first_index
            ),
        }
        self.inner.submit(call);
    }
}

fn load_config() -> Result<BatchConfig, DemoError> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading batch configuration from {}", path);
            BatchConfig::load_from_file(&path)?
        }
        None => BatchConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn random_sprite(rng: &mut StdRng) -> Sprite {
    let cell = rng.gen_range(0..16) as f32 * 16.0;
    let mut sprite = Sprite::with_rect(Rect::new(cell, 0.0, 16.0, 16.0));
    sprite.set_position(rng.gen_range(0.0..320.0), rng.gen_range(0.0..240.0));
    sprite.set_rotation(rng.gen_range(0.0..360.0));
    sprite.set_flipped_x(rng.gen_bool(0.5));
    sprite
}

fn churn_sprites(batch: &mut SpriteBatchNode, rng: &mut StdRng) -> Result<(), DemoError> {
    for _ in 0..rng.gen_range(1..4) {
        let z_order = rng.gen_range(-3..4);
        let parent = batch.descendants().choose(rng).copied();
        let subtree = Subtree::new(random_sprite(rng)).with_z_order(z_order);
        match parent {
            Some(parent) if rng.gen_bool(0.3) => batch.add_child_to(parent, subtree)?,
            _ => batch.append_child(subtree)?,
        };
    }

    if let Some(id) = batch.descendants().choose(rng).copied() {
        batch.reorder_child(id, rng.gen_range(-3..4))?;
    }

    if batch.len() > 8 && rng.gen_bool(0.5) {
        if let Some(id) = batch.children().choose(rng).copied() {
            batch.remove_child(id, true)?;
        }
    }

    for index in 0..batch.children().len() {
        let id = batch.children()[index];
        if let Some(sprite) = batch.item_mut(id) {
            let position = sprite.position();
            sprite.set_position(position.x + 1.0, position.y);
        }
    }
    Ok(())
}

fn emit_particles(system: &mut ParticleSystem, rng: &mut StdRng) {
    while !system.is_full() && rng.gen_bool(0.7) {
        let velocity = Vec2::new(rng.gen_range(-20.0..20.0), rng.gen_range(10.0..60.0));
        let mut particle = Particle::new(Vec2::zeros(), velocity, rng.gen_range(0.05..0.3));
        particle.size = rng.gen_range(2.0..6.0);
        particle.color_delta = [0.0, 0.0, 0.0, -2.0];
        system.emit(particle);
    }
}

fn run() -> Result<(), DemoError> {
    let config = load_config()?;
    let mut rng = StdRng::seed_from_u64(7);

    let atlas = Texture::shared(TextureId(1), 256, 256, true);
    let sparks = Texture::shared(TextureId(2), 32, 32, false);

    let mut sprites = SpriteBatchNode::with_config(Rc::clone(&atlas), 0, &config)?;
    let mut particles = ParticleBatchNode::with_config(Rc::clone(&sparks), 0, &config)?;
    log::info!(
        "Created sprite batch ({}) and particle batch ({})",
        sprites.quad_buffer(),
        particles.quad_buffer()
    );

    for (index, z_order) in [0, 2, -1].into_iter().enumerate() {
        let mut system = ParticleSystem::with_texture(Rc::clone(&sparks), 40 + index * 20);
        system.set_position(80.0 * (index + 1) as f32, 20.0);
        system.set_gravity(0.0, -30.0);
        particles.add_child(system, z_order, index as i32)?;
    }

    let mut sprite_dispatch = LoggingDispatch::new("sprites");
    let mut particle_dispatch = LoggingDispatch::new("particles");
    let mut total = RenderStats::default();

    for frame in 0..FRAMES {
        churn_sprites(&mut sprites, &mut rng)?;

        for index in 0..particles.children().len() {
            let id = particles.children()[index];
            if let Some(system) = particles.system_mut(id) {
                emit_particles(system, &mut rng);
            }
        }
        if frame == FRAMES / 2 {
            if let Some(&front) = particles.children().first() {
                particles.reorder_child(front, 5)?;
            }
        }
        particles.update(FRAME_TIME);

        let mut stats = sprites.draw(&mut sprite_dispatch);
        stats.accumulate(particles.draw(&mut particle_dispatch));
        total.accumulate(stats);

        log::info!(
            "frame {:2}: {} sprites, {} particle quads, {} draw calls, {} bytes uploaded",
            frame,
            sprites.len(),
            particles.quad_buffer().total_quads(),
            stats.draw_calls,
            stats.uploaded_bytes
        );
    }

    sprites.release(&mut sprite_dispatch);
    particles.release(&mut particle_dispatch);

    log::info!(
        "Done: {} draw calls, {} quads, {} bytes uploaded over {} frames ({} recorded sprite draws)",
        total.draw_calls,
        total.quads,
        total.uploaded_bytes,
        FRAMES,
        sprite_dispatch.inner.draw_count()
    );
    Ok(())
}

fn main() {
    logging::init_with_default("info");
    log::info!("Starting batch demo");

    if let Err(error) = run() {
        log::error!("{}", error);
        std::process::exit(1);
    }
}
