//! Long mixed operation sequences checked against the batch invariants

use super::*;
use crate::render::dispatch::RecordingDispatch;

/// Small deterministic generator so failures reproduce
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }

    fn z(&mut self) -> i32 {
        self.below(7) as i32 - 3
    }
}

fn run_sequence(seed: u64, steps: usize) {
    let mut rng = Lcg(seed);
    let mut batch = SpriteBatchNode::with_texture(atlas(), 2).unwrap();
    let mut dispatch = RecordingDispatch::new();
    let mut next_tag: u8 = 1;

    for _ in 0..steps {
        let live: Vec<NodeId> = batch.descendants().to_vec();
        let pick = |rng: &mut Lcg| live[rng.below(live.len())];

        match rng.below(6) {
            0 | 1 => {
                let subtree = node(next_tag, rng.z());
                next_tag = next_tag.wrapping_add(1).max(1);
                if live.is_empty() || rng.below(2) == 0 {
                    batch.add_child(subtree).unwrap();
                } else {
                    let parent = pick(&mut rng);
                    batch.add_child_to(parent, subtree).unwrap();
                }
            }
            2 => {
                let subtree = node(next_tag, rng.z()).with_child(node(next_tag, rng.z()));
                next_tag = next_tag.wrapping_add(1).max(1);
                batch.append_child(subtree).unwrap();
            }
            3 if !live.is_empty() => {
                let id = pick(&mut rng);
                let cleanup = rng.below(2) == 0;
                let detached = batch.remove_child(id, cleanup).unwrap();
                assert_eq!(detached.is_none(), cleanup);
            }
            4 if !live.is_empty() => {
                let id = pick(&mut rng);
                let z = rng.z();
                batch.reorder_child(id, z).unwrap();
            }
            _ => {
                batch.draw(&mut dispatch);
                assert_draw_ordered(&batch);
            }
        }

        assert_slots_consistent(&batch);
        if !batch.is_reorder_pending() {
            assert_draw_ordered(&batch);
        }
    }

    batch.sort_all_children();
    assert_draw_ordered(&batch);
    assert_slots_consistent(&batch);
}

#[test]
fn test_random_operations_keep_invariants() {
    for seed in [1, 7, 42, 2024] {
        run_sequence(seed, 400);
    }
}

#[test]
fn test_gpu_mirror_matches_after_random_operations() {
    let mut rng = Lcg(99);
    let mut batch = SpriteBatchNode::with_texture(atlas(), 1).unwrap();
    let mut dispatch = RecordingDispatch::new();

    for step in 0..200u32 {
        let tag = (step % 250) as u8 + 1;
        batch.add_child(node(tag, rng.z())).unwrap();
        if step % 3 == 0 {
            let victim = batch.descendants()[rng.below(batch.descendants().len())];
            batch.remove_child(victim, true).unwrap();
        }
        if step % 5 == 0 {
            batch.draw(&mut dispatch);
        }
    }
    batch.draw(&mut dispatch);

    let buffer = dispatch.draws().last().unwrap().buffer;
    let mirror = dispatch.buffer_contents(buffer).unwrap();
    let live: &[u8] = bytemuck::cast_slice(batch.quad_buffer().quads());
    assert_eq!(&mirror[..live.len()], live);
}
