//! Specialized collection types
//!
//! [`DenseArray`] is the ordered dense arena shared by the quad storage and the
//! descendants table of a batch: a fixed-capacity backing store whose live
//! prefix is kept contiguous under insert, remove and range moves.

use std::collections::TryReserveError;

pub use slotmap::{new_key_type, SlotMap};

/// Fixed-capacity array with a contiguous live prefix `[0, len)`.
///
/// Slots in `[len, capacity)` are allocated and hold whatever was last written
/// there (or `T::default()` after growth). They are never observed through
/// [`DenseArray::as_slice`] but can be written with [`DenseArray::set`], which
/// extends the live prefix.
///
/// Index arguments outside the documented ranges are contract violations and
/// panic.
#[derive(Debug, Clone)]
pub struct DenseArray<T> {
    slots: Vec<T>,
    len: usize,
}

impl<T: Copy + Default> DenseArray<T> {
    /// Create an empty array with `capacity` default-initialised slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![T::default(); capacity],
            len: 0,
        }
    }

    /// Create an empty array, reporting allocation failure instead of aborting
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize(capacity, T::default());
        Ok(Self { slots, len: 0 })
    }

    /// Number of allocated slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when there are no live slots
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live prefix
    pub fn as_slice(&self) -> &[T] {
        &self.slots[..self.len]
    }

    /// Mutable live prefix
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.slots[..self.len]
    }

    /// Every allocated slot, live or not
    pub fn raw(&self) -> &[T] {
        &self.slots
    }

    /// Live value at `slot`
    pub fn get(&self, slot: usize) -> Option<&T> {
        self.as_slice().get(slot)
    }

    /// Write `value` at `slot`, growing the live prefix to cover it.
    ///
    /// Requires `slot < capacity`.
    pub fn set(&mut self, slot: usize, value: T) {
        assert!(
            slot < self.capacity(),
            "set: slot {} out of capacity {}",
            slot,
            self.capacity()
        );
        self.slots[slot] = value;
        self.len = self.len.max(slot + 1);
    }

    /// Append one value. Requires `len < capacity`.
    pub fn push(&mut self, value: T) {
        self.insert(self.len, value);
    }

    /// Insert one value at `slot`, shifting `[slot, len)` right by one.
    ///
    /// Requires `slot <= len < capacity`. Appending moves nothing.
    pub fn insert(&mut self, slot: usize, value: T) {
        self.insert_slice(slot, &[value]);
    }

    /// Insert a run of values at `slot`, shifting the tail right by `values.len()`.
    ///
    /// Requires `slot <= len` and `len + values.len() <= capacity`.
    pub fn insert_slice(&mut self, slot: usize, values: &[T]) {
        let amount = values.len();
        assert!(slot <= self.len, "insert: slot {} past len {}", slot, self.len);
        assert!(
            self.len + amount <= self.capacity(),
            "insert: {} + {} exceeds capacity {}",
            self.len,
            amount,
            self.capacity()
        );
        if slot < self.len {
            self.slots.copy_within(slot..self.len, slot + amount);
        }
        self.slots[slot..slot + amount].copy_from_slice(values);
        self.len += amount;
    }

    /// Remove the value at `slot`, shifting the tail left by one
    pub fn remove(&mut self, slot: usize) -> T {
        assert!(slot < self.len, "remove: slot {} past len {}", slot, self.len);
        let value = self.slots[slot];
        self.remove_range(slot, 1);
        value
    }

    /// Remove `amount` values starting at `slot`, shifting the tail left.
    ///
    /// Requires `slot + amount <= len`.
    pub fn remove_range(&mut self, slot: usize, amount: usize) {
        assert!(
            slot + amount <= self.len,
            "remove_range: {}..{} past len {}",
            slot,
            slot + amount,
            self.len
        );
        if slot + amount < self.len {
            self.slots.copy_within(slot + amount..self.len, slot);
        }
        self.len -= amount;
    }

    /// Relocate the run `[old, old + amount)` so that it starts at `new`.
    ///
    /// The values between the two positions shift to close the gap. Both the
    /// source run and the destination run must lie inside the live prefix.
    pub fn move_range(&mut self, old: usize, amount: usize, new: usize) {
        assert!(
            old + amount <= self.len && new + amount <= self.len,
            "move_range: {}+{} -> {} outside len {}",
            old,
            amount,
            new,
            self.len
        );
        if old == new || amount == 0 {
            return;
        }
        if new < old {
            self.slots[new..old + amount].rotate_right(amount);
        } else {
            self.slots[old..new + amount].rotate_left(amount);
        }
    }

    /// Copy the tail `[from, len)` so it starts at `to`, leaving `len` untouched.
    ///
    /// Requires `to + (len - from) <= capacity`. Slots in between keep stale
    /// values until they are overwritten.
    pub fn move_tail(&mut self, from: usize, to: usize) {
        assert!(from <= self.len, "move_tail: {} past len {}", from, self.len);
        let amount = self.len - from;
        assert!(
            to + amount <= self.capacity(),
            "move_tail: {} + {} exceeds capacity {}",
            to,
            amount,
            self.capacity()
        );
        self.slots.copy_within(from..self.len, to);
    }

    /// Extend the live prefix over already-allocated slots
    pub fn grow_len(&mut self, amount: usize) {
        assert!(
            self.len + amount <= self.capacity(),
            "grow_len: {} + {} exceeds capacity {}",
            self.len,
            amount,
            self.capacity()
        );
        self.len += amount;
    }

    /// Exchange two live values
    pub fn swap(&mut self, a: usize, b: usize) {
        assert!(
            a < self.len && b < self.len,
            "swap: {} or {} past len {}",
            a,
            b,
            self.len
        );
        self.slots.swap(a, b);
    }

    /// Overwrite `amount` allocated slots starting at `slot` with `value`.
    ///
    /// Does not change `len`; the range is clamped to the capacity.
    pub fn fill(&mut self, slot: usize, amount: usize, value: T) {
        let end = (slot + amount).min(self.capacity());
        if slot < end {
            self.slots[slot..end].fill(value);
        }
    }

    /// Drop every live value (storage is kept)
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Build a copy of this array with a different capacity.
    ///
    /// Allocated slots up to the smaller capacity are preserved, new slots are
    /// default-initialised and `len` is clamped. `self` is untouched, so a
    /// failed allocation leaves the caller with the original storage.
    pub fn resized(&self, new_capacity: usize) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(new_capacity)?;
        let kept = self.capacity().min(new_capacity);
        slots.extend_from_slice(&self.slots[..kept]);
        slots.resize(new_capacity, T::default());
        Ok(Self {
            slots,
            len: self.len.min(new_capacity),
        })
    }
}

impl<T: Copy + Default> Default for DenseArray<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
