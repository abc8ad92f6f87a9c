//! Open-addressing hash table for pointer-sized identities.
//!
//! `SlotMap` is the associative store behind every handle: class → data,
//! dispatcher → method and method → supermethod. It is deliberately small:
//!
//! - keys are non-zero `usize` identities (descriptor or function addresses),
//!   and a zero key marks an empty slot, so there is no separate occupancy bit
//! - linear probing from a multiplicative (golden ratio) hash
//! - the table doubles when the load factor would reach 50%, and never shrinks
//!   except through [`SlotMap::clear`]
//! - removal uses backward-shift deletion, so no tombstones are ever stored
//!
//! It is not a general purpose map; mutation is single-threaded and values
//! must be `Copy`.

use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroUsize;

/// Capacity of a fresh or cleared table. Always a power of two.
pub const INITIAL_CAPACITY: usize = 4;

/// 2^64 divided by the golden ratio.
const GOLDEN_RATIO_64: u64 = 0x9E37_79B9_7F4A_7C15;

/// A key that can be stored in a [`SlotMap`].
///
/// Implementors are thin wrappers around a non-zero machine word.
pub trait SlotKey: Copy {
    fn into_raw(self) -> NonZeroUsize;
    fn from_raw(raw: NonZeroUsize) -> Self;
}

impl SlotKey for NonZeroUsize {
    #[inline]
    fn into_raw(self) -> NonZeroUsize {
        self
    }

    #[inline]
    fn from_raw(raw: NonZeroUsize) -> Self {
        raw
    }
}

#[derive(Copy, Clone)]
struct Slot<V> {
    /// Zero means the slot is empty.
    key: usize,
    value: V,
}

impl<V: Default> Slot<V> {
    fn empty() -> Self {
        Self {
            key: 0,
            value: V::default(),
        }
    }
}

/// Open-addressing map from a non-zero word-sized key to a `Copy` value.
pub struct SlotMap<K, V> {
    slots: Box<[Slot<V>]>,
    len: usize,
    _key: PhantomData<K>,
}

#[inline]
fn home_slot(raw: usize, mask: usize) -> usize {
    ((raw as u64).wrapping_mul(GOLDEN_RATIO_64) as usize) & mask
}

impl<K: SlotKey, V: Copy + Default> SlotMap<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Self::empty_slots(INITIAL_CAPACITY),
            len: 0,
            _key: PhantomData,
        }
    }

    fn empty_slots(capacity: usize) -> Box<[Slot<V>]> {
        debug_assert!(capacity.is_power_of_two());
        vec![Slot::empty(); capacity].into_boxed_slice()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots in the table, always a power of two.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    #[inline]
    fn home(&self, raw: usize) -> usize {
        home_slot(raw, self.mask())
    }

    /// Index of the slot holding `raw`, if present.
    fn position(&self, raw: usize) -> Option<usize> {
        let mask = self.mask();
        let mut i = self.home(raw);
        loop {
            match self.slots[i].key {
                0 => return None,
                key if key == raw => return Some(i),
                _ => i = (i + 1) & mask,
            }
        }
    }

    /// Places an entry that is known to be absent. Caller guarantees a free slot.
    fn place(&mut self, raw: usize, value: V) {
        let mask = self.mask();
        let mut i = self.home(raw);
        while self.slots[i].key != 0 {
            i = (i + 1) & mask;
        }
        self.slots[i] = Slot { key: raw, value };
        self.len += 1;
    }

    fn grow(&mut self) {
        let new_capacity = self.capacity() * 2;
        let old = std::mem::replace(&mut self.slots, Self::empty_slots(new_capacity));
        self.len = 0;
        for slot in old.iter().filter(|slot| slot.key != 0) {
            self.place(slot.key, slot.value);
        }
    }

    /// Inserts `value` under `key`, overwriting any previous value.
    pub fn insert(&mut self, key: K, value: V) {
        let raw = key.into_raw().get();
        if let Some(i) = self.position(raw) {
            self.slots[i].value = value;
            return;
        }
        if self.len * 2 >= self.capacity() {
            self.grow();
        }
        self.place(raw, value);
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: K) -> Option<V> {
        self.position(key.into_raw().get())
            .map(|i| self.slots[i].value)
    }

    /// Returns a mutable reference to the value stored under `key`, so callers
    /// can update it in place.
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let i = self.position(key.into_raw().get())?;
        Some(&mut self.slots[i].value)
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.position(key.into_raw().get()).is_some()
    }

    /// Removes `key` and returns its value. Does nothing if the key is absent.
    ///
    /// Entries later in the same probe cluster whose home lies at or before the
    /// vacated slot are shifted back into it, keeping every probe sequence
    /// unbroken.
    pub fn remove(&mut self, key: K) -> Option<V> {
        let mask = self.mask();
        let mut gap = self.position(key.into_raw().get())?;
        let removed = self.slots[gap].value;
        self.len -= 1;

        let mut j = (gap + 1) & mask;
        while self.slots[j].key != 0 {
            let home = self.home(self.slots[j].key);
            // The gap lies cyclically between `home` and `j`: the entry may move.
            if gap.wrapping_sub(home) & mask < j.wrapping_sub(home) & mask {
                self.slots[gap] = self.slots[j];
                gap = j;
            }
            j = (j + 1) & mask;
        }
        self.slots[gap] = Slot::empty();
        Some(removed)
    }

    /// Drops every entry and returns to the initial capacity.
    pub fn clear(&mut self) {
        if self.capacity() == INITIAL_CAPACITY {
            self.slots.fill(Slot::empty());
        } else {
            self.slots = Self::empty_slots(INITIAL_CAPACITY);
        }
        self.len = 0;
    }

    /// Iterates live entries in table order (not insertion order).
    pub fn iter(&self) -> impl Iterator<Item = (K, V)> + '_ {
        self.slots.iter().filter_map(|slot| {
            NonZeroUsize::new(slot.key).map(|raw| (K::from_raw(raw), slot.value))
        })
    }
}

impl<K: SlotKey, V: Copy + Default> Default for SlotMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for SlotMap<K, V>
where
    K: SlotKey + fmt::Debug,
    V: Copy + Default + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
