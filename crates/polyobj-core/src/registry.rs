//! Per-handle class list.
//!
//! Classes are kept in attachment order (most recently attached last) next to
//! a [`SlotMap`] from class id to data pointer. Each slot also remembers the
//! method overrides pushed while it was the top class, so detaching or tearing
//! it down can revert exactly those overrides.

use std::ffi::c_void;

use smallvec::SmallVec;

use crate::class::ClassDescriptor;
use crate::ids::{ClassId, DispatcherId, MethodId};
use crate::slot_map::SlotMap;

/// One method override recorded by the class that introduced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Override {
    pub dispatcher: DispatcherId,
    pub method: MethodId,
}

pub(crate) type OverrideList = SmallVec<[Override; 4]>;

/// A class attached to a handle.
#[derive(Debug)]
pub struct ClassSlot {
    pub descriptor: &'static ClassDescriptor,
    /// Overrides in push order.
    pub overrides: OverrideList,
}

impl ClassSlot {
    pub fn id(&self) -> ClassId {
        self.descriptor.id()
    }
}

#[derive(Copy, Clone, Debug)]
struct DataPtr(*mut c_void);

impl Default for DataPtr {
    fn default() -> Self {
        Self(std::ptr::null_mut())
    }
}

#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<ClassSlot>,
    data: SlotMap<ClassId, DataPtr>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Appends a class with its data. Returns `false` and leaves everything
    /// untouched if the class is already attached.
    pub fn attach(&mut self, descriptor: &'static ClassDescriptor, data: *mut c_void) -> bool {
        let id = descriptor.id();
        if self.data.contains_key(id) {
            return false;
        }
        debug_assert!(
            descriptor.reserved_is_zeroed(),
            "class {} has non-zero reserved fields",
            descriptor.name()
        );
        self.data.insert(id, DataPtr(data));
        self.classes.push(ClassSlot {
            descriptor,
            overrides: OverrideList::new(),
        });
        true
    }

    pub fn contains(&self, class: ClassId) -> bool {
        self.data.contains_key(class)
    }

    pub fn data_of(&self, class: ClassId) -> Option<*mut c_void> {
        self.data.get(class).map(|data| data.0)
    }

    /// Position of `class` counted from the bottom, scanning from the top.
    pub fn position(&self, class: ClassId) -> Option<usize> {
        if !self.contains(class) {
            return None;
        }
        self.classes.iter().rposition(|slot| slot.id() == class)
    }

    pub fn top(&self) -> Option<&ClassSlot> {
        self.classes.last()
    }

    /// Records an override against the top class. Returns `false` when no
    /// class is attached to own it.
    pub fn record_override(&mut self, entry: Override) -> bool {
        match self.classes.last_mut() {
            Some(slot) => {
                slot.overrides.push(entry);
                true
            }
            None => false,
        }
    }

    /// Drops the record of `entry` from whichever class holds it.
    pub fn forget_override(&mut self, entry: Override) {
        for slot in self.classes.iter_mut().rev() {
            if let Some(index) = slot.overrides.iter().rposition(|o| *o == entry) {
                slot.overrides.remove(index);
                return;
            }
        }
    }

    /// Detaches `class` and erases its data entry, returning its slot.
    pub fn take(&mut self, class: ClassId) -> Option<ClassSlot> {
        let index = self.position(class)?;
        self.data.remove(class);
        Some(self.classes.remove(index))
    }

    /// Descriptors from the most recently attached down to the first.
    pub fn descriptors_top_down(&self) -> SmallVec<[&'static ClassDescriptor; 8]> {
        self.classes.iter().rev().map(|slot| slot.descriptor).collect()
    }

    /// Iterates classes in attachment order with their data pointers.
    pub fn iter(&self) -> impl Iterator<Item = (&'static ClassDescriptor, *mut c_void)> + '_ {
        self.classes.iter().map(|slot| {
            let data = self.data_of(slot.id()).unwrap_or(std::ptr::null_mut());
            (slot.descriptor, data)
        })
    }

    pub fn ids(&self) -> Vec<ClassId> {
        self.classes.iter().map(ClassSlot::id).collect()
    }

    pub fn clear(&mut self) {
        self.classes.clear();
        self.data.clear();
    }
}
