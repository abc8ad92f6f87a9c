//! Class descriptors: the fixed-layout record that names a facet and carries
//! its teardown callbacks.

use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr};
use std::fmt;

use crate::ids::ClassId;
use crate::object::Object;

/// Teardown hook invoked with the handle the class is attached to.
pub type ClassCallback = unsafe extern "C" fn(object: *mut Object);

const RESERVED_WORDS: usize = 29;

/// Stable-layout description of a class.
///
/// The record is 256 bytes on 64-bit targets. The reserved tail must stay
/// zeroed so that later fields can be appended without changing the size.
///
/// - `free` releases the class's data pointer. It runs while lower classes are
///   still attached but must not dispatch virtually.
/// - `finalize` runs before any class is freed, with every class and method
///   still in place, so it may dispatch virtually.
#[repr(C)]
pub struct ClassDescriptor {
    name: *const c_char,
    free: Option<ClassCallback>,
    finalize: Option<ClassCallback>,
    reserved: [*const c_void; RESERVED_WORDS],
}

#[cfg(target_pointer_width = "64")]
const _: () = assert!(std::mem::size_of::<ClassDescriptor>() == 256);

// Descriptors are immutable statics; the raw pointers only name static data.
unsafe impl Sync for ClassDescriptor {}
unsafe impl Send for ClassDescriptor {}

impl ClassDescriptor {
    pub const fn new(
        name: &'static CStr,
        free: Option<ClassCallback>,
        finalize: Option<ClassCallback>,
    ) -> Self {
        Self {
            name: name.as_ptr(),
            free,
            finalize,
            reserved: [std::ptr::null(); RESERVED_WORDS],
        }
    }

    pub fn id(&'static self) -> ClassId {
        ClassId::of(self)
    }

    /// Class name for diagnostics. Null names render as `<anonymous>`.
    pub fn name(&self) -> Cow<'_, str> {
        if self.name.is_null() {
            return Cow::Borrowed("<anonymous>");
        }
        // SAFETY: non-null names point at a static NUL-terminated string.
        unsafe { CStr::from_ptr(self.name) }.to_string_lossy()
    }

    pub fn free_callback(&self) -> Option<ClassCallback> {
        self.free
    }

    pub fn finalize_callback(&self) -> Option<ClassCallback> {
        self.finalize
    }

    pub(crate) fn reserved_is_zeroed(&self) -> bool {
        self.reserved.iter().all(|word| word.is_null())
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name())
            .field("free", &self.free.is_some())
            .field("finalize", &self.finalize.is_some())
            .finish()
    }
}
