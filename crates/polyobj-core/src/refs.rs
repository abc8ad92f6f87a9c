use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::object::Object;

/// Owns one strong reference to an [`Object`].
///
/// Cloning obtains another strong reference; dropping releases it. The last
/// drop tears the object down.
pub struct ObjectRef {
    ptr: NonNull<Object>,
}

// SAFETY: `Object` is `Send + Sync` and its counts are atomic.
unsafe impl Send for ObjectRef {}
unsafe impl Sync for ObjectRef {}

impl ObjectRef {
    /// Takes ownership of a strong reference the caller already holds.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live object and the caller must own one strong
    /// reference to it, which moves into the returned value.
    pub(crate) unsafe fn adopt(ptr: NonNull<Object>) -> Self {
        Self { ptr }
    }

    /// Adopts a strong reference handed over through the C ABI.
    ///
    /// # Safety
    ///
    /// Same contract as [`ObjectRef::into_raw`] in reverse: `ptr` must be null
    /// or carry one strong reference owned by the caller.
    pub unsafe fn from_raw(ptr: *mut Object) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| unsafe { Self::adopt(ptr) })
    }

    /// Obtains a new strong reference from a borrowed raw handle, e.g. the
    /// `self` pointer passed to a method. Returns `None` for null or dead
    /// handles.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point at a shell kept alive by some other
    /// reference for the duration of the call.
    pub unsafe fn obtain(ptr: *const Object) -> Option<Self> {
        let ptr = NonNull::new(ptr as *mut Object)?;
        ptr.as_ref()
            .obtain_strong()
            .then(|| unsafe { Self::adopt(ptr) })
    }

    /// Gives up ownership without releasing, for handing to C callers.
    pub fn into_raw(self) -> *mut Object {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    pub fn as_ptr(&self) -> *mut Object {
        self.ptr.as_ptr()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        self.ptr == other.ptr
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        self.obtain_weak();
        WeakObjectRef { ptr: self.ptr }
    }
}

impl Deref for ObjectRef {
    type Target = Object;

    fn deref(&self) -> &Object {
        // SAFETY: a held strong reference keeps the shell allocated.
        unsafe { self.ptr.as_ref() }
    }
}

impl Clone for ObjectRef {
    fn clone(&self) -> Self {
        // A held strong reference keeps the count above zero, so this cannot
        // be refused.
        self.obtain_strong();
        Self { ptr: self.ptr }
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        // SAFETY: we own exactly one strong reference.
        unsafe { Object::release_strong(self.ptr) }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Owns one weak reference to an [`Object`].
///
/// The object may be torn down while this is held, but its shell stays
/// allocated, so [`WeakObjectRef::upgrade`] can always tell whether it is
/// still alive.
pub struct WeakObjectRef {
    ptr: NonNull<Object>,
}

unsafe impl Send for WeakObjectRef {}
unsafe impl Sync for WeakObjectRef {}

impl WeakObjectRef {
    fn shell(&self) -> &Object {
        // SAFETY: a held weak reference keeps the shell allocated.
        unsafe { self.ptr.as_ref() }
    }

    /// Returns a strong reference if the object is still alive.
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.shell()
            .try_lock_weak()
            .then(|| unsafe { ObjectRef::adopt(self.ptr) })
    }

    pub fn is_expired(&self) -> bool {
        !self.shell().is_alive()
    }

    pub fn strong_count(&self) -> u32 {
        self.shell().strong_count()
    }

    pub fn weak_count(&self) -> u32 {
        self.shell().weak_count()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        self.ptr == other.ptr
    }
}

impl Clone for WeakObjectRef {
    fn clone(&self) -> Self {
        self.shell().obtain_weak();
        Self { ptr: self.ptr }
    }
}

impl Drop for WeakObjectRef {
    fn drop(&mut self) {
        // SAFETY: we own exactly one weak reference.
        unsafe { Object::release_weak(self.ptr) }
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObjectRef")
            .field("address", &self.ptr)
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish()
    }
}
