//! C-callable runtime surface.
//!
//! Every function accepts a null handle and treats it as a no-op returning a
//! neutral value (0, `false`, null), so generated wrappers never need to
//! null-check before calling. Build with the `export-symbols` feature to link
//! these under their unmangled names.
//!
//! Class descriptors, dispatchers and methods passed in must stay valid for
//! the life of the process; they are normally statics and functions.

use std::ffi::{c_char, c_void, CString};
use std::ptr::{self, NonNull};

use crate::class::ClassDescriptor;
use crate::ids::{ClassId, DispatcherId, MethodId};
use crate::object::Object;

unsafe fn object_ref<'a>(object: *const Object) -> Option<&'a Object> {
    object.as_ref()
}

unsafe fn descriptor(class: *const ClassDescriptor) -> Option<&'static ClassDescriptor> {
    class.as_ref()
}

/// Creates an object with no classes and one strong reference. Never null.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub extern "C" fn polyobj_create() -> *mut Object {
    Object::allocate().as_ptr()
}

/// Adds a strong reference. Thread-safe.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_obtain(object: *const Object) {
    if let Some(object) = object_ref(object) {
        object.obtain_strong();
    }
}

/// Drops a strong reference; the last one tears the object down. Thread-safe.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_release(object: *const Object) {
    if let Some(object) = NonNull::new(object as *mut Object) {
        Object::release_strong(object);
    }
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_refs_get(object: *const Object) -> u32 {
    object_ref(object).map_or(0, Object::strong_count)
}

/// Adds a weak reference, keeping the shell addressable. Thread-safe.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_weak_obtain(object: *const Object) {
    if let Some(object) = object_ref(object) {
        object.obtain_weak();
    }
}

/// Drops a weak reference; frees the shell when no references remain.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_weak_release(object: *const Object) {
    if let Some(object) = NonNull::new(object as *mut Object) {
        Object::release_weak(object);
    }
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_weak_refs_get(object: *const Object) -> u32 {
    object_ref(object).map_or(0, Object::weak_count)
}

/// Adds a strong reference if the object is still alive. On success the
/// caller owns that reference.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_weak_lock(object: *const Object) -> bool {
    object_ref(object).is_some_and(Object::try_lock_weak)
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_class_push(
    object: *mut Object,
    class: *const ClassDescriptor,
    data: *mut c_void,
) {
    if let (Some(object), Some(class)) = (object_ref(object), descriptor(class)) {
        object.attach_class(class, data);
    }
}

/// Returns whether the object has `class`, writing its data pointer to
/// `data_out` when both are non-null.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_class_check(
    object: *const Object,
    class: *const ClassDescriptor,
    data_out: *mut *mut c_void,
) -> bool {
    let (Some(object), Some(class)) = (object_ref(object), ClassId::from_ptr(class)) else {
        return false;
    };
    match object.class_data(class) {
        Some(data) => {
            if !data_out.is_null() {
                *data_out = data;
            }
            true
        }
        None => false,
    }
}

/// Removes `class` and every class attached after it.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_class_remove(object: *mut Object, class: *const ClassDescriptor) {
    if let (Some(object), Some(class)) = (object_ref(object), ClassId::from_ptr(class)) {
        object.detach_class(class);
    }
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_method_push(
    object: *mut Object,
    dispatcher: *const c_void,
    method: *const c_void,
) {
    if let (Some(object), Some(dispatcher), Some(method)) = (
        object_ref(object),
        DispatcherId::from_ptr(dispatcher),
        MethodId::from_ptr(method),
    ) {
        object.push_method(dispatcher, method);
    }
}

/// The method currently answering `dispatcher`, or null.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_method_get(
    object: *const Object,
    dispatcher: *const c_void,
) -> *const c_void {
    let (Some(object), Some(dispatcher)) = (object_ref(object), DispatcherId::from_ptr(dispatcher))
    else {
        return ptr::null();
    };
    object
        .resolve_method(dispatcher)
        .map_or(ptr::null(), MethodId::as_ptr)
}

/// The method `method` overrode, or null if it is the first in its chain.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_supermethod_get(
    object: *const Object,
    method: *const c_void,
) -> *const c_void {
    let (Some(object), Some(method)) = (object_ref(object), MethodId::from_ptr(method)) else {
        return ptr::null();
    };
    object
        .super_method(method)
        .map_or(ptr::null(), MethodId::as_ptr)
}

/// Removes `method` and every override above it from `dispatcher`.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_method_remove(
    object: *mut Object,
    dispatcher: *const c_void,
    method: *const c_void,
) {
    if let (Some(object), Some(dispatcher), Some(method)) = (
        object_ref(object),
        DispatcherId::from_ptr(dispatcher),
        MethodId::from_ptr(method),
    ) {
        object.remove_method(dispatcher, method);
    }
}

/// Renders the attached classes as a string the caller must release with
/// [`polyobj_string_free`]. Null for a null handle.
#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_inspect(object: *const Object) -> *mut c_char {
    let Some(object) = object_ref(object) else {
        return ptr::null_mut();
    };
    CString::new(object.inspect()).map_or(ptr::null_mut(), CString::into_raw)
}

#[cfg_attr(feature = "export-symbols", no_mangle)]
pub unsafe extern "C" fn polyobj_string_free(text: *mut c_char) {
    if !text.is_null() {
        drop(CString::from_raw(text));
    }
}
