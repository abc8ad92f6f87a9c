//! The handle: an opaque, reference-counted object that unrelated modules
//! extend by attaching classes and pushing method overrides.
//!
//! Shape operations (classes, methods, data lookups) go through a mutex that
//! is held only for one map operation at a time. Class callbacks always run
//! with the lock released, so a `finalize` may dispatch virtually and a `free`
//! may look up its own data.
//!
//! Teardown order when the last strong reference goes away:
//!
//! 1. `finalize` for every class, most recently attached first
//! 2. for every class, most recently attached first: `free`, then revert the
//!    overrides it pushed (newest first), then drop its data entry
//! 3. clear all maps; the shell stays allocated while weak references remain

use std::ffi::c_void;
use std::fmt::{self, Write as _};
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::class::ClassDescriptor;
use crate::ids::{ClassId, DispatcherId, MethodId};
use crate::methods::MethodChain;
use crate::refcount::{RefCounts, StrongRelease, WeakRelease};
use crate::refs::ObjectRef;
use crate::registry::{ClassRegistry, Override};

#[derive(Debug, Default)]
struct Shape {
    registry: ClassRegistry,
    chain: MethodChain,
}

pub struct Object {
    counts: RefCounts,
    shape: Mutex<Shape>,
}

// Class data pointers are owned by their classes; the handle only stores and
// hands them back. Shape access is serialized by the mutex and the counts are
// atomic.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

#[cfg(test)]
thread_local! {
    pub(crate) static SHELLS_FREED: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

impl Object {
    /// Creates a handle with no classes and a strong count of one.
    pub fn create() -> ObjectRef {
        // SAFETY: the fresh allocation carries exactly one strong reference,
        // which the returned `ObjectRef` adopts.
        unsafe { ObjectRef::adopt(Self::allocate()) }
    }

    /// Allocates a shell owning one strong reference.
    pub(crate) fn allocate() -> NonNull<Object> {
        let object = Box::new(Object {
            counts: RefCounts::new(),
            shape: Mutex::new(Shape::default()),
        });
        let ptr = NonNull::from(Box::leak(object));
        log::trace!("created object {:p}", ptr);
        ptr
    }

    fn shape(&self) -> MutexGuard<'_, Shape> {
        self.shape.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn as_mut_ptr(&self) -> *mut Object {
        self as *const Object as *mut Object
    }

    // ── reference counting ──────────────────────────────────────────────────

    pub fn strong_count(&self) -> u32 {
        self.counts.strong()
    }

    pub fn weak_count(&self) -> u32 {
        self.counts.weak()
    }

    /// True while at least one strong reference exists.
    pub fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }

    /// Adds a strong reference. Ignored once the strong count is zero.
    pub fn obtain_strong(&self) -> bool {
        let obtained = self.counts.obtain_strong();
        if !obtained {
            log::warn!("ignoring strong obtain on dead object {:p}", self);
        }
        obtained
    }

    pub fn obtain_weak(&self) {
        self.counts.obtain_weak();
    }

    /// Upgrades a weak reference: adds a strong reference if the object is
    /// still alive.
    pub fn try_lock_weak(&self) -> bool {
        self.counts.try_upgrade()
    }

    /// Drops a strong reference, tearing the object down if it was the last.
    ///
    /// # Safety
    ///
    /// `this` must point at a live shell and the caller must own the strong
    /// reference being released. The pointer may be dangling afterwards.
    pub unsafe fn release_strong(this: NonNull<Object>) {
        let object = this.as_ref();
        match object.counts.release_strong() {
            StrongRelease::Shared => {}
            StrongRelease::AlreadyDead => {
                log::warn!("ignoring strong release on dead object {:p}", this);
            }
            StrongRelease::Last => {
                object.teardown();
                // Drop the temporary weak reference taken by the last release.
                Self::release_weak(this);
            }
        }
    }

    /// Drops a weak reference, freeing the shell once no references remain.
    ///
    /// # Safety
    ///
    /// `this` must point at a live shell and the caller must own the weak
    /// reference being released. The pointer may be dangling afterwards.
    pub unsafe fn release_weak(this: NonNull<Object>) {
        match this.as_ref().counts.release_weak() {
            WeakRelease::Retained => {}
            WeakRelease::Underflow => {
                log::warn!("ignoring weak release on {:p} with no weak references", this);
            }
            WeakRelease::Deallocate => {
                log::trace!("deallocating object {:p}", this);
                drop(Box::from_raw(this.as_ptr()));
                #[cfg(test)]
                SHELLS_FREED.with(|freed| freed.set(freed.get() + 1));
            }
        }
    }

    fn teardown(&self) {
        let descriptors = self.shape().registry.descriptors_top_down();
        log::debug!(
            "tearing down object {:p} with {} classes",
            self,
            descriptors.len()
        );
        for descriptor in &descriptors {
            // An earlier finalize may have detached this class already.
            if !self.has_class(descriptor.id()) {
                continue;
            }
            if let Some(finalize) = descriptor.finalize_callback() {
                log::trace!("finalize {} on {:p}", descriptor.name(), self);
                // SAFETY: the shell outlives teardown and no lock is held.
                unsafe { finalize(self.as_mut_ptr()) };
            }
        }
        self.unwind_to(0);

        let mut shape = self.shape();
        shape.registry.clear();
        shape.chain.clear();
        log::debug!("object {:p} torn down", self);
    }

    /// Frees and detaches classes from the top down until only `depth`
    /// classes remain.
    fn unwind_to(&self, depth: usize) {
        loop {
            let descriptor = {
                let shape = self.shape();
                if shape.registry.len() <= depth {
                    break;
                }
                match shape.registry.top() {
                    Some(slot) => slot.descriptor,
                    None => break,
                }
            };
            if let Some(free) = descriptor.free_callback() {
                log::trace!("free {} on {:p}", descriptor.name(), self);
                // SAFETY: the class is still attached so its data is reachable,
                // and no lock is held while the callback runs.
                unsafe { free(self.as_mut_ptr()) };
            }
            let mut shape = self.shape();
            let Shape { registry, chain } = &mut *shape;
            if let Some(slot) = registry.take(descriptor.id()) {
                for entry in slot.overrides.iter().rev() {
                    chain.unlink(entry.dispatcher, entry.method);
                }
            }
        }
    }

    // ── classes ─────────────────────────────────────────────────────────────

    /// Attaches a class with its data. Does nothing if the class is already
    /// attached; returns whether it was added.
    pub fn attach_class(&self, descriptor: &'static ClassDescriptor, data: *mut c_void) -> bool {
        let attached = self.shape().registry.attach(descriptor, data);
        if attached {
            log::trace!("attached {} to {:p}", descriptor.name(), self);
        }
        attached
    }

    pub fn has_class(&self, class: ClassId) -> bool {
        self.shape().registry.contains(class)
    }

    /// The data pointer the class was attached with.
    pub fn class_data(&self, class: ClassId) -> Option<*mut c_void> {
        self.shape().registry.data_of(class)
    }

    /// Removes `class` and every class attached after it, most recent first.
    /// Each removed class is freed, then its overrides are reverted. Does
    /// nothing if the class is not attached.
    pub fn detach_class(&self, class: ClassId) {
        let Some(depth) = self.shape().registry.position(class) else {
            return;
        };
        log::trace!("detaching classes above depth {} from {:p}", depth, self);
        self.unwind_to(depth);
    }

    /// Ids of attached classes in attachment order.
    pub fn classes(&self) -> Vec<ClassId> {
        self.shape().registry.ids()
    }

    // ── methods ─────────────────────────────────────────────────────────────

    /// Overrides `dispatcher` with `method`. The override is owned by the most
    /// recently attached class and is reverted when that class goes away.
    pub fn push_method(&self, dispatcher: DispatcherId, method: MethodId) {
        let mut shape = self.shape();
        let Shape { registry, chain } = &mut *shape;
        if !chain.push(dispatcher, method) {
            return;
        }
        if !registry.record_override(Override { dispatcher, method }) {
            log::debug!(
                "{:?} pushed on {:p} with no class attached; it lives until teardown",
                method,
                self
            );
        }
    }

    /// The method currently answering `dispatcher`.
    pub fn resolve_method(&self, dispatcher: DispatcherId) -> Option<MethodId> {
        self.shape().chain.resolve(dispatcher)
    }

    /// The method `method` overrode, or `None` if it is the base of its chain.
    pub fn super_method(&self, method: MethodId) -> Option<MethodId> {
        self.shape().chain.super_of(method)
    }

    /// Removes `method` and every override above it from `dispatcher`.
    /// Does nothing if `method` is not in the dispatcher's chain.
    pub fn remove_method(&self, dispatcher: DispatcherId, method: MethodId) {
        let mut shape = self.shape();
        let Shape { registry, chain } = &mut *shape;
        for removed in chain.remove_span(dispatcher, method) {
            registry.forget_override(Override {
                dispatcher,
                method: removed,
            });
        }
    }

    // ── diagnostics ─────────────────────────────────────────────────────────

    /// Lists attached classes and their data pointers in attachment order,
    /// e.g. `Object(0x1000): Animal(0x2000) Dog(0x3000)`.
    pub fn inspect(&self) -> String {
        let mut out = format!("Object({:p}):", self);
        let shape = self.shape();
        for (descriptor, data) in shape.registry.iter() {
            let _ = write!(out, " {}({:p})", descriptor.name(), data);
        }
        out
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("address", &(self as *const Object))
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .field("classes", &self.shape().registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Dispatcher;
    use std::cell::RefCell;

    thread_local! {
        static EVENTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    fn events() -> Vec<String> {
        EVENTS.with(|events| events.borrow().clone())
    }

    fn freed() -> usize {
        SHELLS_FREED.with(|freed| freed.get())
    }

    unsafe fn record(object: *mut Object, what: &str) {
        let object = &*object;
        let classes = object.classes().len();
        EVENTS.with(|events| events.borrow_mut().push(format!("{what}:{classes}")));
    }

    unsafe extern "C" fn lower_free(object: *mut Object) {
        record(object, "free-lower");
    }

    unsafe extern "C" fn upper_free(object: *mut Object) {
        record(object, "free-upper");
    }

    unsafe extern "C" fn upper_finalize(object: *mut Object) {
        let object = &*object;
        // Virtual dispatch still works during finalize.
        let resolved = object.resolve_method(SPEAK.id());
        EVENTS.with(|events| {
            events
                .borrow_mut()
                .push(format!("finalize-upper:{}", resolved == Some(method(upper_speak))))
        });
    }

    unsafe extern "C" fn resurrect(object: *mut Object) {
        let object = &*object;
        EVENTS.with(|events| {
            events
                .borrow_mut()
                .push(format!("obtain:{}", object.obtain_strong()))
        });
    }

    unsafe extern "C" fn watched_free(object: *mut Object) {
        record(object, "free-watched");
    }

    unsafe extern "C" fn watched_finalize(object: *mut Object) {
        record(object, "finalize-watched");
    }

    unsafe extern "C" fn detach_watched(object: *mut Object) {
        record(object, "finalize-detacher");
        (*object).detach_class(WATCHED.id());
    }

    static LOWER: ClassDescriptor = ClassDescriptor::new(c"Lower", Some(lower_free), None);
    static WATCHED: ClassDescriptor =
        ClassDescriptor::new(c"Watched", Some(watched_free), Some(watched_finalize));
    static DETACHER: ClassDescriptor =
        ClassDescriptor::new(c"Detacher", None, Some(detach_watched));
    static UPPER: ClassDescriptor =
        ClassDescriptor::new(c"Upper", Some(upper_free), Some(upper_finalize));
    static ZOMBIE: ClassDescriptor = ClassDescriptor::new(c"Zombie", Some(resurrect), None);
    static SPEAK: Dispatcher = Dispatcher::new("speak");

    fn lower_speak() -> u32 {
        1
    }

    fn upper_speak() -> u32 {
        2
    }

    fn method(f: fn() -> u32) -> MethodId {
        MethodId::from_ptr(f as *const ()).unwrap()
    }

    fn reset() {
        EVENTS.with(|events| events.borrow_mut().clear());
    }

    #[test]
    fn create_has_one_strong_reference() {
        let object = Object::create();
        assert_eq!(object.strong_count(), 1);
        assert_eq!(object.weak_count(), 0);
        assert!(object.classes().is_empty());
    }

    #[test]
    fn teardown_runs_finalize_then_free_top_down() {
        reset();
        let object = Object::create();
        object.attach_class(&LOWER, std::ptr::null_mut());
        object.push_method(SPEAK.id(), method(lower_speak));
        object.attach_class(&UPPER, std::ptr::null_mut());
        object.push_method(SPEAK.id(), method(upper_speak));
        drop(object);

        assert_eq!(
            events(),
            vec!["finalize-upper:true", "free-upper:2", "free-lower:1"]
        );
    }

    #[test]
    fn free_callback_cannot_resurrect() {
        reset();
        let before = freed();
        let object = Object::create();
        object.attach_class(&ZOMBIE, std::ptr::null_mut());
        drop(object);
        assert_eq!(events(), vec!["obtain:false"]);
        assert_eq!(freed(), before + 1);
    }

    #[test]
    fn finalize_skips_classes_detached_during_teardown() {
        reset();
        let object = Object::create();
        object.attach_class(&WATCHED, std::ptr::null_mut());
        object.attach_class(&DETACHER, std::ptr::null_mut());
        drop(object);

        assert_eq!(events(), vec!["finalize-detacher:2", "free-watched:1"]);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn shape_lock_recovers_after_misuse_panic() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let object = Object::create();
        object.push_method(SPEAK.id(), method(lower_speak));
        let pushed_twice =
            catch_unwind(AssertUnwindSafe(|| object.push_method(SPEAK.id(), method(lower_speak))));
        assert!(pushed_twice.is_err());

        // The panic poisoned the shape lock while it was held.
        assert_eq!(object.resolve_method(SPEAK.id()), Some(method(lower_speak)));
        object.push_method(SPEAK.id(), method(upper_speak));
        assert_eq!(object.super_method(method(upper_speak)), Some(method(lower_speak)));
    }

    #[test]
    fn weak_reference_keeps_shell_until_released() {
        reset();
        let before = freed();
        let object = Object::create();
        object.attach_class(&LOWER, std::ptr::null_mut());
        let weak = object.downgrade();
        drop(object);

        assert_eq!(events(), vec!["free-lower:1"]);
        assert_eq!(freed(), before, "shell freed while a weak reference remains");
        assert!(weak.upgrade().is_none());
        assert!(weak.is_expired());
        assert_eq!(weak.strong_count(), 0);
        assert_eq!(weak.weak_count(), 1);

        drop(weak);
        assert_eq!(freed(), before + 1);
    }

    #[test]
    fn detach_reverts_overrides_of_removed_classes() {
        reset();
        let object = Object::create();
        object.attach_class(&LOWER, std::ptr::null_mut());
        object.push_method(SPEAK.id(), method(lower_speak));
        object.attach_class(&UPPER, std::ptr::null_mut());
        object.push_method(SPEAK.id(), method(upper_speak));

        object.detach_class(UPPER.id());
        assert_eq!(events(), vec!["free-upper:2"]);
        assert_eq!(object.resolve_method(SPEAK.id()), Some(method(lower_speak)));
        assert_eq!(object.super_method(method(upper_speak)), None);
        assert_eq!(object.classes(), vec![LOWER.id()]);

        object.detach_class(LOWER.id());
        assert_eq!(object.resolve_method(SPEAK.id()), None);
        assert!(object.classes().is_empty());
    }

    #[test]
    fn detach_base_removes_everything_above() {
        reset();
        let object = Object::create();
        object.attach_class(&LOWER, std::ptr::null_mut());
        object.attach_class(&UPPER, std::ptr::null_mut());
        object.detach_class(LOWER.id());
        assert_eq!(events(), vec!["free-upper:2", "free-lower:1"]);
        assert!(!object.has_class(UPPER.id()));
    }

    #[test]
    fn detach_unknown_class_is_noop() {
        reset();
        let object = Object::create();
        object.attach_class(&LOWER, std::ptr::null_mut());
        object.detach_class(UPPER.id());
        assert!(events().is_empty());
        assert!(object.has_class(LOWER.id()));
    }

    #[test]
    fn remove_method_forgets_class_records() {
        reset();
        let object = Object::create();
        object.attach_class(&LOWER, std::ptr::null_mut());
        object.push_method(SPEAK.id(), method(lower_speak));
        object.attach_class(&UPPER, std::ptr::null_mut());
        object.push_method(SPEAK.id(), method(upper_speak));

        object.remove_method(SPEAK.id(), method(upper_speak));
        assert_eq!(object.resolve_method(SPEAK.id()), Some(method(lower_speak)));

        // Detaching Upper must not touch Lower's implementation.
        object.detach_class(UPPER.id());
        assert_eq!(object.resolve_method(SPEAK.id()), Some(method(lower_speak)));
    }

    #[test]
    fn inspect_lists_classes_in_attachment_order() {
        let object = Object::create();
        object.attach_class(&LOWER, 0x10 as *mut c_void);
        object.attach_class(&UPPER, 0x20 as *mut c_void);
        let text = object.inspect();
        assert!(text.starts_with("Object(0x"), "{text}");
        assert!(text.ends_with(": Lower(0x10) Upper(0x20)"), "{text}");
    }

    #[test]
    fn debug_reports_counts() {
        let object = Object::create();
        let rendered = format!("{:?}", *object);
        assert!(rendered.contains("strong: 1"), "{rendered}");
        assert!(rendered.contains("weak: 0"), "{rendered}");
    }
}
