//! Opaque identities used as keys inside a handle.
//!
//! Every identity is a non-zero machine word taken from an address that stays
//! stable for the life of the process: a static [`ClassDescriptor`], a static
//! [`Dispatcher`], or a function pointer. Zero is reserved as the empty-slot
//! marker of [`SlotMap`](crate::slot_map::SlotMap), so the types here make it
//! unrepresentable.

use std::fmt;
use std::num::NonZeroUsize;

use crate::class::ClassDescriptor;
use crate::slot_map::SlotKey;

#[inline]
fn address_of<T>(item: &'static T) -> NonZeroUsize {
    match NonZeroUsize::new(item as *const T as usize) {
        Some(address) => address,
        None => unreachable!("references are never null"),
    }
}

macro_rules! word_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(NonZeroUsize);

        impl $name {
            /// Wraps a raw identity, rejecting zero.
            pub fn from_raw(raw: usize) -> Option<Self> {
                NonZeroUsize::new(raw).map(Self)
            }

            /// Wraps an address, rejecting null.
            pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
                Self::from_raw(ptr as usize)
            }

            pub fn as_raw(self) -> usize {
                self.0.get()
            }

            pub fn as_ptr(self) -> *const std::ffi::c_void {
                self.0.get() as *const std::ffi::c_void
            }
        }

        impl SlotKey for $name {
            #[inline]
            fn into_raw(self) -> NonZeroUsize {
                self.0
            }

            #[inline]
            fn from_raw(raw: NonZeroUsize) -> Self {
                Self(raw)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0.get())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                // Only ever observed in empty map slots, never handed out.
                Self(NonZeroUsize::MAX)
            }
        }
    };
}

word_id! {
    /// Identity of a class (facet) definition: the address of its descriptor.
    ClassId
}

word_id! {
    /// Identity of an abstract operation that can be dispatched virtually.
    DispatcherId
}

word_id! {
    /// Identity of a concrete method implementation: its function address.
    MethodId
}

impl ClassId {
    pub fn of(descriptor: &'static ClassDescriptor) -> Self {
        Self(address_of(descriptor))
    }
}

impl DispatcherId {
    pub fn of(dispatcher: &'static Dispatcher) -> Self {
        Self(address_of(dispatcher))
    }
}

impl MethodId {
    /// Reinterprets the method as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type with exactly the signature the
    /// method was registered with.
    pub unsafe fn cast<F: Copy>(self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<usize>(),
            "methods can only be cast to function pointers"
        );
        std::mem::transmute_copy(&self.0.get())
    }
}

/// A named dispatch point for Rust callers.
///
/// Declare one as a `static` and use its address as the dispatcher key:
///
/// ```
/// use polyobj_core::Dispatcher;
///
/// static SPEAK: Dispatcher = Dispatcher::new("Animal.speak");
/// assert_eq!(SPEAK.id(), SPEAK.id());
/// ```
#[derive(Debug)]
pub struct Dispatcher {
    name: &'static str,
}

impl Dispatcher {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&'static self) -> DispatcherId {
        DispatcherId::of(self)
    }
}
