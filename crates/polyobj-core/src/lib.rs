#![doc = r"ABI-stable object runtime: one opaque, reference-counted handle that
independently written modules extend with classes and virtual method overrides."]
#![allow(clippy::missing_safety_doc)]

pub mod class;
pub mod ffi;
pub mod ids;
pub mod methods;
pub mod object;
pub mod refcount;
pub mod refs;
pub mod registry;
pub mod slot_map;

pub use class::{ClassCallback, ClassDescriptor};
pub use ids::{ClassId, Dispatcher, DispatcherId, MethodId};
pub use methods::MethodChain;
pub use object::Object;
pub use refcount::{RefCounts, StrongRelease, WeakRelease};
pub use refs::{ObjectRef, WeakObjectRef};
pub use registry::{ClassRegistry, ClassSlot, Override};
pub use slot_map::{SlotKey, SlotMap};
