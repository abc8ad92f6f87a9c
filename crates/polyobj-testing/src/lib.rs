//! Testing utilities for the polyobj runtime: recording classes that journal
//! their teardown callbacks.

pub mod collections;
pub mod journal;

pub use polyobj_core;

pub use journal::{attach_recorded, attach_recorded_with, record_event, Event, Journal, Phase};

pub mod prelude {
    pub use crate::journal::{attach_recorded, attach_recorded_with, Event, Journal, Phase};
    pub use crate::recording_class;
    pub use polyobj_core::{
        ClassDescriptor, ClassId, Dispatcher, DispatcherId, MethodId, Object, ObjectRef,
        WeakObjectRef,
    };
}
