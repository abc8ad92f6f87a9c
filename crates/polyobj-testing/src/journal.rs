//! Recording classes: descriptors whose callbacks append to a shared
//! [`Journal`], so tests can assert on teardown order and callback counts.

use std::ffi::c_void;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use polyobj_core::{ClassDescriptor, Object};

use crate::collections::map::HashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Finalize,
    Free,
}

/// One callback invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub class: String,
    pub phase: Phase,
    /// Number of classes still attached when the callback ran.
    pub attached: usize,
}

#[derive(Debug, Default)]
pub struct Journal {
    events: Mutex<Vec<Event>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, event: Event) {
        log::trace!("journal: {:?} {}", event.phase, event.class);
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    fn order_of(&self, phase: Phase) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|event| event.phase == phase)
            .map(|event| event.class.clone())
            .collect()
    }

    /// Class names in the order their `finalize` callbacks ran.
    pub fn finalize_order(&self) -> Vec<String> {
        self.order_of(Phase::Finalize)
    }

    /// Class names in the order their `free` callbacks ran.
    pub fn free_order(&self) -> Vec<String> {
        self.order_of(Phase::Free)
    }

    pub fn count(&self, class: &str, phase: Phase) -> usize {
        self.lock()
            .iter()
            .filter(|event| event.phase == phase && event.class == class)
            .count()
    }

    /// Invocation counts keyed by class name and phase.
    pub fn tally(&self) -> HashMap<(String, Phase), usize> {
        let mut tally = HashMap::default();
        for event in self.lock().iter() {
            *tally.entry((event.class.clone(), event.phase)).or_insert(0) += 1;
        }
        tally
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

type Hook = Box<dyn Fn(&Object, Phase) + Send + Sync>;

/// Data attached alongside a recording class.
struct ClassProbe {
    journal: Arc<Journal>,
    hook: Option<Hook>,
}

/// Attaches a recording class declared with [`recording_class!`], returning
/// the data pointer it was attached with. The probe is released by the
/// class's `free` callback.
pub fn attach_recorded(
    object: &Object,
    class: &'static ClassDescriptor,
    journal: &Arc<Journal>,
) -> *mut c_void {
    attach_probe(object, class, journal, None)
}

/// Like [`attach_recorded`], additionally running `hook` inside each
/// callback, before the event is recorded.
pub fn attach_recorded_with(
    object: &Object,
    class: &'static ClassDescriptor,
    journal: &Arc<Journal>,
    hook: impl Fn(&Object, Phase) + Send + Sync + 'static,
) -> *mut c_void {
    attach_probe(object, class, journal, Some(Box::new(hook)))
}

fn attach_probe(
    object: &Object,
    class: &'static ClassDescriptor,
    journal: &Arc<Journal>,
    hook: Option<Hook>,
) -> *mut c_void {
    let probe = Box::into_raw(Box::new(ClassProbe {
        journal: Arc::clone(journal),
        hook,
    }))
    .cast::<c_void>();
    if !object.attach_class(class, probe) {
        // Already attached: the existing probe stays in charge.
        // SAFETY: the probe was never handed to the object.
        drop(unsafe { Box::from_raw(probe.cast::<ClassProbe>()) });
        return object.class_data(class.id()).unwrap_or(std::ptr::null_mut());
    }
    probe
}

/// Callback body shared by every [`recording_class!`] descriptor.
///
/// # Safety
///
/// `object` must be a live shell, and if `class` is attached its data must be
/// a probe installed by [`attach_recorded`].
#[doc(hidden)]
pub unsafe fn record_event(object: *mut Object, class: &'static ClassDescriptor, phase: Phase) {
    let Some(object) = object.as_ref() else {
        return;
    };
    let Some(data) = object.class_data(class.id()).filter(|data| !data.is_null()) else {
        log::warn!("{} has no probe on {:p}", class.name(), object);
        return;
    };
    let probe = data.cast::<ClassProbe>();
    if let Some(hook) = &(*probe).hook {
        hook(object, phase);
    }
    (*probe).journal.record(Event {
        class: class.name().into_owned(),
        phase,
        attached: object.classes().len(),
    });
    if phase == Phase::Free {
        drop(Box::from_raw(probe));
    }
}

/// Declares a static [`ClassDescriptor`] whose `finalize` and `free`
/// callbacks record into the [`Journal`] given to [`attach_recorded`].
///
/// ```
/// use polyobj_testing::{attach_recorded, recording_class, Journal};
///
/// recording_class!(static WIDGET = c"Widget";);
///
/// let journal = Journal::new();
/// let object = polyobj_core::Object::create();
/// attach_recorded(&object, &WIDGET, &journal);
/// drop(object);
/// assert_eq!(journal.free_order(), vec!["Widget"]);
/// ```
#[macro_export]
macro_rules! recording_class {
    ($(#[$meta:meta])* $vis:vis static $name:ident = $label:expr;) => {
        $(#[$meta])*
        $vis static $name: $crate::polyobj_core::ClassDescriptor = {
            unsafe extern "C" fn finalize(object: *mut $crate::polyobj_core::Object) {
                $crate::record_event(object, &$name, $crate::Phase::Finalize)
            }
            unsafe extern "C" fn free(object: *mut $crate::polyobj_core::Object) {
                $crate::record_event(object, &$name, $crate::Phase::Free)
            }
            $crate::polyobj_core::ClassDescriptor::new($label, Some(free), Some(finalize))
        };
    };
}
