//! Animal and Dog: two classes written against the runtime as if by separate
//! libraries. Dog specializes Animal, overrides `speak` and the `legs`
//! accessors, and adds a `name` property of its own.

use std::ffi::c_void;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use polyobj_core::{ClassDescriptor, Dispatcher, MethodId, Object, ObjectRef};

pub static ANIMAL_SPEAK: Dispatcher = Dispatcher::new("Animal.speak");
pub static ANIMAL_LEGS_GET: Dispatcher = Dispatcher::new("Animal.legs.get");
pub static ANIMAL_LEGS_SET: Dispatcher = Dispatcher::new("Animal.legs.set");
pub static DOG_NAME_GET: Dispatcher = Dispatcher::new("Dog.name.get");
pub static DOG_NAME_SET: Dispatcher = Dispatcher::new("Dog.name.set");

type Speak = fn(&Object) -> String;
type LegsGet = fn(&Object) -> i32;
type LegsSet = fn(&Object, i32);
type NameGet = fn(&Object) -> String;
type NameSet = fn(&Object, &str);

/// Returned by accessors when no class implements them.
pub const UNKNOWN_LEGS: i32 = -1;

// ── plumbing ────────────────────────────────────────────────────────────────

fn push(object: &Object, dispatcher: &'static Dispatcher, method: *const ()) {
    if let Some(method) = MethodId::from_ptr(method) {
        object.push_method(dispatcher.id(), method);
    }
}

fn resolve<F: Copy>(object: &Object, dispatcher: &'static Dispatcher) -> Option<F> {
    let method = object.resolve_method(dispatcher.id())?;
    // SAFETY: every method pushed for a dispatcher in this module has the
    // signature its caller asks for.
    Some(unsafe { method.cast::<F>() })
}

fn resolve_super<F: Copy>(object: &Object, this: *const ()) -> Option<F> {
    let below = object.super_method(MethodId::from_ptr(this)?)?;
    // SAFETY: a supermethod shares its override's signature.
    Some(unsafe { below.cast::<F>() })
}

fn data<'a, T>(object: &'a Object, class: &'static ClassDescriptor) -> Option<&'a T> {
    let ptr = object.class_data(class.id())?;
    // SAFETY: each class here is only ever attached with a `Box<T>` of its own
    // data type, released by its `free` callback.
    unsafe { ptr.cast::<T>().as_ref() }
}

unsafe fn free_boxed<T>(object: *mut Object, class: &'static ClassDescriptor) {
    if let Some(ptr) = object.as_ref().and_then(|object| object.class_data(class.id())) {
        drop(Box::from_raw(ptr.cast::<T>()));
    }
}

fn boxed<T>(value: T) -> *mut c_void {
    Box::into_raw(Box::new(value)).cast()
}

// ── Animal ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AnimalData {
    legs: AtomicI32,
}

unsafe extern "C" fn animal_free(object: *mut Object) {
    free_boxed::<AnimalData>(object, &ANIMAL);
}

pub static ANIMAL: ClassDescriptor = ClassDescriptor::new(c"Animal", Some(animal_free), None);

fn animal_speak_impl(object: &Object) -> String {
    format!("I'm an animal with {} legs.", legs(object))
}

fn animal_legs_get_impl(object: &Object) -> i32 {
    data::<AnimalData>(object, &ANIMAL).map_or(UNKNOWN_LEGS, |d| d.legs.load(Ordering::Relaxed))
}

fn animal_legs_set_impl(object: &Object, legs: i32) {
    if let Some(d) = data::<AnimalData>(object, &ANIMAL) {
        d.legs.store(legs, Ordering::Relaxed);
    }
}

/// Makes `object` an Animal. Returns `false` if it already is one.
pub fn animal_specialize(object: &Object) -> bool {
    if !object.attach_class(&ANIMAL, boxed(AnimalData::default())) {
        return false;
    }
    push(object, &ANIMAL_SPEAK, animal_speak_impl as Speak as *const ());
    push(object, &ANIMAL_LEGS_GET, animal_legs_get_impl as LegsGet as *const ());
    push(object, &ANIMAL_LEGS_SET, animal_legs_set_impl as LegsSet as *const ());
    true
}

pub fn animal_create() -> ObjectRef {
    let object = Object::create();
    animal_specialize(&object);
    object
}

/// Virtual `speak`. `None` if the object is not an Animal.
pub fn speak(object: &Object) -> Option<String> {
    resolve::<Speak>(object, &ANIMAL_SPEAK).map(|f| f(object))
}

pub fn legs(object: &Object) -> i32 {
    resolve::<LegsGet>(object, &ANIMAL_LEGS_GET).map_or(UNKNOWN_LEGS, |f| f(object))
}

pub fn set_legs(object: &Object, legs: i32) {
    if let Some(f) = resolve::<LegsSet>(object, &ANIMAL_LEGS_SET) {
        f(object, legs);
    }
}

// ── Dog ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DogData {
    name: Mutex<String>,
}

unsafe extern "C" fn dog_free(object: *mut Object) {
    free_boxed::<DogData>(object, &DOG);
}

unsafe extern "C" fn dog_finalize(object: *mut Object) {
    if let Some(object) = object.as_ref() {
        // Every class is still attached here, so virtual calls work.
        log::info!("{} leaves the zoo", speak(object).unwrap_or_default());
    }
}

pub static DOG: ClassDescriptor =
    ClassDescriptor::new(c"Dog", Some(dog_free), Some(dog_finalize));

fn dog_speak_impl(object: &Object) -> String {
    format!(
        "Woof, I'm a dog named {} with {} legs.",
        name(object),
        legs(object)
    )
}

fn dog_legs_get_impl(object: &Object) -> i32 {
    resolve_super::<LegsGet>(object, dog_legs_get_impl as LegsGet as *const ())
        .map_or(UNKNOWN_LEGS, |f| f(object))
}

fn dog_legs_set_impl(object: &Object, legs: i32) {
    if let Some(f) = resolve_super::<LegsSet>(object, dog_legs_set_impl as LegsSet as *const ()) {
        f(object, legs);
    }
}

fn dog_name_get_impl(object: &Object) -> String {
    data::<DogData>(object, &DOG)
        .map(|d| d.name.lock().map(|name| name.clone()).unwrap_or_default())
        .unwrap_or_default()
}

fn dog_name_set_impl(object: &Object, name: &str) {
    if let Some(d) = data::<DogData>(object, &DOG) {
        if let Ok(mut slot) = d.name.lock() {
            name.clone_into(&mut *slot);
        }
    }
}

/// Makes `object` a Dog, specializing it as an Animal first if needed.
/// Returns `false` if it already is a Dog.
pub fn dog_specialize(object: &Object) -> bool {
    animal_specialize(object);
    if !object.attach_class(&DOG, boxed(DogData::default())) {
        return false;
    }
    push(object, &ANIMAL_SPEAK, dog_speak_impl as Speak as *const ());
    push(object, &ANIMAL_LEGS_GET, dog_legs_get_impl as LegsGet as *const ());
    push(object, &ANIMAL_LEGS_SET, dog_legs_set_impl as LegsSet as *const ());
    push(object, &DOG_NAME_GET, dog_name_get_impl as NameGet as *const ());
    push(object, &DOG_NAME_SET, dog_name_set_impl as NameSet as *const ());
    set_legs(object, 4);
    true
}

pub fn dog_create() -> ObjectRef {
    let object = Object::create();
    dog_specialize(&object);
    object
}

pub fn name(object: &Object) -> String {
    resolve::<NameGet>(object, &DOG_NAME_GET).map_or_else(String::new, |f| f(object))
}

pub fn set_name(object: &Object, name: &str) {
    if let Some(f) = resolve::<NameSet>(object, &DOG_NAME_SET) {
        f(object, name);
    }
}
