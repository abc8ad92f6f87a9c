mod zoo;

use polyobj_core::Object;

fn main() {
    #[cfg(feature = "logging")]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    println!("=== polyobj zoo ===");

    let animal = zoo::animal_create();
    print_speech(&animal);

    // An existing object can be specialized after construction. Doing it
    // twice is harmless.
    zoo::dog_specialize(&animal);
    if !zoo::dog_specialize(&animal) {
        log::debug!("already a Dog");
    }

    zoo::set_name(&animal, "Fido");
    zoo::set_legs(&animal, 3);
    print_speech(&animal);
    println!("{}", animal.inspect());

    let weak = animal.downgrade();
    if let Some(strong) = weak.upgrade() {
        println!("weak upgrade: {} legs", zoo::legs(&strong));
    }

    drop(animal);
    println!("after release, alive = {}", !weak.is_expired());

    let rex = zoo::dog_create();
    zoo::set_name(&rex, "Rex");
    print_speech(&rex);
    // Removing Dog unwinds its overrides; Rex is a plain Animal again.
    rex.detach_class(zoo::DOG.id());
    print_speech(&rex);
}

fn print_speech(object: &Object) {
    match zoo::speak(object) {
        Some(line) => println!("{line}"),
        None => log::warn!("object cannot speak"),
    }
}
