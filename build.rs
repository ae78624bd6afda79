fn main() {
    println!("cargo:rerun-if-changed=keys/firmware_signing.pub.pem");

    // The ESP-IDF environment only exists for device builds; host builds
    // (tests, fuzzing) compile the simulation backends instead.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
