fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Allow packagers to pin the reported revision.
    println!("cargo:rerun-if-env-changed=PRWATCH_GIT_HASH");
    if let Ok(hash) = std::env::var("PRWATCH_GIT_HASH") {
        println!("cargo:rustc-env=PRWATCH_GIT_HASH={}", hash);
    }
}
