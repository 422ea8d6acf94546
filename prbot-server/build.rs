fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    println!("cargo:rerun-if-env-changed=PRBOT_GIT_HASH");
    if let Ok(hash) = std::env::var("PRBOT_GIT_HASH") {
        println!("cargo:rustc-env=PRBOT_GIT_HASH={}", hash);
    }
}
