use std::env;

fn main() {
    let version = env::var("GARBAGE_SORTER_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap());
    println!("cargo:rustc-env=GARBAGE_SORTER_VERSION={version}");
}
