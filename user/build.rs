//! Assembles the user-mode page-fault restart stub. See `kernel/build.rs`
//! for the kernel-side counterpart.

fn main() {
    let target = std::env::var("TARGET").unwrap_or_default();
    if !target.starts_with("i686") && !target.starts_with("i586") {
        return;
    }

    cc::Build::new()
        .file("src/asm/pfentry.S")
        .compile("pfentry");

    println!("cargo:rerun-if-changed=src/asm/pfentry.S");
}
