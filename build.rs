use std::{env, error::Error, fs, path::PathBuf};

fn main() -> Result<(), Box<dyn Error>> {
    let out_dir = &PathBuf::from(env::var("OUT_DIR")?);
    let target = env::var("TARGET")?;

    // put the memory layout somewhere cortex-m-rt's link.x can find it; host
    // builds (tests) have no use for it
    if target.starts_with("thumb") {
        fs::copy("memory.x", out_dir.join("memory.x"))?;
        println!("cargo:rustc-link-search={}", out_dir.display());
    }
    println!("cargo:rerun-if-changed=memory.x");
    Ok(())
}
