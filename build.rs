use anyhow::Result;
use chrono::TimeZone;
use std::env;
use vergen_gitcl::{Emitter, GitclBuilder};

fn main() -> Result<()> {
    // Generate git information
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let gitcl_res = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit());

    if let Err(e) = gitcl_res {
        eprintln!("error occurred while generating instructions: {e:?}");
        Emitter::default().idempotent().fail_on_error().emit()?;
        println!("cargo:rustc-env=VERGEN_GIT_DESCRIBE=unknown");
    }

    // Reproducible builds pin the timestamp through SOURCE_DATE_EPOCH
    let now = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|val| val.parse::<i64>().ok())
        .and_then(|secs| chrono::Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(chrono::Utc::now);

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=daqmux/Cargo.toml");

    Ok(())
}
