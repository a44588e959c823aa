use std::{env, error::Error};
use vergen_gitcl::{BuildBuilder, Emitter, GitclBuilder};

pub fn run() -> Result<(), Box<dyn Error>> {
    // describe with tags=true so that lightweight release tags are picked up
    let git = GitclBuilder::default()
        .all()
        .describe(true, true, None)
        .build()?;
    let is_release = env::var("PROFILE").is_ok_and(|profile| profile == "release");
    // Dev/test builds keep metadata stable so incremental builds stick.
    let build = BuildBuilder::default()
        .build_date(is_release || env::var_os("OMNISYNC_ENABLE_BUILD_DATE").is_some())
        .build_timestamp(is_release || env::var_os("OMNISYNC_ENABLE_BUILD_TIMESTAMP").is_some())
        .build()?;
    Emitter::default()
        .add_instructions(&build)?
        .add_instructions(&git)?
        .emit()?;
    Ok(())
}

#[allow(dead_code)]
fn main() {
    if let Err(err) = run() {
        panic!("build script failed: {err}");
    }
}
