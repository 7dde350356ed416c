//! `filebind show`: print a persisted build record.

use anyhow::Result;

use super::context::CliContext;

pub fn run(ctx: &CliContext, id: &str) -> Result<String> {
    let build = ctx.load_build(id)?;
    Ok(build.snapshot()?)
}
