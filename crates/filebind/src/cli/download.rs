//! `filebind download`: stream a file parameter of a finished build.

use anyhow::{Context, Result};
use filebind_params::{CancellationToken, ExecContext, LocalLauncher, NullListener};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::context::CliContext;
use super::error::HelpfulError;

/// Write parameter `name` of build `id` to `output`, or stdout. Returns the
/// number of bytes written.
pub fn run(
    ctx: &CliContext,
    id: &str,
    name: &str,
    output: Option<&Path>,
    cancel: CancellationToken,
) -> Result<u64> {
    let build = ctx.load_build(id)?;
    let value = match build.parameter(name) {
        Some(p) => p.as_file().ok_or_else(|| {
            HelpfulError::new(format!("Parameter {} of build {} is not a file", name, id))
        })?,
        None => {
            return Err(HelpfulError::new(format!("Build {} has no parameter {}", id, name)).into())
        }
    };

    let stash = ctx.stash();
    let exec = ExecContext::new(&LocalLauncher, &NullListener, &stash, cancel);
    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    let written = value
        .download(&build, &mut out, &exec)
        .with_context(|| format!("Failed to download {} of build {}", name, id))?;
    Ok(written)
}
