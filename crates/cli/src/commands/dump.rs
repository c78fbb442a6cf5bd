use anyhow::{Context, Result};
use symtrace_core::services::{process_file, FileOutcome};

use crate::commands::{build_options, canonicalize_or_current, make_loader, ExploreArgs};

/// Dump one binary, or report the existing artifact.
pub fn dump_command(binary: &str, args: &ExploreArgs) -> Result<FileOutcome> {
    let options = build_options(args)?;
    symtrace_core::logging::init(options.verbosity);

    let input = canonicalize_or_current(binary)?;
    let loader = make_loader(args);
    let outcome = process_file(&loader, &input, &options)
        .with_context(|| format!("Failed to process {}", input.display()))?;

    match &outcome {
        FileOutcome::Written(path) => println!("Wrote: {}", path.display()),
        FileOutcome::Cached(path) => println!("Cached: {}", path.display()),
    }
    Ok(outcome)
}
