use anyhow::{anyhow, Context, Result};
use symtrace_core::services::{process_all, BatchReport};

use crate::commands::{build_options, canonicalize_or_current, make_loader, ExploreArgs};

/// Dump many binaries in parallel.
///
/// Fails (after printing the summary) if any input failed.
pub fn batch_command(
    binaries: &[String],
    jobs: Option<usize>,
    args: &ExploreArgs,
) -> Result<BatchReport> {
    let mut options = build_options(args)?;
    if jobs.is_some() {
        options.jobs = jobs;
    }
    symtrace_core::logging::init(options.verbosity);

    let inputs =
        binaries.iter().map(|b| canonicalize_or_current(b)).collect::<Result<Vec<_>>>()?;
    let loader = make_loader(args);
    let report = process_all(&loader, &inputs, &options).context("Batch processing failed")?;

    println!(
        "Processed {} binaries: {} written, {} cached, {} failed",
        report.total(),
        report.written.len(),
        report.cached.len(),
        report.failed.len()
    );
    for path in &report.written {
        println!("  wrote  {}", path.display());
    }
    for path in &report.cached {
        println!("  cached {}", path.display());
    }
    for (input, reason) in &report.failed {
        println!("  failed {}: {}", input.display(), reason);
    }

    if !report.is_success() {
        return Err(anyhow!("{} of {} inputs failed", report.failed.len(), report.total()));
    }
    Ok(report)
}
