use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use rayon::prelude::*;

use crate::backends::BinaryLoader;
use crate::config::DumpOptions;
use crate::services::dump::{dump_binary, DumpError};
use crate::services::persist::{artifact_path, write_artifact};

/// Result of processing a single input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// An artifact already existed; nothing was recomputed.
    Cached(PathBuf),
    Written(PathBuf),
}

impl FileOutcome {
    pub fn path(&self) -> &Path {
        match self {
            FileOutcome::Cached(path) | FileOutcome::Written(path) => path,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, FileOutcome::Cached(_))
    }
}

/// Process one binary unless its artifact already exists.
pub fn process_file<L: BinaryLoader>(
    loader: &L,
    input: &Path,
    options: &DumpOptions,
) -> Result<FileOutcome, DumpError> {
    let output = artifact_path(input);
    if output.exists() {
        debug!("Skipping {}: {} exists", input.display(), output.display());
        return Ok(FileOutcome::Cached(output));
    }

    let project = loader.load(input)?;
    let artifact = dump_binary(&project, options)?;
    write_artifact(&artifact, &output)?;
    info!("Wrote {}", output.display());
    Ok(FileOutcome::Written(output))
}

/// Per-input outcomes of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub cached: Vec<PathBuf>,
    /// Inputs that failed, with the error message.
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.written.len() + self.cached.len() + self.failed.len()
    }
}

/// Process `inputs` in parallel, one binary per worker.
///
/// Duplicate inputs are processed once. A failing input is recorded in the report and
/// does not affect the others.
pub fn process_all<L: BinaryLoader>(
    loader: &L,
    inputs: &[PathBuf],
    options: &DumpOptions,
) -> Result<BatchReport, DumpError> {
    let mut seen = HashSet::new();
    let unique: Vec<&PathBuf> = inputs.iter().filter(|p| seen.insert(p.as_path())).collect();

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(jobs) = options.jobs {
        builder = builder.num_threads(jobs);
    }
    let pool = builder.build()?;

    let results: Vec<(PathBuf, Result<FileOutcome, DumpError>)> = pool.install(|| {
        unique
            .par_iter()
            .map(|input| ((*input).clone(), process_file(loader, input, options)))
            .collect()
    });

    let mut report = BatchReport::default();
    for (input, result) in results {
        match result {
            Ok(FileOutcome::Written(path)) => report.written.push(path),
            Ok(FileOutcome::Cached(path)) => report.cached.push(path),
            Err(err) => {
                error!("Failed to process {}: {err}", input.display());
                report.failed.push((input, err.to_string()));
            }
        }
    }
    Ok(report)
}
