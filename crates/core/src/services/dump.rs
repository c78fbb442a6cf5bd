use std::path::PathBuf;

use log::{debug, info};
use thiserror::Error;

use crate::analysis::explore::ExploreError;
use crate::analysis::extract::{extract_function, select_functions};
use crate::analysis::{Explorer, LoopBound, StateEvaluator};
use crate::backends::{BackendError, Project};
use crate::config::{ConfigError, DumpOptions};
use crate::model::Artifact;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Explore(#[from] ExploreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Artifact serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Extract, explore, and assemble the artifact for one loaded binary.
///
/// Functions are processed in catalog order, one exploration at a time.
pub fn dump_binary<P: Project>(project: &P, options: &DumpOptions) -> Result<Artifact, DumpError> {
    let metadata = project.metadata().clone();
    let catalog = project.functions();
    let loop_bound =
        LoopBound::new(project.cfg(), catalog.iter().map(|f| f.address), options.loop_bound);
    let selected = select_functions(catalog, options.functions.as_ref());

    let engine = project.engine()?;
    let evaluator = StateEvaluator::new(options.exclusion_table().for_arch(&metadata.arch.name))
        .strict(options.strict());
    let explorer =
        Explorer::new(&engine, &loop_bound, &evaluator, options.mode()).strict(options.strict());

    info!("Dumping {} functions ({:?})", selected.len(), options.mode());
    let mut functions = Vec::with_capacity(selected.len());
    let mut blocks = Vec::new();
    for function in &selected {
        let (mut record, block_records) = extract_function(project, function)?;
        record.paths = explorer.explore_or_recover(function)?;
        debug!("{}: {} blocks, {} paths", record.name, record.block_count, record.paths.len());
        functions.push(record);
        blocks.extend(block_records);
    }

    Ok(Artifact::new(metadata, functions, blocks))
}
