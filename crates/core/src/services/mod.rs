//! Result assembly, persistence, batch processing, and bundled collaborators.

pub mod backends;
pub mod batch;
pub mod dump;
pub mod persist;

pub use batch::{process_all, process_file, BatchReport, FileOutcome};
pub use dump::{dump_binary, DumpError};
pub use persist::{artifact_path, read_artifact, write_artifact, ARTIFACT_SUFFIX};
