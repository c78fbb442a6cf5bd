use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::model::Artifact;
use crate::services::dump::DumpError;

/// Appended to the input path to form the artifact path.
pub const ARTIFACT_SUFFIX: &str = ".vex.json.gz";

const PARTIAL_SUFFIX: &str = ".partial";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DumpError + '_ {
    move |source| DumpError::Io { path: path.to_path_buf(), source }
}

/// Deterministic output path for `input`.
pub fn artifact_path(input: &Path) -> PathBuf {
    let mut path = OsString::from(input.as_os_str());
    path.push(ARTIFACT_SUFFIX);
    PathBuf::from(path)
}

/// Write `artifact` as gzip-compressed JSON.
///
/// The data goes to a sibling `.partial` file which is synced and then renamed, so `path`
/// never exists in an incomplete state.
pub fn write_artifact(artifact: &Artifact, path: &Path) -> Result<(), DumpError> {
    let mut partial = OsString::from(path.as_os_str());
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let result = write_compressed(artifact, &partial)
        .and_then(|_| fs::rename(&partial, path).map_err(io_error(path)));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_compressed(artifact: &Artifact, path: &Path) -> Result<(), DumpError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, artifact)?;
    let mut writer = encoder.finish().map_err(io_error(path))?;
    writer.flush().map_err(io_error(path))?;
    let file = writer.into_inner().map_err(|err| io_error(path)(err.into_error()))?;
    file.sync_all().map_err(io_error(path))
}

/// Read back an artifact written by `write_artifact`.
pub fn read_artifact(path: &Path) -> Result<Artifact, DumpError> {
    let file = File::open(path).map_err(io_error(path))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    Ok(serde_json::from_reader(decoder)?)
}
