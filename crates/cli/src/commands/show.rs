use anyhow::{Context, Result};
use symtrace_core::services::read_artifact;

use crate::commands::canonicalize_or_current;

/// Print an artifact summary, or the full artifact as JSON.
pub fn show_command(artifact: &str, json: bool) -> Result<()> {
    let path = canonicalize_or_current(artifact)?;
    let artifact = read_artifact(&path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;

    if json {
        let serialized = serde_json::to_string_pretty(&artifact)
            .context("Failed to serialize artifact to JSON")?;
        println!("{}", serialized);
        return Ok(());
    }

    println!("Artifact: {}", path.display());
    println!("  Arch: {} ({}-bit)", artifact.binary.arch.name, artifact.binary.arch.bits);
    println!("  Entry: 0x{:x}", artifact.binary.entry);
    println!("  Routines: {}", artifact.binary.routines.len());
    println!("  Blocks: {}", artifact.blocks.len());
    println!("  Functions ({}):", artifact.functions.len());
    if artifact.functions.is_empty() {
        println!("    (none)");
    }
    for func in &artifact.functions {
        println!(
            "    - {} @ 0x{:x} [blocks: {}, paths: {}]",
            func.name,
            func.address,
            func.block_count,
            func.paths.len()
        );
    }
    Ok(())
}
