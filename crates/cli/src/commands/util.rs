use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use symtrace_core::analysis::FunctionFilter;
use symtrace_core::config::DumpOptions;
use symtrace_core::services::backends::CapstoneBackend;

/// Exploration flags shared by `dump` and `batch`.
#[derive(Args, Debug, Clone, Default)]
pub struct ExploreArgs {
    /// Only process these functions (repeatable). Defaults to all functions.
    #[arg(long = "function", value_name = "NAME")]
    pub functions: Vec<String>,

    /// Tracelet length in steps; negative runs each function from its entry to completion.
    #[arg(long, allow_negative_numbers = true)]
    pub tracelet: Option<i64>,

    /// In tracelet mode, also start at blocks already covered by an earlier path.
    #[arg(long, default_value_t = false)]
    pub allow_overlap: bool,

    /// Maximum traversals of any single loop back edge.
    #[arg(long)]
    pub loop_bound: Option<u32>,

    /// Options file (.json, .yaml or .yml). Flags override its values.
    #[arg(long)]
    pub config: Option<String>,

    /// Architecture to assume when the binary header is not recognized (e.g., x86_64).
    #[arg(long)]
    pub arch: Option<String>,

    /// Increase verbosity (-vv and above also aborts a binary on recovered failures).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Merge the options file (if any) with command-line overrides.
pub fn build_options(args: &ExploreArgs) -> Result<DumpOptions> {
    let mut options = match &args.config {
        Some(path) => DumpOptions::from_file(Path::new(path))
            .with_context(|| format!("Failed to load options from {path}"))?,
        None => DumpOptions::default(),
    };
    if !args.functions.is_empty() {
        options.functions = Some(FunctionFilter::new(args.functions.iter().cloned()));
    }
    if let Some(tracelet) = args.tracelet {
        options.tracelet = tracelet;
    }
    if args.allow_overlap {
        options.allow_overlap = true;
    }
    if let Some(bound) = args.loop_bound {
        options.loop_bound = bound;
    }
    options.verbosity = options.verbosity.max(args.verbose);
    Ok(options)
}

pub fn make_loader(args: &ExploreArgs) -> CapstoneBackend {
    CapstoneBackend { arch_hint: args.arch.clone(), ..CapstoneBackend::default() }
}

/// Canonicalize an input path if possible, falling back to joining it onto the current
/// working directory.
pub fn canonicalize_or_current(input: &str) -> Result<PathBuf> {
    let path = Path::new(input);
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => {
            let cwd = env::current_dir().context("Failed to get current directory")?;
            Ok(cwd.join(path))
        }
    }
}
