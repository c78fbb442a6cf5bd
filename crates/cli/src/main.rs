use anyhow::Result;
use clap::{Parser, Subcommand};
use symtrace::{batch_command, dump_command, show_command, ExploreArgs};

/// Per-function symbolic trace extraction.
///
/// This CLI is a thin wrapper around `symtrace-core` (exposed in code as `symtrace_core`).
#[derive(Parser, Debug)]
#[command(
    name = "symtrace",
    version,
    about = "Extract per-function symbolic traces from binaries",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the core library version.
    Version,

    /// Dump one binary to `<binary>.vex.json.gz`.
    ///
    /// Nothing is recomputed if the artifact already exists.
    Dump {
        /// Path to the binary.
        #[arg(long)]
        binary: String,

        #[command(flatten)]
        args: ExploreArgs,
    },

    /// Dump many binaries in parallel, one artifact per input.
    Batch {
        /// Paths to the binaries.
        #[arg(required = true)]
        binaries: Vec<String>,

        /// Worker count. Defaults to one per CPU.
        #[arg(long)]
        jobs: Option<usize>,

        #[command(flatten)]
        args: ExploreArgs,
    },

    /// Summarize an artifact.
    Show {
        /// Path to a `.vex.json.gz` artifact.
        artifact: String,

        /// Emit the full artifact as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Version) {
        Command::Version => println!("symtrace v{}", symtrace_core::version()),
        Command::Dump { binary, args } => {
            dump_command(&binary, &args)?;
        }
        Command::Batch { binaries, jobs, args } => {
            batch_command(&binaries, jobs, &args)?;
        }
        Command::Show { artifact, json } => show_command(&artifact, json)?,
    }

    Ok(())
}
