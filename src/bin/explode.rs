//! Splits one or more zip files into the exploded format to reduce
//! duplication across archives.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use rayon::prelude::*;
use xzip::exploder::{explode, ExplodeOutcome};
use xzip::vprintln;

#[derive(Parser, Debug)]
#[command(
    about = "Splits zip file(s) into an exploded format to reduce duplication"
)]
struct Cli {
    /// Alternate base directory for the exploded files.
    #[arg(short = 'd', long = "directory", default_value = ".")]
    directory: PathBuf,

    /// Data subdirectory shard depth.
    #[arg(long, default_value_t = 0)]
    depth: u32,

    /// Increase diagnostic verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all but fatal diagnostics (repeatable).
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count)]
    quiet: u8,

    /// Zip files to process.
    #[arg(required = true)]
    filenames: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = (cli.verbose as i16 - cli.quiet as i16).max(0) as u8;

    // The blob pool's write-if-absent puts are safe under concurrent
    // writers, so multiple archives can be exploded across a thread pool
    // the same way igir's candidate processing fans out over rayon.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build()
        .expect("building explode thread pool");

    let results: Vec<(&PathBuf, anyhow::Result<ExplodeOutcome>)> = pool.install(|| {
        cli.filenames
            .par_iter()
            .map(|filename| {
                vprintln!(verbose, 1, "exploding {}", filename.display());
                let result = explode(filename, &cli.directory, cli.depth)
                    .with_context(|| format!("exploding {}", filename.display()));
                (filename, result)
            })
            .collect()
    });

    let mut had_error = false;
    for (filename, result) in results {
        match result {
            Ok(ExplodeOutcome::Exploded { entries }) => {
                vprintln!(verbose, 1, "{}: {entries} entries", filename.display());
            }
            Ok(ExplodeOutcome::NotAZip) => {
                vprintln!(verbose, 0, "{}: not a zip file, skipping", filename.display());
            }
            Err(e) => {
                eprintln!("error: {e:#}");
                had_error = true;
            }
        }
    }

    if had_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
