//! `ldb-reclaim` command-line front end.
//!
//! ```text
//! ldb-reclaim [-c] [-v] [-s] [-n N] [-t MB] [-r MB] [-e EXT] <folder>
//! ```

use std::{path::PathBuf, process::ExitCode};

use ldb_reclaim::{Analysis, Outcome, ReclaimConfig, analyze, registry::RegistryStats};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: ldb-reclaim [options] <folder>

Ranks the sorted tables in <folder> by the space a compaction would reclaim.

options:
  -c        verify block checksums
  -v        verbose: log every table at debug level
  -s        print aggregate statistics and exit
  -n N      report at most N candidates (default 10)
  -t MB     maximum working set per candidate (default 500)
  -r MB     minimum reclaimable space per candidate (default 300)
  -e EXT    table file extension (default ldb)
  -h        show this help";

/// What the command line asked for.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Run { dir: PathBuf, config: ReclaimConfig },
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (dir, config) = match parse_args(&args) {
        Ok(Command::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Ok(Command::Run { dir, config }) => (dir, config),
        Err(msg) => {
            eprintln!("error: {msg}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.verbose);

    match analyze(&dir, &config) {
        Ok(analysis) => {
            report(&analysis);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Installs a stderr subscriber. `RUST_LOG` takes precedence over `-v`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut config = ReclaimConfig::default();
    let mut folder: Option<PathBuf> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-c" => config.verify_checksums = true,
            "-v" => config.verbose = true,
            "-s" => config.dump_stats_only = true,
            "-n" => config.top_n = number(args, &mut i)?,
            "-t" => config.max_working_set_mb = number(args, &mut i)?,
            "-r" => config.min_reclaim_mb = number(args, &mut i)?,
            "-e" => config.file_extension = value(args, &mut i)?.to_string(),
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("unknown option {flag}"));
            }
            positional => {
                if folder.is_some() {
                    return Err(format!("unexpected argument {positional}"));
                }
                folder = Some(PathBuf::from(positional));
            }
        }
        i += 1;
    }

    let dir = folder.ok_or("missing <folder> argument")?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(Command::Run { dir, config })
}

/// Consumes the value following the option at `args[*i]`.
fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, String> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("option {flag} needs a value"))
}

fn number<T: std::str::FromStr>(args: &[String], i: &mut usize) -> Result<T, String> {
    let flag = args[*i].clone();
    let raw = value(args, i)?;
    raw.parse()
        .map_err(|_| format!("option {flag} expects a non-negative integer, got {raw:?}"))
}

// ------------------------------------------------------------------------------------------------
// Presentation
// ------------------------------------------------------------------------------------------------

fn report(analysis: &Analysis) {
    for failure in &analysis.failures {
        eprintln!(
            "warning: skipped {} ({:?}): {}",
            failure.identifier,
            failure.error.kind(),
            failure.error
        );
    }

    match &analysis.outcome {
        Outcome::NoData => {
            println!("no keys found in {} table(s)", analysis.stats.table_count);
        }
        Outcome::StatsOnly => print_stats(&analysis.stats),
        Outcome::Candidates(candidates) if candidates.is_empty() => {
            println!("no compaction candidates");
        }
        Outcome::Candidates(candidates) => {
            println!(
                "{:<20} {:>12} {:>12} {:>10} {:>10}  key range",
                "table", "live", "tombstones", "ws MB", "reclaim MB"
            );
            for c in candidates {
                println!(
                    "{:<20} {:>12} {:>12} {:>10} {:>10}  [{}, {}]",
                    c.identifier,
                    c.live_count,
                    c.tombstone_count,
                    c.working_set_mb,
                    c.reclaim_mb,
                    c.min_key.escape_ascii(),
                    c.max_key.escape_ascii()
                );
            }
        }
    }
}

fn print_stats(stats: &RegistryStats) {
    println!("tables:           {}", stats.table_count);
    println!("total size:       {}", stats.total_size);
    println!("total keys:       {}", stats.total_keys);
    println!("total tombstones: {}", stats.total_tombstones);
    match stats.average_key_size {
        Some(avg) => println!("average key size: {avg}"),
        None => println!("average key size: n/a"),
    }
}
