use clap::{Args, Parser, Subcommand};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use primelist::storage;
use primelist::{Sieve, SieveConfig};

#[derive(Parser)]
#[command(name = "primelist")]
#[command(about = "Count and list the primes below a bound", long_about = None)]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Tuning {
    #[arg(
        short,
        long,
        global = true,
        help = "Number of worker threads for the segmented sieve [default: CPUs - 1, at least 2]"
    )]
    workers: Option<usize>,
    #[arg(
        long,
        global = true,
        help = "Maximum number of sieved segments held in memory at once"
    )]
    resident_cap: Option<usize>,
    #[arg(long, global = true, help = "Numbers covered by one segment")]
    segment_size: Option<u64>,
    #[arg(
        long,
        global = true,
        help = "Bounds at or above this switch to the segmented sieve"
    )]
    large_threshold: Option<u64>,
}

impl Tuning {
    fn into_config(self) -> SieveConfig {
        let defaults = SieveConfig::default();
        SieveConfig {
            large_threshold: self.large_threshold.unwrap_or(defaults.large_threshold),
            segment_size: self.segment_size.unwrap_or(defaults.segment_size),
            workers: self.workers.unwrap_or(defaults.workers),
            resident_cap: self.resident_cap.unwrap_or(defaults.resident_cap),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the primes below each bound read from a file, one line per bound")]
    List {
        #[arg(help = "File with one bound per line")]
        file: PathBuf,
    },
    #[command(about = "Print how many primes lie below each bound")]
    Count {
        #[arg(required = true, allow_negative_numbers = true, help = "Exclusive upper bounds")]
        bounds: Vec<i64>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let sieve = match Sieve::new(cli.tuning.into_config()) {
        Ok(sieve) => sieve,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    log::debug!("sieve configuration: {:?}", sieve.config());

    let start = Instant::now();
    let (subcommand, args, result) = match cli.command {
        Commands::List { file } => {
            let args = file.display().to_string();
            ("list", args, run_list(&sieve, &file))
        }
        Commands::Count { bounds } => {
            let args = bounds
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            ("count", args, run_count(&sieve, &bounds))
        }
    };
    let duration_us = start.elapsed().as_micros();
    log::info!(
        "{} finished in {}us ({:.2}ms)",
        subcommand,
        duration_us,
        duration_us as f64 / 1000.0
    );

    if let Err(e) = storage::log_execution(subcommand, &args, duration_us) {
        log::warn!("Failed to log execution: {}", e);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_list(sieve: &Sieve, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    // Parsing is strict: one bad line aborts before anything is printed
    let bounds = storage::read_bounds(file)?;

    let stdout = io::stdout();
    let mut writer = BufWriter::with_capacity(128 * 1024, stdout.lock());
    for bound in bounds {
        let count = storage::count_or_list_primes(sieve, bound, true, &mut writer)?;
        log::debug!("bound {}: {} primes listed", bound, count);
    }
    writer.flush()?;
    Ok(())
}

fn run_count(sieve: &Sieve, bounds: &[i64]) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    let mut itoa_buf = itoa::Buffer::new();
    for &bound in bounds {
        let count = storage::count_or_list_primes(sieve, bound, false, &mut writer)?;
        writer.write_all(itoa_buf.format(count).as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
