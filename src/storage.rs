use chrono::Local;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::num::ParseIntError;
use std::path::{Path, PathBuf};

use crate::sieve::{Sieve, SieveError};

pub const SEPARATOR: &[u8] = b",";

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}:{line}: invalid bound {text:?}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        text: String,
        #[source]
        source: ParseIntError,
    },
}

pub fn get_data_dir() -> Option<PathBuf> {
    let xdg_data_home = env::var("XDG_DATA_HOME")
        .ok()
        .and_then(|path| {
            if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            }
        })
        .or_else(|| {
            env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".local/share"))
        })?;

    Some(xdg_data_home.join("primelist"))
}

pub fn log_execution(subcommand: &str, args: &str, duration_us: u128) -> io::Result<()> {
    let data_dir = get_data_dir().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "could not determine data directory")
    })?;
    fs::create_dir_all(&data_dir)?;

    let log_path = data_dir.join("execution_log.txt");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");

    writeln!(file, "{} | {} | {} | {}us", timestamp, subcommand, args, duration_us)?;

    Ok(())
}

/// Reads one bound per line, skipping blank lines.
pub fn read_bounds(path: &Path) -> Result<Vec<i64>, InputError> {
    let read_err = |source| InputError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).map_err(read_err)?;
    parse_bounds(BufReader::new(file), path)
}

fn parse_bounds(reader: impl BufRead, path: &Path) -> Result<Vec<i64>, InputError> {
    let mut bounds = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| InputError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let bound = text.parse::<i64>().map_err(|source| InputError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            text: text.to_string(),
            source,
        })?;
        bounds.push(bound);
    }
    Ok(bounds)
}

/// Counts the primes below `bound`; with `emit`, also writes them to `out`
/// as one comma-separated line.
///
/// Returns the prime count. A bound without primes still produces an empty
/// line when emitting.
pub fn count_or_list_primes(
    sieve: &Sieve,
    bound: i64,
    emit: bool,
    out: &mut impl Write,
) -> Result<u64, SieveError> {
    if !emit {
        return sieve.count(bound);
    }

    // Write errors can't escape the callback, so keep the first one
    let mut write_result = Ok(());
    let mut first = true;
    let mut itoa_buf = itoa::Buffer::new();
    let count = sieve.list(bound, |prime| {
        if write_result.is_err() {
            return;
        }
        if !first {
            write_result = out.write_all(SEPARATOR);
        }
        first = false;
        if write_result.is_ok() {
            write_result = out.write_all(itoa_buf.format(prime).as_bytes());
        }
    })?;
    write_result?;
    out.write_all(b"\n")?;

    Ok(count)
}
