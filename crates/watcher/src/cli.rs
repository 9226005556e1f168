//! Command-line interface for witness.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, bail};
use std::io::Write;
use std::path::PathBuf;
use witness::{EventKind, Recursion};
use witness_decoder::decode;

/// Witness - watch directory trees through inotify and print what changes
#[derive(Debug, Parser)]
#[command(name = "witness")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "WITNESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "WITNESS_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch paths and print events until interrupted
    Watch {
        /// Paths to watch (defaults to the [[watch]] entries of the config)
        paths: Vec<PathBuf>,

        /// Levels of sub-directories to watch
        #[arg(short, long, conflicts_with = "no_recursive")]
        depth: Option<u32>,

        /// Watch only the given paths, not their sub-directories
        #[arg(long)]
        no_recursive: bool,

        /// Event kinds to report (comma separated)
        #[arg(short, long, value_enum, value_delimiter = ',')]
        events: Vec<EventKind>,

        /// Only report events on files
        #[arg(long, conflicts_with = "dirs_only")]
        files_only: bool,

        /// Only report events on directories
        #[arg(long)]
        dirs_only: bool,
    },

    /// Decode a captured inotify read buffer and print its records
    Decode {
        /// File holding the raw bytes of one or more reads
        file: PathBuf,
    },
}

/// Recursion requested by `watch` flags.
pub fn recursion(depth: Option<u32>, no_recursive: bool) -> Recursion {
    if no_recursive {
        Recursion::None
    } else if let Some(depth) = depth {
        Recursion::WithDepth(depth)
    } else {
        Recursion::Unlimited
    }
}

/// Write one line per record of `bytes` and return how many were decoded.
///
/// Fails on the first malformed record; lines for the records before it are
/// already written.
pub fn write_records(bytes: &[u8], out: &mut impl Write) -> Result<usize> {
    let mut records = decode(bytes, bytes.len());
    let mut count = 0usize;

    loop {
        let offset = records.consumed();
        match records.next() {
            Some(Ok(event)) => {
                writeln!(
                    out,
                    "offset={} wd={} mask={:?} cookie={} name={:?}",
                    offset,
                    event.wd,
                    event.event_mask(),
                    event.cookie,
                    event.name_lossy()
                )?;
                count += 1;
            }
            Some(Err(e)) => bail!("after {count} records: {e}"),
            None => return Ok(count),
        }
    }
}
