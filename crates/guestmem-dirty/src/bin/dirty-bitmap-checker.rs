//! Generates or verifies a dirty page bitmap against two memory snapshots.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context as _, bail};
use clap::Parser;
use guestmem_dirty::{
    BitmapFile, CheckOptions, ScanGeometry, Snapshot, SnapshotSource, check, generate,
};

#[derive(Parser, Debug)]
#[command(
    name = "dirty-bitmap-checker",
    about = "Verify a dirty page bitmap against two memory snapshots.",
    override_usage = "dirty-bitmap-checker [OPTIONS] [generate|cont_after_mismatch] <MEM_A> <MEM_B> <BITMAP> <ADDR> <SIZE> [PAGE_SIZE [BITMAP_START]]",
    after_help = "Bit N of the bitmap belongs to page N of guest memory, counted from \
                  address 0, so a range starting at ADDR begins at bit ADDR / PAGE_SIZE. \
                  Bitmaps numbered from the start of the range instead only agree when \
                  ADDR is a multiple of 8 pages."
)]
struct Args {
    /// Operands: optional mode, snapshots, bitmap, range and granularity
    #[arg(required = true, num_args = 5..=8, value_name = "ARGS")]
    operands: Vec<String>,

    /// Map the snapshots into memory instead of reading them
    #[arg(long, action = clap::ArgAction::SetTrue)]
    mmap: bool,

    /// Number of bytes read from each snapshot at once
    #[arg(long, value_name = "BYTES", value_parser = parse_number)]
    block_size: Option<u64>,

    /// List clean pages marked dirty; repeat to raise the log level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Generate,
    Check { stop_on_mismatch: bool },
}

#[derive(Debug)]
struct Operands {
    mode: Mode,
    a: PathBuf,
    b: PathBuf,
    bitmap: PathBuf,
    geometry: ScanGeometry,
}

fn parse_number(value: &str) -> Result<u64, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };

    parsed.map_err(|err| format!("invalid number '{value}': {err}"))
}

fn number(value: &str, name: &str) -> anyhow::Result<u64> {
    parse_number(value)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("invalid {name}"))
}

fn parse_operands(operands: &[String]) -> anyhow::Result<Operands> {
    let (mode, rest) = match operands.first().map(String::as_str) {
        Some("generate") => (Mode::Generate, &operands[1..]),
        Some("cont_after_mismatch") => (
            Mode::Check {
                stop_on_mismatch: false,
            },
            &operands[1..],
        ),
        _ => (
            Mode::Check {
                stop_on_mismatch: true,
            },
            operands,
        ),
    };

    let [a, b, bitmap, base, size, tail @ ..] = rest
    else {
        bail!("expected at least 5 operands after the mode, got {}", rest.len());
    };

    let base = number(base, "address")?;
    let size = number(size, "size")?;

    let page_size = match tail.first() {
        Some(page_size) => number(page_size, "page size")?,
        None => ScanGeometry::DEFAULT_PAGE_SIZE,
    };

    match tail {
        [] | [_] => {}
        [_, bitmap_start] => {
            let bitmap_start = number(bitmap_start, "bitmap start")?;
            if bitmap_start != base {
                bail!(
                    "bitmap start {bitmap_start:#x} differs from address {base:#x}, \
                     the bitmap must start at the same address as the snapshots"
                );
            }
        }
        _ => bail!("too many operands"),
    }

    Ok(Operands {
        mode,
        a: a.into(),
        b: b.into(),
        bitmap: bitmap.into(),
        geometry: ScanGeometry::new(base, size).with_page_size(page_size),
    })
}

fn open_snapshot(path: &Path, mmap: bool) -> anyhow::Result<Snapshot> {
    let snapshot = if mmap {
        Snapshot::map(path)?
    }
    else {
        Snapshot::open(path)?
    };

    tracing::debug!(path = %path.display(), len = snapshot.len(), mmap, "snapshot opened");
    Ok(snapshot)
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let operands = parse_operands(&args.operands)?;

    let mut geometry = operands.geometry;
    if let Some(block_size) = args.block_size {
        geometry = geometry.with_block_size(block_size);
    }

    geometry.validate().context("invalid scan range")?;

    let a = open_snapshot(&operands.a, args.mmap)?;
    let b = open_snapshot(&operands.b, args.mmap)?;

    match operands.mode {
        Mode::Generate => {
            let mut bitmap = BitmapFile::create(&operands.bitmap)?;
            let report = generate(&a, &b, &mut bitmap, &geometry)
                .with_context(|| format!("generate bitmap {}", operands.bitmap.display()))?;

            println!("{report}");
            Ok(ExitCode::SUCCESS)
        }
        Mode::Check { stop_on_mismatch } => {
            let bitmap = BitmapFile::open(&operands.bitmap)?;
            let options = CheckOptions::new(geometry)
                .with_stop_on_mismatch(stop_on_mismatch)
                .with_report_over_marked(args.verbose > 0);

            let report = check(&a, &b, &bitmap, &options)
                .with_context(|| format!("check bitmap {}", operands.bitmap.display()))?;

            println!("{report}");

            if report.is_consistent() {
                Ok(ExitCode::SUCCESS)
            }
            else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return Ok(if err.use_stderr() {
                ExitCode::FAILURE
            }
            else {
                ExitCode::SUCCESS
            });
        }
    };

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(args)
}
