use std::collections::BTreeMap;
use std::fmt;

use storage::repository::Storage;
use woodpecker_core::model::{DifficultyBand, PuzzleId, PuzzleRecord};

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    csv_path: String,
    limit: Option<usize>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingCsv,
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidLimit { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingCsv => write!(f, "--csv is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidLimit { raw } => write!(f, "invalid --limit value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("WOODPECKER_DB_URL")
            .unwrap_or_else(|_| "sqlite://woodpecker.sqlite3?mode=rwc".into());
        let mut csv_path = std::env::var("WOODPECKER_PUZZLE_CSV").ok();
        let mut limit = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--csv" => {
                    csv_path = Some(require_value(&mut args, "--csv")?);
                }
                "--limit" => {
                    let value = require_value(&mut args, "--limit")?;
                    let parsed = value
                        .parse::<usize>()
                        .map_err(|_| ArgsError::InvalidLimit { raw: value.clone() })?;
                    limit = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            csv_path: csv_path.ok_or(ArgsError::MissingCsv)?,
            limit,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- --csv <path> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --csv <path>              Lichess puzzle export (PuzzleId,FEN,Moves,Rating,...)");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://woodpecker.sqlite3?mode=rwc)");
    eprintln!("  --limit <n>               Stop after importing n puzzles");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  WOODPECKER_DB_URL, WOODPECKER_PUZZLE_CSV");
}

/// Parse one export row. The header row and malformed rows yield `None`.
fn parse_row(line: &str) -> Option<PuzzleRecord> {
    let mut fields = line.split(',');
    let id = fields.next()?.trim();
    let fen = fields.next()?.trim();
    let moves = fields.next()?.trim();
    let rating = fields.next()?.trim().parse::<u32>().ok()?;

    let id = PuzzleId::new(id).ok()?;
    match PuzzleRecord::from_lichess(id, fen, moves, rating) {
        Ok(puzzle) => Some(puzzle),
        Err(err) => {
            log::debug!("skipping puzzle row: {err}");
            None
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let raw = tokio::fs::read_to_string(&args.csv_path).await?;
    let storage = Storage::sqlite(&args.db_url).await?;

    let mut imported = 0_usize;
    let mut skipped = 0_usize;
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        if args.limit.is_some_and(|limit| imported >= limit) {
            break;
        }
        match parse_row(line) {
            Some(puzzle) => {
                storage.catalog.upsert_puzzle(&puzzle).await?;
                imported += 1;
            }
            None => skipped += 1,
        }
    }

    let mut per_band = BTreeMap::new();
    for band in DifficultyBand::ALL {
        per_band.insert(band, storage.catalog.count_by_band(band).await?);
    }

    println!(
        "Imported {imported} puzzles into {} ({skipped} rows skipped)",
        args.db_url
    );
    for (band, count) in per_band {
        println!("  {band:<12} {count}");
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
