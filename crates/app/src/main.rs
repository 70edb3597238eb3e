use std::fmt;

use services::{AppServices, Clock, ComposeOptions, ComposeRequest, TrainingConfig};
use woodpecker_core::model::SetId;

mod train;

const DEFAULT_DB_URL: &str = "sqlite://woodpecker.sqlite3?mode=rwc";
const DEFAULT_LIST_LIMIT: u32 = 20;

#[derive(Debug, PartialEq, Eq)]
enum ArgsError {
    MissingCommand,
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidSetId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingCommand => write!(f, "missing subcommand"),
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidSetId { raw } => write!(f, "invalid --set-id value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
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

fn parse_number<T: std::str::FromStr>(raw: String, flag: &'static str) -> Result<T, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn parse_set_id(raw: String) -> Result<SetId, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidSetId { raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  woodpecker create --rating <elo> --size <n> --repeats <n> [--allow-partial] [--db <url>]");
    eprintln!("  woodpecker train  --set-id <id> [--db <url>]");
    eprintln!("  woodpecker stats  --set-id <id> [--db <url>]");
    eprintln!("  woodpecker sets   [--limit <n>] [--db <url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db {DEFAULT_DB_URL}");
    eprintln!("  --limit {DEFAULT_LIST_LIMIT}");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  WOODPECKER_DB_URL, RUST_LOG");
    eprintln!("  WOODPECKER_REPLY_PAUSE_MS, WOODPECKER_REPLAY_PAUSE_MS");
    eprintln!("  WOODPECKER_PERSISTENCE (optimistic|strict)");
    eprintln!("  WOODPECKER_CACHE_CAPACITY, WOODPECKER_MAX_SET_SIZE");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Create,
    Train,
    Stats,
    Sets,
}

impl CommandKind {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "create" => Some(Self::Create),
            "train" => Some(Self::Train),
            "stats" => Some(Self::Stats),
            "sets" => Some(Self::Sets),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Create {
        request: ComposeRequest,
        options: ComposeOptions,
    },
    Train { set_id: SetId },
    Stats { set_id: SetId },
    Sets { limit: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    db_url: String,
    command: Command,
}

impl Args {
    fn parse(
        kind: CommandKind,
        args: &mut impl Iterator<Item = String>,
        env_db_url: Option<String>,
    ) -> Result<Self, ArgsError> {
        let mut db_url = env_db_url.map_or_else(|| DEFAULT_DB_URL.to_string(), normalize_sqlite_url);
        let mut rating: Option<u32> = None;
        let mut size: Option<usize> = None;
        let mut repeats: Option<u32> = None;
        let mut allow_partial = false;
        let mut set_id: Option<SetId> = None;
        let mut limit = DEFAULT_LIST_LIMIT;

        while let Some(arg) = args.next() {
            match (kind, arg.as_str()) {
                (_, "--db") => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                (CommandKind::Create, "--rating") => {
                    rating = Some(parse_number(require_value(args, "--rating")?, "--rating")?);
                }
                (CommandKind::Create, "--size") => {
                    size = Some(parse_number(require_value(args, "--size")?, "--size")?);
                }
                (CommandKind::Create, "--repeats") => {
                    repeats = Some(parse_number(require_value(args, "--repeats")?, "--repeats")?);
                }
                (CommandKind::Create, "--allow-partial") => allow_partial = true,
                (CommandKind::Train | CommandKind::Stats, "--set-id") => {
                    set_id = Some(parse_set_id(require_value(args, "--set-id")?)?);
                }
                (CommandKind::Sets, "--limit") => {
                    limit = parse_number(require_value(args, "--limit")?, "--limit")?;
                }
                (_, "--help" | "-h") => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let command = match kind {
            CommandKind::Create => Command::Create {
                request: ComposeRequest {
                    target_rating: rating.ok_or(ArgsError::MissingFlag { flag: "--rating" })?,
                    size: size.ok_or(ArgsError::MissingFlag { flag: "--size" })?,
                    repeats: repeats.ok_or(ArgsError::MissingFlag { flag: "--repeats" })?,
                },
                options: ComposeOptions { allow_partial },
            },
            CommandKind::Train => Command::Train {
                set_id: set_id.ok_or(ArgsError::MissingFlag { flag: "--set-id" })?,
            },
            CommandKind::Stats => Command::Stats {
                set_id: set_id.ok_or(ArgsError::MissingFlag { flag: "--set-id" })?,
            },
            CommandKind::Sets => Command::Sets { limit },
        };

        Ok(Self { db_url, command })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}?mode=rwc", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let kind = match argv.next().as_deref() {
        None => {
            print_usage();
            return Err(ArgsError::MissingCommand.into());
        }
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => CommandKind::from_arg(first).ok_or_else(|| {
            print_usage();
            ArgsError::UnknownArg(first.to_string())
        })?,
    };

    let parsed = Args::parse(kind, &mut argv, std::env::var("WOODPECKER_DB_URL").ok()).map_err(
        |e| {
            eprintln!("{e}");
            print_usage();
            e
        },
    )?;

    prepare_sqlite_file(&parsed.db_url)?;
    let config = TrainingConfig::from_env();
    log::debug!("opening {} with {config:?}", parsed.db_url);
    let services = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock(), config).await?;

    match parsed.command {
        Command::Create { request, options } => {
            let composed = services
                .composer()
                .compose_and_create(request, options)
                .await?;
            let set = &composed.set;
            println!(
                "created set {} with {} puzzles around {} ({} repeats)",
                set.id(),
                set.size(),
                set.target_rating(),
                set.repeats()
            );
            if composed.is_partial() {
                println!(
                    "only {} of {} requested puzzles were available",
                    set.size(),
                    composed.requested
                );
            }
        }
        Command::Train { set_id } => {
            train::run_session(&services, set_id).await?;
        }
        Command::Stats { set_id } => {
            let report = services.accuracy().report(set_id).await?;
            println!(
                "set {} around {}: {} puzzles x {} repeats",
                report.set_id, report.target_rating, report.size, report.repeats
            );
            if report.is_complete {
                println!("status: complete");
            } else {
                println!(
                    "status: repeat {} of {}, puzzle {} of {}",
                    report.progress.repeat_index + 1,
                    report.repeats,
                    report.progress.puzzle_index + 1,
                    report.size
                );
            }
            if report.cycles.is_empty() {
                println!("no attempts recorded yet");
            }
            for cycle in &report.cycles {
                let accuracy = cycle
                    .accuracy_percent
                    .map_or_else(|| "-".to_string(), |p| format!("{p:.1}%"));
                println!(
                    "  repeat {:>2}: {:>3} correct  {:>3} incorrect  accuracy {:>6}  time {}s",
                    cycle.repeat_index + 1,
                    cycle.correct,
                    cycle.incorrect,
                    accuracy,
                    cycle.time_taken_secs
                );
            }
        }
        Command::Sets { limit } => {
            let sets = services.accuracy().list_sets(limit).await?;
            if sets.is_empty() {
                println!("no sets yet; create one with `woodpecker create`");
            }
            for set in &sets {
                let status = if set.is_complete {
                    "complete".to_string()
                } else {
                    format!(
                        "repeat {}/{} puzzle {}/{}",
                        set.progress.repeat_index + 1,
                        set.repeats,
                        set.progress.puzzle_index + 1,
                        set.size
                    )
                };
                println!(
                    "{:>4}  rating {:>4}  size {:>3}  {}  created {}",
                    set.set_id.value(),
                    set.target_rating,
                    set.size,
                    status,
                    set.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
