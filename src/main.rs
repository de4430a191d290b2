//! stringdb - command-line interface
//!
//! A thin wrapper that imports JSON string files as working sets and prints
//! snapshots, logs and per-string history.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};

use stringdb::db::{Database, DatabaseConfig};
use stringdb::storage::{ChangeStatus, CommitMetadata, Key, StringId};
use stringdb::working::{StringRevision, WorkingSet};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Default)]
struct Args {
    path: Option<PathBuf>,
    verbose: bool,
    message: Option<String>,
    author: Option<String>,
    source: Option<String>,
    meta: Vec<(String, String)>,
    asof: Option<String>,
    replace: bool,
    positional: Vec<String>,
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let args = match parse_args(argv) {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(args.verbose) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    let path = args.path.clone().unwrap_or_else(|| PathBuf::from(".stringdb"));
    let config = DatabaseConfig::new(path).create_if_missing(true);
    let db = match Database::open_with_config(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error opening database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&db, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_args(argv: Vec<String>) -> Result<Option<Args>, String> {
    let mut args = Args::default();
    let mut iter = argv.into_iter();

    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .ok_or_else(|| format!("Missing value for {}", flag))
        };
        match arg.as_str() {
            "-d" | "--database" => args.path = Some(PathBuf::from(value(&arg)?)),
            "-m" | "--message" => args.message = Some(value(&arg)?),
            "--author" => args.author = Some(value(&arg)?),
            "--source" => args.source = Some(value(&arg)?),
            "--asof" => args.asof = Some(value(&arg)?),
            "--meta" => {
                let pair = value(&arg)?;
                let Some((field, text)) = pair.split_once('=') else {
                    return Err(format!("--meta expects KEY=VALUE, got {}", pair));
                };
                args.meta.push((field.to_string(), text.to_string()));
            }
            "--replace" => args.replace = true,
            "-v" | "--verbose" => args.verbose = true,
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "--version" => {
                println!("stringdb v{}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown option: {}", other));
            }
            _ => args.positional.push(arg.clone()),
        }
    }

    if args.positional.is_empty() {
        print_help();
        return Err("No command given".to_string());
    }
    Ok(Some(args))
}

fn init_tracing(verbose: bool) -> CliResult<()> {
    let level = if verbose { "stringdb=debug" } else { "stringdb=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn print_help() {
    println!("stringdb - A version-controlled store for localized strings");
    println!();
    println!("Usage: stringdb [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("Commands:");
    println!("  import <component> <language> <branch> <file.json>   Stage, rebase and commit a string file");
    println!("  snapshot <component> <language> <branch>             Print the strings of a key");
    println!("  diff <component> <language> <branch> <from> <to>     Show changes between two times");
    println!("  history <component> <language> <branch> <id>         Print every revision of one string");
    println!("  log [<component> <language> <branch>]                List commits, newest first");
    println!("  keys                                                 List keys with history");
    println!("  stats                                                Show database statistics");
    println!();
    println!("Options:");
    println!("  -d, --database PATH    Path to database directory (default: .stringdb)");
    println!("  -m, --message MSG      Commit message for import");
    println!("      --author NAME      Author recorded in commit metadata");
    println!("      --source TAG       Source tag recorded in commit metadata");
    println!("      --meta KEY=VALUE   Extra metadata field (repeatable)");
    println!("      --replace          Treat the imported file as complete (delete missing ids)");
    println!("      --asof TIME        RFC 3339 time bound for snapshot");
    println!("  -v, --verbose          Enable debug logging");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
}

fn run(db: &Database, args: &Args) -> CliResult<()> {
    let command = args.positional[0].as_str();
    let rest = &args.positional[1..];

    match command {
        "import" => {
            let [component, language, branch, file] = rest else {
                return Err("usage: import <component> <language> <branch> <file.json>".into());
            };
            let key = Key::parse(component.as_str(), language.as_str(), branch.as_str())?;
            let ws = read_working_set(key, PathBuf::from(file))?;

            let mut metadata = CommitMetadata::new();
            metadata.author = args.author.clone();
            metadata.source = args.source.clone().or_else(|| Some(file.clone()));
            for (field, text) in &args.meta {
                metadata = metadata.with(field.as_str(), text.as_str());
            }
            let message = args
                .message
                .clone()
                .unwrap_or_else(|| format!("Import {}", file));

            let written = db.import(ws, message, metadata, args.replace)?;
            if written.is_empty() {
                println!("No changes.");
            }
            for commit in written {
                println!("{} {} ({} revisions)", commit.id, commit.key, commit.revision_count);
            }
        }
        "snapshot" => {
            let key = parse_key(rest, 3)?;
            let ws = match &args.asof {
                Some(asof) => db.snapshot(&key, parse_time(asof)?)?,
                None => db.latest(&key)?,
            };
            for revision in &ws {
                println!("{}\t{}", revision.id(), format_text(revision));
            }
            println!("({} strings)", ws.len());
        }
        "diff" => {
            let key = parse_key(rest, 5)?;
            let from = parse_time(&rest[3])?;
            let to = parse_time(&rest[4])?;
            for change in db.reader().diff(&key, from, to)? {
                let marker = match change.status {
                    ChangeStatus::Added => "A",
                    ChangeStatus::Modified => "M",
                    ChangeStatus::Deleted => "D",
                };
                println!("{}\t{}", marker, change.id);
            }
        }
        "history" => {
            let key = parse_key(rest, 4)?;
            let id = StringId::new(rest[3].as_str())?;
            for row in db.reader().string_history(&key, &id)? {
                let text = if row.deleted {
                    "<deleted>".to_string()
                } else {
                    row.text.clone().unwrap_or_else(|| "NULL".to_string())
                };
                println!("{}\t{}\t{}", row.timestamp.to_rfc3339(), row.commit_id, text);
            }
        }
        "log" => {
            let key = if rest.is_empty() {
                None
            } else {
                Some(parse_key(rest, 3)?)
            };
            for commit in db.history(key.as_ref())? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    commit.id,
                    commit.timestamp.to_rfc3339(),
                    commit.key,
                    commit.metadata.author.as_deref().unwrap_or("-"),
                    commit.summary()
                );
            }
        }
        "keys" => {
            for key in db.keys()? {
                println!("{}\t{}\t{}", key.component, key.language, key.branch);
            }
        }
        "stats" => print!("{}", db.stats()?),
        other => return Err(format!("unknown command: {}", other).into()),
    }

    Ok(())
}

fn parse_key(rest: &[String], expected: usize) -> CliResult<Key> {
    if rest.len() != expected {
        return Err(format!("expected {} arguments, got {}", expected, rest.len()).into());
    }
    Ok(Key::parse(rest[0].as_str(), rest[1].as_str(), rest[2].as_str())?)
}

fn parse_time(value: &str) -> CliResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

/// Entries of a string file in document order, duplicates included.
struct StringFile(Vec<(String, Option<String>)>);

impl<'de> Deserialize<'de> for StringFile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = StringFile;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object mapping string ids to text or null")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<StringFile, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Option<String>>()? {
                    entries.push(entry);
                }
                Ok(StringFile(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Read a JSON object mapping string ids to text (or `null`).
fn read_working_set(key: Key, file: PathBuf) -> CliResult<WorkingSet> {
    let bytes = std::fs::read(&file)?;
    parse_working_set(key, &bytes).map_err(|e| format!("{}: {}", file.display(), e).into())
}

/// A repeated id is an error rather than a silent overwrite.
fn parse_working_set(key: Key, bytes: &[u8]) -> CliResult<WorkingSet> {
    let StringFile(entries) = serde_json::from_slice(bytes)?;

    let mut ws = WorkingSet::new(key);
    for (id, text) in entries {
        let id = StringId::new(id)?;
        let revision = match text {
            Some(text) => StringRevision::new(id, text),
            None => StringRevision::absent(id),
        };
        ws.add(revision, false)?;
    }
    Ok(ws)
}

fn format_text(revision: &StringRevision) -> String {
    match revision.text() {
        Some(text) => text.replace('\n', "\\n"),
        None => "NULL".to_string(),
    }
}
