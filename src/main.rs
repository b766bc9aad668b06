use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use crimestat::api;
use crimestat::db::CrimeDb;
use crimestat::load::{self, LoadError};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_FILE: &str = "crime_rate.sqlite";

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<rusqlite::Error> for CliError {
    fn from(value: rusqlite::Error) -> Self {
        Self::new("sqlite_error", value.to_string())
    }
}

impl From<LoadError> for CliError {
    fn from(value: LoadError) -> Self {
        let code = match &value {
            LoadError::Csv(_) => "csv_error",
            LoadError::Sql(_) => "sqlite_error",
            LoadError::Header(_) => "csv_header_error",
        };
        Self::new(code, value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "crimestat")]
#[command(about = "Suburb crime statistics: batch CSV loader and read-only query API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recreate the schema, load a crime-rate CSV, and build indexes.
    Load(LoadArgs),
    /// Serve the query API over an already-loaded database.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// CSV file: Suburb, Offence, Subcategory, then 288 monthly counts.
    csv: PathBuf,
    /// Database file; relative paths resolve against the executable.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Database file; relative paths resolve against the executable.
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Load(args) => cmd_load(args),
        Command::Serve(args) => cmd_serve(args),
    }
}

fn cmd_load(args: LoadArgs) -> Result<(), CliError> {
    let db_path = resolve_db_path(args.db)?;
    let db = CrimeDb::open(&db_path)?;
    db.recreate_schema()?;
    let report = load::load_csv(&db, &args.csv)?;
    db.create_indexes()?;

    print_json(&json!({
        "status": report.status(),
        "db": db_path,
        "rows_read": report.rows_read,
        "suburbs_created": report.suburbs_created,
        "categories_created": report.categories_created,
        "facts_inserted": report.facts_inserted,
        "failure_count": report.failures.len(),
        "failures": report.failures,
    }))
}

fn cmd_serve(args: ServeArgs) -> Result<(), CliError> {
    let db_path = resolve_db_path(args.db)?;
    if !db_path.exists() {
        return Err(CliError::new(
            "db_not_found",
            format!(
                "database `{}` not found; run `crimestat load` first",
                db_path.display()
            ),
        ));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::io("runtime_error", err))?;
    runtime
        .block_on(api::serve(db_path, &args.bind))
        .map_err(|err| CliError::io("serve_error", err))
}

fn resolve_db_path(db: Option<PathBuf>) -> Result<PathBuf, CliError> {
    let raw = db.unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
    if raw.is_absolute() {
        return Ok(raw);
    }
    let exe = std::env::current_exe().map_err(|err| CliError::io("exe_path_error", err))?;
    let dir = exe
        .parent()
        .ok_or_else(|| CliError::new("exe_path_error", "executable has no parent directory"))?;
    Ok(dir.join(raw))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
