//! Loader CLI - validates an academic records file and loads it
//!
//! Exit status is 0 when the file was loaded (or would be, with
//! `--dry-run`) and 1 when it was rejected.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};

use loader::config::Config;
use loader::logging::{self, LogFormat};
use loader::{EntityKind, Orchestrator, PgStore, TenantContext};

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Validates and loads academic records files")]
struct Args {
    /// Entity type contained in the file
    #[arg(long, value_enum, required_unless_present = "init_schema")]
    entity: Option<EntityKind>,

    /// CSV or spreadsheet file to load
    #[arg(long, required_unless_present = "init_schema")]
    file: Option<PathBuf>,

    /// Institution code to load on behalf of (omit for platform scope)
    #[arg(long)]
    institution: Option<String>,

    /// Recorded as the uploader in the audit trail
    #[arg(long, default_value = "cli")]
    uploaded_by: String,

    /// Dry run - validate and ingest, then roll back
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Abort the file when a reference no longer resolves (repeatable)
    #[arg(long, value_enum)]
    strict: Vec<EntityKind>,

    /// Print the outcome as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    /// Create missing tables before loading
    #[arg(long, default_value = "false")]
    init_schema: bool,

    /// Log output format (overrides LOADER_LOG_FORMAT)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::from_env()?;
    logging::init(args.log_format.unwrap_or(config.log_format), args.verbose)?;

    let store = PgStore::connect(&config.db_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;

    if args.init_schema {
        store
            .ensure_schema()
            .await
            .context("Failed to apply schema")?;
        tracing::info!("schema applied");
    }

    let (kind, path) = match (args.entity, args.file.as_deref()) {
        (Some(kind), Some(path)) => (kind, path),
        (None, None) if args.init_schema => return Ok(()),
        _ => bail!("--entity and --file must be given together"),
    };

    let tenant = match &args.institution {
        Some(code) => TenantContext::resolve(&store, code, &args.uploaded_by)
            .await
            .context("Failed to look up institution")?
            .with_context(|| format!("Unknown institution '{}'", code))?,
        None => TenantContext::platform(&args.uploaded_by),
    };

    let orchestrator = Orchestrator::new(store)
        .with_policies(config.policies(args.strict.iter().copied()))
        .dry_run(args.dry_run);

    let outcome = orchestrator
        .process(kind, path, &tenant)
        .await
        .context("Failed to record import outcome")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.summary());
    }

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
