//! CLI for the okq-records time-series records store.
//!
//! Provides commands for initializing a store, ingesting readings and
//! inspecting stored data and the latest-value cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use okq_records::timestamp::{self, parse_instant};
use okq_records::{
    Batch, GroupedRecord, Observation, RecordsError, RecordsStore, Settings, create_store,
    group_observations,
};
use tracing_subscriber::EnvFilter;

/// okq-records: per-entity time-series records store CLI.
#[derive(Parser)]
#[command(name = "okq-records", version, about)]
struct Cli {
    /// Settings file (JSON). Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the records table if it does not exist.
    Init,

    /// Write readings from a JSON file.
    ///
    /// An object maps entity ids to lists of `{"ts", "fields"}` readings; an
    /// array holds flat `{"ts", "entity_id", "field", "value"}` observations.
    Write {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Query readings of an entity over a time range.
    Query {
        /// Entity id.
        entity: String,

        /// Range start, inclusive (RFC 3339 or `YYYY-MM-DDTHH:MM:SS` UTC).
        #[arg(long)]
        start: String,

        /// Range end, inclusive.
        #[arg(long)]
        end: String,

        /// Restrict to these fields (repeatable).
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Treat the entity id as already stored (no key prefix applied).
        #[arg(long)]
        raw: bool,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Show the cached latest reading of an entity.
    Latest {
        /// Entity id.
        entity: String,

        /// Read the cache entry under the raw entity id.
        #[arg(long)]
        raw: bool,
    },

    /// Show engine and row count.
    Stats,
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated `ts,field,value` rows.
    Csv,
    /// JSON array of grouped records.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let result = load_settings(cli.config.as_deref()).and_then(|settings| {
        init_tracing(cli.verbose || settings.debug);
        let store = open_store(&settings)?;

        match cli.command {
            Commands::Init => cmd_init(&store),
            Commands::Write { file } => cmd_write(&store, &file),
            Commands::Query {
                entity,
                start,
                end,
                fields,
                raw,
                format,
            } => cmd_query(&store, &entity, &start, &end, &fields, raw, &format),
            Commands::Latest { entity, raw } => cmd_latest(&store, &entity, raw),
            Commands::Stats => cmd_stats(&store),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Installs the log subscriber. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Settings::from_json_file(path)?),
        None => Ok(Settings::default()),
    }
}

fn open_store(settings: &Settings) -> Result<RecordsStore, Box<dyn std::error::Error>> {
    let cache = Arc::new(settings.open_cache().map_err(RecordsError::from)?);
    tracing::debug!(cache = %settings.cache.display(), "latest cache opened");
    Ok(create_store(&settings.databases.records, cache)?)
}

/// Implements `okq-records init`.
fn cmd_init(store: &RecordsStore) -> Result<(), Box<dyn std::error::Error>> {
    store.initialize_schema()?;
    println!("Initialized records table (engine={})", store.engine());
    Ok(())
}

/// Implements `okq-records write <file>`.
fn cmd_write(store: &RecordsStore, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(file)
        .map_err(|e| format!("cannot read '{}': {e}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&data)?;

    let batch: Batch = match value {
        serde_json::Value::Array(_) => {
            let observations: Vec<Observation> = serde_json::from_value(value)?;
            group_observations(observations)
        }
        serde_json::Value::Object(_) => serde_json::from_value(value)?,
        _ => return Err("expected a JSON object (batch) or array (observations)".into()),
    };

    store.initialize_schema()?;
    let summary = store.write_batch(&batch)?;

    println!("Entities: {}", summary.entities);
    println!("  Inserted: {}", summary.inserted);
    println!("  Duplicates skipped: {}", summary.duplicates);
    println!("  Filtered by latest cache: {}", summary.filtered);
    Ok(())
}

/// Implements `okq-records query <entity>`.
fn cmd_query(
    store: &RecordsStore,
    entity: &str,
    start: &str,
    end: &str,
    fields: &[String],
    raw: bool,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = parse_instant(start).map_err(RecordsError::from)?;
    let end = parse_instant(end).map_err(RecordsError::from)?;
    let names: Vec<&str> = fields.iter().map(String::as_str).collect();
    let filter = if names.is_empty() {
        None
    } else {
        Some(names.as_slice())
    };

    let result = if raw {
        store.query_range_raw(entity, start, end, filter)?
    } else {
        store.query_range(entity, start, end, filter)?
    };
    let storage_id = result.storage_id().to_string();
    let rows_scanned = result.rows_scanned();
    let records: Vec<GroupedRecord> = result.collect();

    match format {
        OutputFormat::Csv => {
            println!(
                "# entity={entity}, stored_as={storage_id}, records={}, rows={rows_scanned}",
                records.len()
            );
            println!("ts,field,value");
            for record in &records {
                let ts = timestamp::encode(&record.ts);
                for (field, value) in &record.fields {
                    match value {
                        Some(v) => println!("{ts},{field},{v}"),
                        None => println!("{ts},{field},"),
                    }
                }
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "entity": entity,
                "stored_as": storage_id,
                "count": records.len(),
                "data": records,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `okq-records latest <entity>`.
fn cmd_latest(
    store: &RecordsStore,
    entity: &str,
    raw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let entry = if raw {
        store.latest_raw(entity)
    } else {
        store.latest(entity)
    };

    match entry {
        Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
        None => println!("No latest entry for '{entity}'"),
    }
    Ok(())
}

/// Implements `okq-records stats`. Read-only: a missing table is reported,
/// not created.
fn cmd_stats(store: &RecordsStore) -> Result<(), Box<dyn std::error::Error>> {
    println!("Engine: {}", store.engine());
    match store.key_context().prefix() {
        Some(prefix) => println!("Key prefix: {prefix}"),
        None => println!("Key prefix: none"),
    }
    println!("Latest cache key: {}", store.latest_cache().template());

    match store.row_count() {
        Ok(count) => println!("Rows: {count}"),
        Err(RecordsError::NotImplemented { .. }) => println!("Rows: unknown"),
        Err(e) => println!("Rows: unavailable ({e})"),
    }
    Ok(())
}
