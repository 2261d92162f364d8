//! Ingestor CLI: run one archive ingestion batch from the command line.
//!
//! Storage comes from STORAGE_BACKEND and friends (see `StorageConfig`),
//! limits from the INGEST_* variables. Both may live in a `.env` file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ingestor_cli::{check_entry, init_tracing, load_environment, AbortReport};
use ingestor_core::{BatchContext, IngestConfig, StorageConfig, TracingAuditSink};
use ingestor_services::{ArchiveIngestor, ArchiveInput};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ingestor", about = "Archive ingestion into tenant-scoped object storage")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract an archive into storage and print the result
    Ingest {
        /// Path to a .zip, .tar or .tar.gz archive
        archive: PathBuf,
        /// Tenant that owns the extracted objects
        #[arg(long)]
        tenant: Uuid,
        /// Key prefix; defaults to ingest/{tenant}
        #[arg(long)]
        prefix: Option<String>,
        /// Read the archive as a single-pass stream instead of seeking
        #[arg(long)]
        stream: bool,
    },
    /// Show how one entry name would be treated before its content is read
    Check {
        /// Entry name as it appears inside the archive
        name: String,
        /// Declared (uncompressed) size in bytes
        #[arg(long, default_value = "0")]
        size: u64,
        /// Compressed size in bytes; defaults to the declared size
        #[arg(long)]
        compressed: Option<u64>,
    },
}

fn print_json(value: &impl Serialize, pretty: bool) -> anyhow::Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

async fn ingest(
    archive: PathBuf,
    tenant: Uuid,
    prefix: Option<String>,
    stream: bool,
    pretty: bool,
) -> anyhow::Result<ExitCode> {
    let config = IngestConfig::from_env().context("Invalid INGEST_* configuration")?;
    let storage_config = StorageConfig::from_env().context("Invalid storage configuration")?;
    let storage = ingestor_storage::create_storage(&storage_config)
        .await
        .context("Failed to initialize storage backend")?;

    let input = if stream {
        let file = std::fs::File::open(&archive)
            .with_context(|| format!("Failed to open {}", archive.display()))?;
        ArchiveInput::stream(std::io::BufReader::new(file))
    } else {
        ArchiveInput::open_file(&archive)
            .with_context(|| format!("Failed to open {}", archive.display()))?
    };

    let mut ctx = BatchContext::new(tenant, Arc::new(config));
    if let Some(prefix) = prefix {
        ctx = ctx.with_key_prefix(prefix);
    }

    let ingestor = ArchiveIngestor::new(storage).with_audit_sink(Arc::new(TracingAuditSink));
    match ingestor.ingest(&ctx, input).await {
        Ok(result) => {
            print_json(&result, pretty)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            print_json(&AbortReport::from(&err), pretty)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let log_format = load_environment(None);
    init_tracing(log_format);

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            archive,
            tenant,
            prefix,
            stream,
        } => ingest(archive, tenant, prefix, stream, cli.pretty).await,
        Commands::Check {
            name,
            size,
            compressed,
        } => {
            let config = IngestConfig::from_env().context("Invalid INGEST_* configuration")?;
            let report = check_entry(Arc::new(config), &name, size, compressed.unwrap_or(size))?;
            print_json(&report, cli.pretty)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
