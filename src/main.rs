//! DSIS command line client
//!
//! Runs queries, downloads bulk data and checks connectivity against the
//! DSIS API. Records go to stdout as JSON lines; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dsis_client::odata::{DEFAULT_BULK_ACCEPT, DEFAULT_CHUNK_SIZE};
use dsis_client::{Config, DsisClient, DsisError, ExecuteOptions, QueryBuilder, Record};
use futures::{Stream, TryStreamExt};
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "dsis-client", version, about = "Query the DSIS OData API")]
struct Cli {
    /// Path to a TOML config file (defaults to $DSIS_CONFIG or ./dsis.toml)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a query and print one JSON record per line
    Query(QueryArgs),
    /// Download an entity's binary data to a file
    Bulk(BulkArgs),
    /// Check that the data endpoint is reachable
    Check,
}

#[derive(Args)]
struct Target {
    /// District id, e.g. OpenWorks_OW_SV4TSTA_SingleSource-OW_SV4TSTA
    #[clap(long)]
    district: String,
    /// Project (field) name
    #[clap(long)]
    project: String,
    /// Schema to query
    #[clap(long)]
    schema: String,
}

#[derive(Args)]
struct QueryArgs {
    #[clap(flatten)]
    target: Target,
    /// Comma-separated fields for $select
    #[clap(long)]
    select: Option<String>,
    /// $filter expression
    #[clap(long)]
    filter: Option<String>,
    /// Comma-separated relations for $expand
    #[clap(long)]
    expand: Option<String>,
    /// $format value; omitted when not given
    #[clap(long)]
    format: Option<String>,
    /// Stop after this many pages
    #[clap(long)]
    max_pages: Option<usize>,
}

#[derive(Args)]
struct BulkArgs {
    #[clap(flatten)]
    target: Target,
    /// native_uid of the entity
    #[clap(long)]
    native_uid: String,
    /// Binary field of the entity, e.g. data or $value
    #[clap(long, default_value = "data")]
    data_field: String,
    /// Accept header for the request
    #[clap(long, default_value = DEFAULT_BULK_ACCEPT)]
    accept: String,
    /// Chunk size in bytes
    #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// File to write the data to
    #[clap(short, long)]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs on stderr, stdout carries data
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    let runtime_config = config.to_runtime()?;
    tracing::info!(
        "Configured for {} at {}",
        runtime_config.environment,
        runtime_config.data_endpoint()
    );

    let client = DsisClient::from_config(runtime_config)?;

    match cli.command {
        Command::Query(args) => run_query(&client, args).await,
        Command::Bulk(args) => run_bulk(&client, args).await,
        Command::Check => {
            if client.test_connection().await {
                println!("ok");
                Ok(())
            } else {
                anyhow::bail!("DSIS data endpoint is not reachable")
            }
        }
    }
}

async fn run_query(client: &DsisClient, args: QueryArgs) -> Result<()> {
    let mut query = QueryBuilder::new(args.target.district, args.target.project)
        .schema(args.target.schema)
        .format(args.format.as_deref());
    if let Some(select) = args.select {
        query = query.select(select);
    }
    if let Some(filter) = args.filter {
        query = query.filter(filter);
    }
    if let Some(expand) = args.expand {
        query = query.expand(expand);
    }

    let options = ExecuteOptions {
        max_pages: args.max_pages,
        ..ExecuteOptions::default()
    };
    let records = client.execute_query(&query, options)?;
    let count = write_records(records, tokio::io::stdout()).await?;

    tracing::info!("Wrote {} records", count);
    Ok(())
}

/// Write records as JSON lines without blocking the runtime
async fn write_records<S, W>(mut records: S, out: W) -> Result<usize>
where
    S: Stream<Item = Result<Record, DsisError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut out = BufWriter::new(out);
    let mut count = 0usize;
    while let Some(record) = records.try_next().await? {
        let mut line = serde_json::to_vec(record.raw())?;
        line.push(b'\n');
        out.write_all(&line).await?;
        count += 1;
    }
    out.flush().await?;
    Ok(count)
}

async fn run_bulk(client: &DsisClient, args: BulkArgs) -> Result<()> {
    let query = QueryBuilder::new(args.target.district, args.target.project)
        .schema(args.target.schema)
        .entity_with_field(args.native_uid.as_str(), &args.data_field)?;

    let mut chunks = client
        .get_bulk_data_stream(&query, args.chunk_size, &args.accept)
        .await?;

    let mut file = tokio::fs::File::create(&args.output)
        .await
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let mut written = 0usize;
    while let Some(chunk) = chunks.try_next().await? {
        file.write_all(&chunk).await?;
        written += chunk.len();
    }
    file.flush().await?;

    if written == 0 {
        tracing::warn!("No bulk data for {}", args.native_uid);
    }
    tracing::info!("Wrote {} bytes to {}", written, args.output.display());
    Ok(())
}
