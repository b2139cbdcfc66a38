mod args;
mod binding;
mod client;
mod config;
mod database;
mod document;
mod memory;
mod metrics;
mod pool;
mod ravendb;
mod store;
mod workload;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::args::Args;
use crate::binding::DocumentClient;
use crate::client::{Client, Record};
use crate::config::{Properties, Settings};
use crate::database::Database;
use crate::memory::MemoryStore;
use crate::metrics::{ConcurrentMetrics, Metrics, Operation};
use crate::pool::ConnectionPool;
#[cfg(feature = "ravendb")]
use crate::ravendb::RavenConnector;
use crate::store::Connector;
use crate::workload::{client_indices, field_name, generate_record, record_key, RecordShape};

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let settings = load_settings(&args)?;
    let runtime = configure_runtime(&args)?;

    runtime.block_on(run_bench(&args, settings))
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut properties = Properties::default();
    for path in &args.property_files {
        properties.merge(Properties::load(path)?);
    }
    let mut overrides = Properties::default();
    for pair in &args.properties {
        overrides
            .set_pair(pair)
            .with_context(|| format!("invalid -p {}", pair))?;
    }
    properties.merge(overrides);

    Settings::from_properties(&properties)
}

fn configure_runtime(args: &Args) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.worker_threads(args.worker_threads.unwrap_or_else(num_cpus::get).max(1));

    if let Some(stack_size) = args.thread_stack_size {
        builder.thread_stack_size(stack_size);
    }

    if let Some(max_threads) = args.max_blocking_threads {
        builder.max_blocking_threads(max_threads);
    }

    builder
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

async fn run_bench(args: &Args, settings: Settings) -> Result<()> {
    match args.database {
        #[cfg(feature = "ravendb")]
        Database::Ravendb => {
            let connector = RavenConnector::new(settings.clone());
            run_clients(connector, args, &settings).await
        }
        Database::Memory => run_clients(MemoryStore::default(), args, &settings).await,
    }
}

async fn run_clients<C: Connector>(connector: C, args: &Args, settings: &Settings) -> Result<()> {
    info!(
        clients = args.num_clients,
        records = args.record_count,
        batch_size = settings.batch_size,
        "starting {:?} phase",
        args.phase
    );

    let pool = Arc::new(ConnectionPool::new(connector).ensure_database(settings.create_database));
    let metrics = ConcurrentMetrics::default();
    let shape = RecordShape {
        field_count: args.field_count,
        field_length: args.field_length,
    };

    let mut handles = Vec::new();

    for client_id in 0..args.num_clients {
        let pool = pool.clone();
        let metrics = metrics.clone();
        let shape = shape.clone();
        let table = args.table.clone();
        let phase = args.phase;
        let scan_length = args.scan_length;
        let batch_size = settings.batch_size;
        let indices = client_indices(
            args.record_count,
            args.num_clients,
            client_id,
            args.load_pattern,
        );

        let handle = task::spawn(async move {
            let mut client = DocumentClient::new(pool, batch_size);
            client.init().await?;
            let mut local = Metrics::default();

            let outcome = async {
                if phase.loads() {
                    load_records(&mut client, &table, &indices, &shape, &mut local).await;
                    client.flush_pending().await?;
                    info!(client_id, records = indices.len(), "load complete");
                }

                if phase.runs() {
                    verify_records(&client, &table, &indices, scan_length, &mut local).await;
                    delete_scratch_record(&mut client, &table, client_id, &shape, &mut local)
                        .await;
                    info!(client_id, records = indices.len(), "run complete");
                }
                Ok::<_, anyhow::Error>(())
            }
            .await;

            metrics.merge(&local).await;
            let released = client.cleanup().await;
            outcome.and(released)
        });

        handles.push(handle);
    }

    // Join every client so each one releases its lease, then report the first failure.
    let mut first_error = None;
    for handle in handles {
        let result = handle.await.context("client task panicked").and_then(|r| r);
        if let Err(e) = result {
            warn!("client failed: {:#}", e);
            first_error.get_or_insert(e);
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let metrics = metrics.get_metrics().await;
    println!("{}", metrics);
    if metrics.errors() > 0 {
        warn!(errors = metrics.errors(), "some operations failed");
    }
    let missing = metrics.tally(Operation::Read).not_found;
    if args.phase.runs() && missing > scratch_reads(args) {
        warn!(missing, "reads missed loaded records");
    }

    Ok(())
}

/// Each client's scratch record ends in one expected NOT_FOUND read.
fn scratch_reads(args: &Args) -> u64 {
    u64::from(args.num_clients)
}

async fn load_records<C: Connector>(
    client: &mut DocumentClient<C>,
    table: &str,
    indices: &[u32],
    shape: &RecordShape,
    metrics: &mut Metrics,
) {
    for &index in indices {
        let values = generate_record(shape);
        let status = client.insert(table, &record_key(index), &values).await;
        metrics.record(Operation::Insert, status);
    }
}

/// Read back, update and scan every record this client owns.
async fn verify_records<C: Connector>(
    client: &DocumentClient<C>,
    table: &str,
    indices: &[u32],
    scan_length: usize,
    metrics: &mut Metrics,
) {
    for &index in indices {
        let key = record_key(index);

        let mut result = Record::new();
        let status = client.read(table, &key, None, &mut result).await;
        if !status.is_ok() {
            warn!(key = %key, %status, "loaded record not readable");
        }
        metrics.record(Operation::Read, status);

        let mut update = Record::new();
        update.insert(field_name(0), format!("updated-{}", key).into_bytes());
        let status = client.update(table, &key, &update).await;
        metrics.record(Operation::Update, status);

        let mut records = Vec::with_capacity(scan_length);
        let status = client
            .scan(table, &key, scan_length, None, &mut records)
            .await;
        metrics.record(Operation::Scan, status);
    }
}

/// Insert, delete and re-read a throwaway record outside the loaded key range.
async fn delete_scratch_record<C: Connector>(
    client: &mut DocumentClient<C>,
    table: &str,
    client_id: u32,
    shape: &RecordShape,
    metrics: &mut Metrics,
) {
    let key = format!("scratch{:04}", client_id);

    let status = client.insert(table, &key, &generate_record(shape)).await;
    metrics.record(Operation::Insert, status);
    if let Err(e) = client.flush_pending().await {
        warn!(client_id, "scratch flush failed: {:#}", e);
    }

    let status = client.delete(table, &key).await;
    metrics.record(Operation::Delete, status);

    let mut result = Record::new();
    let status = client.read(table, &key, None, &mut result).await;
    metrics.record(Operation::Read, status);
}
