use std::path::PathBuf;

use crate::database::Database;
use crate::workload::{LoadPattern, Phase};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(term_width = 0)]
pub struct Args {
    /// The document store to drive
    #[arg(short, long)]
    pub database: Database,

    /// Properties files with binding settings (ravendb.url, batchsize, ...)
    #[arg(short = 'P', long = "properties")]
    pub property_files: Vec<PathBuf>,

    /// Individual key=value properties, applied after the files
    #[arg(short = 'p', long = "property")]
    pub properties: Vec<String>,

    /// Which phases to run
    #[arg(long, default_value = "all")]
    pub phase: Phase,

    /// Table (collection) the records are written to
    #[arg(long, default_value = "usertable")]
    pub table: String,

    /// Number of records to load
    #[arg(long, default_value = "1000")]
    pub record_count: u32,

    /// Number of concurrent clients
    #[arg(long, default_value = "1")]
    pub num_clients: u32,

    /// Fields per record
    #[arg(long, default_value = "10")]
    pub field_count: usize,

    /// Bytes per field value
    #[arg(long, default_value = "100")]
    pub field_length: usize,

    /// Records per scan in the run phase
    #[arg(long, default_value = "10")]
    pub scan_length: usize,

    /// Pattern for loading initial data (sequential or random)
    #[arg(long, default_value = "sequential")]
    pub load_pattern: LoadPattern,

    /// Runtime worker threads (defaults to the number of CPUs)
    #[arg(long)]
    pub worker_threads: Option<usize>,

    #[arg(long)]
    pub thread_stack_size: Option<usize>,

    #[arg(long)]
    pub max_blocking_threads: Option<usize>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_must_be_named() {
        assert!(Args::try_parse_from(["ravendb-bench"]).is_err());

        let args = Args::try_parse_from(["ravendb-bench", "--database", "memory"]).unwrap();
        assert!(matches!(args.database, Database::Memory));
    }
}
