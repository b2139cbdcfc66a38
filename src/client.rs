use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;

/// A benchmark record: field name to opaque bytes.
pub type Record = IndexMap<String, Vec<u8>>;

/// Fields to project on reads and scans. `None` or an empty set means all.
pub type FieldSet = HashSet<String>;

/// Outcome of a single benchmark operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    NotFound,
    Error,
    /// Accepted into the insert batch but not yet durable
    BatchedOk,
}

impl Status {
    /// `BatchedOk` counts as pending success.
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok | Status::BatchedOk)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::NotFound => "NOT_FOUND",
            Status::Error => "ERROR",
            Status::BatchedOk => "BATCHED_OK",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait Client: Send {
    /// Acquire the shared connection. Failure is fatal for this worker.
    async fn init(&mut self) -> Result<()>;

    /// Flush pending writes and release the shared connection
    async fn cleanup(&mut self) -> Result<()>;

    /// Read a single record by key
    async fn read(
        &self,
        table: &str,
        key: &str,
        fields: Option<&FieldSet>,
        result: &mut Record,
    ) -> Status;

    /// Scan up to `record_count` records in key order, starting at `start_key`
    async fn scan(
        &self,
        table: &str,
        start_key: &str,
        record_count: usize,
        fields: Option<&FieldSet>,
        result: &mut Vec<Record>,
    ) -> Status;

    /// Merge `values` into an existing record
    async fn update(&self, table: &str, key: &str, values: &Record) -> Status;

    /// Insert a new record
    async fn insert(&mut self, table: &str, key: &str, values: &Record) -> Status;

    /// Delete a record
    async fn delete(&self, table: &str, key: &str) -> Status;
}
