//! The document-store seam the binding talks through.
//!
//! `DocumentStore` lists the handful of commands the record adapter needs;
//! `Connector` is how the connection pool opens one.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A stored JSON document, fields plus the `@metadata` slot.
pub type Document = Map<String, Value>;

pub const METADATA_KEY: &str = "@metadata";
pub const METADATA_COLLECTION: &str = "@collection";
pub const METADATA_ID: &str = "@id";

#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "ravendb")]
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status} ({kind}): {message}")]
    Server {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("Database does not exist: {0}")]
    DatabaseDoesNotExist(String),

    #[error("Concurrency conflict: {0}")]
    Conflict(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Field {0} is not valid UTF-8")]
    Encoding(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Store is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandType {
    #[serde(rename = "PUT")]
    Put,
}

/// One entry of a multi-document batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutCommand {
    pub id: String,
    pub change_vector: Option<String>,
    pub document: Document,
    #[serde(rename = "Type")]
    pub command_type: CommandType,
}

impl PutCommand {
    pub fn new(id: String, document: Document) -> Self {
        Self {
            id,
            change_vector: None,
            document,
            command_type: CommandType::Put,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Load a document by id. `Ok(None)` when it does not exist.
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Store a document under `id`, replacing any previous version
    async fn put(&self, id: &str, document: &Document) -> Result<(), StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Up to `page_size` documents whose id starts with `prefix` and sorts
    /// after `start_after`. No ordering is promised.
    async fn starts_after(
        &self,
        prefix: &str,
        start_after: &str,
        page_size: usize,
    ) -> Result<Vec<Document>, StoreError>;

    /// Apply all commands as one transaction
    async fn batch(&self, commands: &[PutCommand]) -> Result<(), StoreError>;

    async fn database_exists(&self) -> Result<bool, StoreError>;

    /// Fails with `StoreError::Conflict` when the database already exists
    async fn create_database(&self) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;

    /// Create the target database if it is missing. Losing the creation
    /// race to another client is success.
    async fn ensure_database(&self) -> Result<(), StoreError> {
        if self.database_exists().await? {
            return Ok(());
        }
        match self.create_database().await {
            Ok(()) | Err(StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Opens a store for the connection pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Store: DocumentStore;

    async fn connect(&self) -> Result<Self::Store, StoreError>;
}
