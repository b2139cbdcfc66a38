use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::client::{Client, FieldSet, Record, Status};
use crate::document::{
    collection_prefix, document_id, fill_record, merge_fields, set_collection, stored_id,
    to_document,
};
use crate::pool::{ConnectionPool, Lease};
use crate::store::{Connector, Document, DocumentStore, PutCommand, StoreError};

/// Benchmark client over a document store. One instance per worker.
pub struct DocumentClient<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    lease: Option<Lease<C::Store>>,
    batch_size: usize,
    pending: Vec<PutCommand>,
}

impl<C: Connector> DocumentClient<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>, batch_size: usize) -> Self {
        Self {
            pool,
            lease: None,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Make buffered inserts durable without releasing the connection.
    pub async fn flush_pending(&mut self) -> Result<()> {
        self.flush()
            .await
            .context("failed to flush pending inserts")
    }

    fn store(&self) -> Result<&C::Store, StoreError> {
        self.lease.as_deref().ok_or(StoreError::Closed)
    }

    /// Send the buffered commands as one batch. The buffer is emptied
    /// whether or not the store accepts it.
    async fn flush(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let commands = std::mem::take(&mut self.pending);
        self.store()?.batch(&commands).await?;
        debug!(commands = commands.len(), "flushed insert batch");
        Ok(())
    }

    async fn try_read(
        &self,
        id: &str,
        fields: Option<&FieldSet>,
        result: &mut Record,
    ) -> Result<bool, StoreError> {
        match self.store()?.get(id).await? {
            Some(document) => {
                fill_record(&document, fields, result);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Boundary document plus up to `record_count - 1` documents after it,
    /// in id order.
    async fn try_scan(
        &self,
        table: &str,
        start_key: &str,
        record_count: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let store = self.store()?;
        let start_id = document_id(table, start_key);

        let boundary = store.get(&start_id).await?;

        let mut continuation = if record_count > 1 {
            store
                .starts_after(&collection_prefix(table), &start_id, record_count - 1)
                .await?
        } else {
            Vec::new()
        };
        continuation.sort_by(|a, b| stored_id(a).cmp(&stored_id(b)));

        let mut documents = Vec::with_capacity(record_count);
        documents.extend(boundary);
        documents.extend(continuation);
        Ok(documents)
    }

    async fn try_update(&self, table: &str, key: &str, values: &Record) -> Result<(), StoreError> {
        let store = self.store()?;
        let id = document_id(table, key);

        let mut document = store
            .get(&id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        merge_fields(&mut document, values)?;
        set_collection(&mut document, table);

        store.put(&id, &document).await
    }

    async fn insert_single(&self, id: &str, document: &Document) -> Result<(), StoreError> {
        self.store()?.put(id, document).await
    }

    async fn insert_batched(&mut self, id: String, document: Document) -> Result<Status, StoreError> {
        // Fail before buffering so a closed client never accumulates commands.
        self.store()?;
        self.pending.push(PutCommand::new(id, document));
        if self.pending.len() < self.batch_size {
            return Ok(Status::BatchedOk);
        }
        self.flush().await?;
        Ok(Status::Ok)
    }
}

fn failed(op: &str, id: &str, e: StoreError) -> Status {
    warn!(op, id, error = %e, "operation failed");
    Status::Error
}

#[async_trait]
impl<C: Connector> Client for DocumentClient<C> {
    async fn init(&mut self) -> Result<()> {
        if self.lease.is_none() {
            let lease = self
                .pool
                .acquire()
                .await
                .context("failed to initialize document store")?;
            self.lease = Some(lease);
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        if self.lease.is_none() {
            return Ok(());
        }
        let flushed = self.flush().await;
        if let Some(lease) = self.lease.take() {
            self.pool
                .release(lease)
                .await
                .context("failed to close document store")?;
        }
        flushed.context("failed to flush pending inserts")
    }

    async fn read(
        &self,
        table: &str,
        key: &str,
        fields: Option<&FieldSet>,
        result: &mut Record,
    ) -> Status {
        let id = document_id(table, key);
        match self.try_read(&id, fields, result).await {
            Ok(true) => Status::Ok,
            Ok(false) => Status::NotFound,
            Err(e) => failed("read", &id, e),
        }
    }

    async fn scan(
        &self,
        table: &str,
        start_key: &str,
        record_count: usize,
        fields: Option<&FieldSet>,
        result: &mut Vec<Record>,
    ) -> Status {
        if record_count == 0 {
            return Status::Ok;
        }
        let documents = match self.try_scan(table, start_key, record_count).await {
            Ok(documents) => documents,
            Err(e) => return failed("scan", &document_id(table, start_key), e),
        };
        if documents.is_empty() {
            warn!(table, start_key, "scan matched no records");
            return Status::Error;
        }

        result.reserve(documents.len());
        for document in &documents {
            let mut record = Record::new();
            fill_record(document, fields, &mut record);
            result.push(record);
        }
        Status::Ok
    }

    async fn update(&self, table: &str, key: &str, values: &Record) -> Status {
        match self.try_update(table, key, values).await {
            Ok(()) => Status::Ok,
            Err(e) => failed("update", &document_id(table, key), e),
        }
    }

    async fn insert(&mut self, table: &str, key: &str, values: &Record) -> Status {
        let id = document_id(table, key);
        let document = match to_document(values, table) {
            Ok(document) => document,
            Err(e) => return failed("insert", &id, e),
        };

        if self.batch_size == 1 {
            return match self.insert_single(&id, &document).await {
                Ok(()) => Status::Ok,
                Err(e) => failed("insert", &id, e),
            };
        }

        match self.insert_batched(id.clone(), document).await {
            Ok(status) => status,
            Err(e) => failed("insert", &id, e),
        }
    }

    async fn delete(&self, table: &str, key: &str) -> Status {
        let id = document_id(table, key);
        let deleted = match self.store() {
            Ok(store) => store.delete(&id).await,
            Err(e) => Err(e),
        };
        match deleted {
            Ok(()) => Status::Ok,
            Err(e) => failed("delete", &id, e),
        }
    }
}
