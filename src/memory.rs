use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::store::{
    Connector, Document, DocumentStore, PutCommand, StoreError, METADATA_ID, METADATA_KEY,
};

/// In-process document store ordered by document id.
///
/// Clones share the same data, so a `MemoryStore` doubles as its own
/// `Connector`: every connect hands out another view of one dataset.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    docs: RwLock<BTreeMap<String, Document>>,
    database_exists: AtomicBool,
    creation_race: AtomicBool,
    fail_batches: AtomicBool,
    fail_database_check: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                docs: RwLock::new(BTreeMap::new()),
                database_exists: AtomicBool::new(true),
                creation_race: AtomicBool::new(false),
                fail_batches: AtomicBool::new(false),
                fail_database_check: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }
}

impl MemoryStore {
    #[cfg(test)]
    /// A store whose database has to be created before use
    pub fn without_database() -> Self {
        let store = Self::default();
        store.inner.database_exists.store(false, Ordering::SeqCst);
        store
    }

    #[cfg(test)]
    /// Database creation reports a conflict, as if another client created
    /// it between the existence check and the create call.
    pub fn with_creation_race() -> Self {
        let store = Self::without_database();
        store.inner.creation_race.store(true, Ordering::SeqCst);
        store
    }

    #[cfg(test)]
    pub fn fail_batches(&self, fail: bool) {
        self.inner.fail_batches.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn fail_database_check(&self, fail: bool) {
        self.inner.fail_database_check.store(fail, Ordering::SeqCst);
    }

    pub fn has_database(&self) -> bool {
        self.inner.database_exists.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn document_count(&self) -> usize {
        self.inner.docs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stored form of a document: server metadata gets the id stamped in.
    fn stored(id: &str, document: &Document) -> Document {
        let mut stored = document.clone();
        let metadata = stored.entry(METADATA_KEY).or_insert_with(|| json!({}));
        if let Value::Object(metadata) = metadata {
            metadata.insert(METADATA_ID.to_string(), Value::String(id.to_string()));
        }
        stored
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let docs = self.inner.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(id).cloned())
    }

    async fn put(&self, id: &str, document: &Document) -> Result<(), StoreError> {
        self.inner
            .docs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), Self::stored(id, document));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner
            .docs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(())
    }

    async fn starts_after(
        &self,
        prefix: &str,
        start_after: &str,
        page_size: usize,
    ) -> Result<Vec<Document>, StoreError> {
        use std::ops::Bound::{Excluded, Unbounded};

        let docs = self.inner.docs.read().unwrap_or_else(|e| e.into_inner());
        let mut page: Vec<Document> = docs
            .range::<str, _>((Excluded(start_after), Unbounded))
            .take_while(|(id, _)| id.starts_with(prefix))
            .take(page_size)
            .map(|(_, doc)| doc.clone())
            .collect();
        // Callers must not rely on page order.
        page.reverse();
        Ok(page)
    }

    async fn batch(&self, commands: &[PutCommand]) -> Result<(), StoreError> {
        if self.inner.fail_batches.load(Ordering::SeqCst) {
            return Err(StoreError::Server {
                status: 500,
                kind: "BatchFailed".to_string(),
                message: format!("rejected batch of {} commands", commands.len()),
            });
        }
        let mut docs = self.inner.docs.write().unwrap_or_else(|e| e.into_inner());
        for command in commands {
            docs.insert(
                command.id.clone(),
                Self::stored(&command.id, &command.document),
            );
        }
        Ok(())
    }

    async fn database_exists(&self) -> Result<bool, StoreError> {
        if self.inner.fail_database_check.load(Ordering::SeqCst) {
            return Err(StoreError::Server {
                status: 503,
                kind: "ServiceUnavailable".to_string(),
                message: "database check failed".to_string(),
            });
        }
        Ok(self.has_database())
    }

    async fn create_database(&self) -> Result<(), StoreError> {
        let existed = self.inner.database_exists.swap(true, Ordering::SeqCst);
        if existed || self.inner.creation_race.load(Ordering::SeqCst) {
            return Err(StoreError::Conflict("database already exists".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryStore {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<Self::Store, StoreError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: &str) -> Document {
        match json!({ "field0": value, "@metadata": { "@collection": "usertable" } }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn put_stamps_document_id() {
        let store = MemoryStore::default();
        store.put("usertable/a", &doc("x")).await.unwrap();

        let loaded = store.get("usertable/a").await.unwrap().unwrap();
        assert_eq!(loaded["@metadata"]["@id"], "usertable/a");
        assert_eq!(loaded["@metadata"]["@collection"], "usertable");
    }

    #[tokio::test]
    async fn starts_after_excludes_boundary_and_other_prefixes() {
        let store = MemoryStore::default();
        for id in ["other/b", "usertable/a", "usertable/b", "usertable/c", "usertablex/d"] {
            store.put(id, &doc(id)).await.unwrap();
        }

        let page = store.starts_after("usertable/", "usertable/a", 10).await.unwrap();
        let mut ids: Vec<&str> = page
            .iter()
            .map(|d| d["@metadata"]["@id"].as_str().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["usertable/b", "usertable/c"]);
    }

    #[tokio::test]
    async fn failed_batch_writes_nothing() {
        let store = MemoryStore::default();
        store.fail_batches(true);
        let commands = vec![PutCommand::new("usertable/a".into(), doc("x"))];

        assert!(store.batch(&commands).await.is_err());
        assert_eq!(store.document_count(), 0);
    }
}
