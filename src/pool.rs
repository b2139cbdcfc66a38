use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::store::{Connector, DocumentStore, StoreError};

/// Process-wide owner of the single store connection.
///
/// Built once by the entry point and shared (behind an `Arc`) with every
/// client. The store is opened by the first `acquire` and closed by the
/// `release` that drops the user count to zero.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    ensure_database: bool,
    state: Mutex<PoolState<C::Store>>,
}

struct PoolState<S> {
    store: Option<Arc<S>>,
    users: usize,
}

/// A shared handle on the pool's store, handed back with `release`.
pub struct Lease<S> {
    store: Arc<S>,
}

impl<S> Deref for Lease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.store
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            ensure_database: false,
            state: Mutex::new(PoolState {
                store: None,
                users: 0,
            }),
        }
    }

    /// Create the target database on first connect if it is missing
    pub fn ensure_database(mut self, ensure: bool) -> Self {
        self.ensure_database = ensure;
        self
    }

    pub async fn acquire(&self) -> Result<Lease<C::Store>, StoreError> {
        let mut state = self.state.lock().await;

        let store = match &state.store {
            Some(store) => store.clone(),
            None => {
                let store = self.connector.connect().await?;
                if self.ensure_database {
                    if let Err(e) = store.ensure_database().await {
                        let _ = store.close().await;
                        return Err(e);
                    }
                }
                info!("store connection opened");
                let store = Arc::new(store);
                state.store = Some(store.clone());
                store
            }
        };

        state.users += 1;
        Ok(Lease { store })
    }

    pub async fn release(&self, lease: Lease<C::Store>) -> Result<(), StoreError> {
        drop(lease);
        let mut state = self.state.lock().await;

        if state.users == 0 {
            warn!("release without a matching acquire");
            return Ok(());
        }
        state.users -= 1;

        if state.users == 0 {
            if let Some(store) = state.store.take() {
                store.close().await?;
                info!("store connection closed");
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn users(&self) -> usize {
        self.state.lock().await.users
    }

    #[cfg(test)]
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.store.is_some()
    }
}
