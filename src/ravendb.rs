#![cfg(feature = "ravendb")]

//! RavenDB transport over its REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Identity, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::store::{Connector, Document, DocumentStore, PutCommand, StoreError};

const DATABASE_DOES_NOT_EXIST: &str = "DatabaseDoesNotExistException";

/// Opens `RavenStore`s from the binding settings.
pub struct RavenConnector {
    settings: Settings,
}

impl RavenConnector {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    async fn build_http(&self) -> Result<reqwest::Client, StoreError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.settings.timeout_ms))
            .pool_max_idle_per_host(32);

        if let Some(path) = &self.settings.certificate {
            let der = tokio::fs::read(path).await?;
            // Certificates exported by RavenDB carry an empty password.
            builder = builder.identity(Identity::from_pkcs12_der(&der, "")?);
        }

        Ok(builder.build()?)
    }
}

#[async_trait]
impl Connector for RavenConnector {
    type Store = RavenStore;

    async fn connect(&self) -> Result<RavenStore, StoreError> {
        let http = self.build_http().await?;
        let database = self.settings.database.clone();

        let mut last_error = None;
        for url in &self.settings.urls {
            let store = RavenStore {
                http: http.clone(),
                node: url.clone(),
                database: database.clone(),
            };
            // A missing database still means the node is up and accepted us.
            let answered = match store.http.get(store.stats_url()).send().await {
                Ok(response) => match check(response).await {
                    Ok(_) | Err(StoreError::DatabaseDoesNotExist(_)) => Ok(()),
                    Err(e) => Err(e),
                },
                Err(e) => Err(StoreError::Http(e)),
            };

            match answered {
                Ok(()) => {
                    info!(node = %url, database = %database, "ravendb client connection created");
                    return Ok(store);
                }
                Err(e) if is_rejection(&e) => {
                    warn!(node = %url, error = %e, "ravendb node rejected credentials");
                    return Err(e);
                }
                Err(e) => {
                    warn!(node = %url, error = %e, "ravendb node unavailable");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| StoreError::Malformed("no ravendb url configured".to_string())))
    }
}

/// 401/403: the client itself is refused, so no other node will do better.
fn is_rejection(error: &StoreError) -> bool {
    matches!(error, StoreError::Server { status: 401 | 403, .. })
}

/// A connection pinned to one RavenDB node and database.
pub struct RavenStore {
    http: reqwest::Client,
    node: String,
    database: String,
}

#[derive(Deserialize)]
struct DocumentsPage {
    #[serde(rename = "Results", default)]
    results: Vec<Value>,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    #[serde(rename = "Commands")]
    commands: &'a [PutCommand],
}

#[derive(Deserialize, Default)]
struct ServerError {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Message", default)]
    message: String,
}

impl RavenStore {
    fn docs_url(&self) -> String {
        format!("{}/databases/{}/docs", self.node, self.database)
    }

    fn stats_url(&self) -> String {
        format!("{}/databases/{}/stats", self.node, self.database)
    }

    fn bulk_docs_url(&self) -> String {
        format!("{}/databases/{}/bulk_docs", self.node, self.database)
    }

    fn admin_databases_url(&self) -> String {
        format!("{}/admin/databases", self.node)
    }
}

/// Map a RavenDB error response to a `StoreError`.
fn server_error(status: StatusCode, body: &str) -> StoreError {
    let error: ServerError = serde_json::from_str(body).unwrap_or_default();
    let message = if error.message.is_empty() {
        body.to_string()
    } else {
        error.message
    };

    if error.kind.ends_with(DATABASE_DOES_NOT_EXIST) {
        StoreError::DatabaseDoesNotExist(message)
    } else if status == StatusCode::CONFLICT {
        StoreError::Conflict(message)
    } else {
        StoreError::Server {
            status: status.as_u16(),
            kind: error.kind,
            message,
        }
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await?;
    Err(server_error(status, &body))
}

fn into_documents(page: DocumentsPage) -> Vec<Document> {
    page.results
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(document) => Some(document),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl DocumentStore for RavenStore {
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let response = self
            .http
            .get(self.docs_url())
            .query(&[("id", id)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let page: DocumentsPage = check(response).await?.json().await?;
        Ok(into_documents(page).into_iter().next())
    }

    async fn put(&self, id: &str, document: &Document) -> Result<(), StoreError> {
        let response = self
            .http
            .put(self.docs_url())
            .query(&[("id", id)])
            .json(document)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.docs_url())
            .query(&[("id", id)])
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn starts_after(
        &self,
        prefix: &str,
        start_after: &str,
        page_size: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let page_size = page_size.to_string();
        let response = self
            .http
            .get(self.docs_url())
            .query(&[
                ("startsWith", prefix),
                ("startAfter", start_after),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await?;
        let page: DocumentsPage = check(response).await?.json().await?;
        Ok(into_documents(page))
    }

    async fn batch(&self, commands: &[PutCommand]) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.bulk_docs_url())
            .json(&BatchRequest { commands })
            .send()
            .await?;
        check(response).await?;
        debug!(commands = commands.len(), "bulk_docs accepted");
        Ok(())
    }

    async fn database_exists(&self) -> Result<bool, StoreError> {
        let response = self.http.get(self.stats_url()).send().await?;
        match check(response).await {
            Ok(_) => Ok(true),
            Err(StoreError::DatabaseDoesNotExist(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_database(&self) -> Result<(), StoreError> {
        info!(database = %self.database, "creating missing database");
        let record = json!({
            "DatabaseName": self.database,
            "Settings": {},
            "Disabled": false,
            "Encrypted": false,
        });
        let response = self
            .http
            .put(self.admin_databases_url())
            .query(&[("name", self.database.as_str()), ("replicationFactor", "1")])
            .json(&record)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        info!(node = %self.node, "ravendb client connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ConnectionPool;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `response` verbatim to every connection; returns the base url.
    async fn canned_node(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn settings(urls: Vec<String>) -> Settings {
        Settings {
            urls,
            database: "ycsb".into(),
            certificate: None,
            create_database: false,
            timeout_ms: 5_000,
            batch_size: 1,
        }
    }

    const UNAUTHORIZED: &str =
        "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const UNAVAILABLE: &str =
        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\nboom";
    const HEALTHY: &str =
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}";
    const MISSING_DATABASE: &str = "HTTP/1.1 503 Service Unavailable\r\nContent-Type: application/json\r\nContent-Length: 73\r\nConnection: close\r\n\r\n{\"Type\":\"Raven.Client.Exceptions.Database.DatabaseDoesNotExistException\"}";

    #[tokio::test]
    async fn rejected_credentials_fail_acquire() {
        let node = canned_node(UNAUTHORIZED).await;
        let healthy = canned_node(HEALTHY).await;
        let pool = ConnectionPool::new(RavenConnector::new(settings(vec![node, healthy])));

        match pool.acquire().await {
            Err(StoreError::Server { status, .. }) => assert_eq!(status, 401),
            Err(other) => panic!("unexpected {:?}", other),
            Ok(_) => panic!("acquire succeeded against a node that refused the client"),
        }
    }

    #[tokio::test]
    async fn failing_node_is_skipped_for_a_healthy_one() {
        let sick = canned_node(UNAVAILABLE).await;
        let healthy = canned_node(HEALTHY).await;
        let connector = RavenConnector::new(settings(vec![sick, healthy.clone()]));

        let store = connector.connect().await.unwrap();
        assert_eq!(store.node, healthy);
    }

    #[tokio::test]
    async fn node_without_the_database_is_still_usable() {
        let node = canned_node(MISSING_DATABASE).await;
        let connector = RavenConnector::new(settings(vec![node.clone()]));

        let store = connector.connect().await.unwrap();
        assert_eq!(store.node, node);
    }

    #[tokio::test]
    async fn all_nodes_failing_reports_the_last_error() {
        let sick = canned_node(UNAVAILABLE).await;
        let connector = RavenConnector::new(settings(vec![sick]));

        match connector.connect().await {
            Err(StoreError::Server { status, message, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            Err(other) => panic!("unexpected {:?}", other),
            Ok(_) => panic!("connected to a failing node"),
        }
    }


    #[test]
    fn missing_database_is_recognized() {
        let body = r#"{"Url":"/databases/ycsb/stats","Type":"Raven.Client.Exceptions.Database.DatabaseDoesNotExistException","Message":"Database 'ycsb' does not exist."}"#;

        match server_error(StatusCode::SERVICE_UNAVAILABLE, body) {
            StoreError::DatabaseDoesNotExist(message) => {
                assert_eq!(message, "Database 'ycsb' does not exist.")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn conflict_maps_to_conflict() {
        let body = r#"{"Type":"Raven.Client.Exceptions.ConcurrencyException","Message":"Database 'ycsb' already exists!"}"#;

        assert!(matches!(
            server_error(StatusCode::CONFLICT, body),
            StoreError::Conflict(_)
        ));
    }

    #[test]
    fn unparseable_body_is_kept_as_message() {
        match server_error(StatusCode::INTERNAL_SERVER_ERROR, "boom") {
            StoreError::Server {
                status,
                kind,
                message,
            } => {
                assert_eq!(status, 500);
                assert!(kind.is_empty());
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn batch_body_uses_ravendb_command_shape() {
        let mut document = Document::new();
        document.insert("field0".into(), Value::String("v".into()));
        let commands = vec![PutCommand::new("usertable/k".into(), document)];

        let body = serde_json::to_value(BatchRequest { commands: &commands }).unwrap();
        assert_eq!(
            body,
            json!({ "Commands": [{
                "Id": "usertable/k",
                "ChangeVector": null,
                "Document": { "field0": "v" },
                "Type": "PUT",
            }]})
        );
    }

    #[test]
    fn urls_are_scoped_to_node_and_database() {
        let store = RavenStore {
            http: reqwest::Client::new(),
            node: "http://127.0.0.1:8080".into(),
            database: "ycsb".into(),
        };
        assert_eq!(store.docs_url(), "http://127.0.0.1:8080/databases/ycsb/docs");
        assert_eq!(store.bulk_docs_url(), "http://127.0.0.1:8080/databases/ycsb/bulk_docs");
        assert_eq!(store.admin_databases_url(), "http://127.0.0.1:8080/admin/databases");
    }
}
