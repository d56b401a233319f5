//! Repository over the backend REST API.
//!
//! Collections live at `{base_url}/{namespace}/{app_key}/{collection}`:
//!
//! | Operation | Request |
//! |---|---|
//! | create | `POST /{collection}` (one request per entity) |
//! | read | `GET /{collection}?query=..&sort=..&skip=..&limit=..&fields=..` |
//! | read by id | `GET /{collection}/{id}` |
//! | update | `PUT /{collection}/{id}` |
//! | delete | `DELETE /{collection}?query=..` → `{"count": n}` |
//! | delete by id | `DELETE /{collection}/{id}` → `{"count": n}` |
//! | count | `GET /{collection}/_count?query=..` → `{"count": n}` |
//! | group | `POST /{collection}/_group` |
//!
//! The backend has no batch write, so create and update send their entities
//! one request at a time, in order, and stop at the first failure. Entities
//! sent before the failure stay written on the backend.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use tether_query::{Aggregation, Query};
use tether_types::{Entity, EntityId};

use super::Repository;
use crate::config::NetworkConfig;
use crate::error::{SyncError, SyncResult};
use crate::operation::RequestOptions;

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: usize,
}

/// Network repository speaking JSON over HTTP.
pub struct HttpRepository {
    config: NetworkConfig,
    client: Client,
}

impl HttpRepository {
    /// Creates a repository for the configured backend.
    pub fn new(config: NetworkConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.namespace),
            urlencoding::encode(&self.config.app_key),
            urlencoding::encode(collection),
        )
    }

    fn entity_url(&self, collection: &str, id: &EntityId) -> String {
        format!(
            "{}/{}",
            self.collection_url(collection),
            urlencoding::encode(id.as_str())
        )
    }

    fn request(&self, method: Method, url: String, options: &RequestOptions) -> RequestBuilder {
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> SyncResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("{what} failed: {e}")))?;
        let response = check_status(response, what).await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("failed to parse {what} response: {e}")))
    }
}

/// Maps non-success statuses onto the error taxonomy.
async fn check_status(response: Response, what: &str) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("{what} failed")
    } else {
        format!("{what} failed: {body}")
    };
    debug!("Backend answered {} for {}", status, what);

    Err(match status.as_u16() {
        404 => SyncError::NotFound(message),
        code if status.is_server_error() => SyncError::Server {
            status: code,
            message,
        },
        code => SyncError::Rejected {
            status: code,
            message,
        },
    })
}

fn query_params(query: Option<&Query>) -> Vec<(String, String)> {
    query.map(Query::to_query_params).unwrap_or_default()
}

#[async_trait]
impl Repository for HttpRepository {
    async fn create(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let url = self.collection_url(collection);
        let mut created = Vec::with_capacity(entities.len());
        for entity in entities {
            let request = self.request(Method::POST, url.clone(), options).json(&entity);
            created.push(self.send::<Entity>(request, "create").await?);
        }
        Ok(created)
    }

    async fn read(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let request = self
            .request(Method::GET, self.collection_url(collection), options)
            .query(&query_params(query));
        self.send(request, "read").await
    }

    async fn read_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &RequestOptions,
    ) -> SyncResult<Entity> {
        let request = self.request(Method::GET, self.entity_url(collection, id), options);
        self.send(request, "read by id").await
    }

    async fn update(
        &self,
        collection: &str,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Entity>> {
        let mut requests = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = entity.id().ok_or_else(|| {
                SyncError::InvalidArgument("every updated entity must carry an _id".to_string())
            })?;
            requests.push(
                self.request(Method::PUT, self.entity_url(collection, &id), options)
                    .json(&entity),
            );
        }
        let mut updated = Vec::with_capacity(requests.len());
        for request in requests {
            updated.push(self.send::<Entity>(request, "update").await?);
        }
        Ok(updated)
    }

    async fn delete(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        let request = self
            .request(Method::DELETE, self.collection_url(collection), options)
            .query(&query_params(query));
        let response: CountResponse = self.send(request, "delete").await?;
        Ok(response.count)
    }

    async fn delete_by_id(
        &self,
        collection: &str,
        id: &EntityId,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        let request = self.request(Method::DELETE, self.entity_url(collection, id), options);
        let response: CountResponse = self.send(request, "delete by id").await?;
        Ok(response.count)
    }

    async fn count(
        &self,
        collection: &str,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<usize> {
        let url = format!("{}/_count", self.collection_url(collection));
        let request = self
            .request(Method::GET, url, options)
            .query(&query_params(query));
        let response: CountResponse = self.send(request, "count").await?;
        Ok(response.count)
    }

    async fn group(
        &self,
        collection: &str,
        aggregation: &Aggregation,
        options: &RequestOptions,
    ) -> SyncResult<Vec<Value>> {
        let url = format!("{}/_group", self.collection_url(collection));
        let request = self
            .request(Method::POST, url, options)
            .json(&aggregation.to_value());
        self.send(request, "group").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository(base_url: &str) -> HttpRepository {
        HttpRepository::new(NetworkConfig {
            base_url: base_url.to_string(),
            app_key: "kid_123".to_string(),
            ..NetworkConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn collection_urls_are_encoded() {
        let repo = repository("https://api.example.com/");
        assert_eq!(
            repo.collection_url("my notes"),
            "https://api.example.com/appdata/kid_123/my%20notes"
        );
        assert_eq!(
            repo.entity_url("notes", &EntityId::from("a/b")),
            "https://api.example.com/appdata/kid_123/notes/a%2Fb"
        );
    }
}
