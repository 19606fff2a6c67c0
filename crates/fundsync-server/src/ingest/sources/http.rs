//! HTTP catalog adapter

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{CatalogAdapter, CatalogPage, SourceError};

/// Shared client for all catalog endpoints
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("fundsync/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Pages a JSON catalog with `?page=&limit=` query parameters
pub struct HttpCatalogAdapter {
    client: Client,
    endpoint: String,
}

impl HttpCatalogAdapter {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            SourceError::Status(status.as_u16())
        } else {
            SourceError::Connect(err.to_string())
        }
    }
}

#[async_trait]
impl CatalogAdapter for HttpCatalogAdapter {
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<CatalogPage, SourceError> {
        debug!(endpoint = %self.endpoint, page, limit, "Requesting catalog page");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: serde_json::Value = response.json().await?;
        CatalogPage::from_value(body)
    }
}
