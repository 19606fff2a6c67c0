//! External catalog sources
//!
//! A fetch job pulls a whole catalog page by page through a [`CatalogAdapter`]
//! before any record is reconciled. Each page request runs under a timeout and
//! is retried with linear backoff; a catalog that cannot be fetched completely
//! aborts the job without touching any entity.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::error::{EngineAbort, RecordError};
use super::parser::{RecordSource, SourceItem};
use super::records::{normalize_code, normalize_text, Amc, FundManager, Product, Scheme, TypedRecord};
use super::types::FetchType;

pub use http::HttpCatalogAdapter;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_FETCH_PAGE_SIZE: u32 = 100;
pub const DEFAULT_FETCH_MAX_PAGES: u32 = 1_000;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed page: {0}")]
    Decode(String),
}

impl SourceError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Timeout | SourceError::Connect(_) => true,
            SourceError::Status(status) => *status >= 500 || *status == 429,
            SourceError::Decode(_) => false,
        }
    }
}

/// One page of catalog items
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPage {
    pub items: Vec<Value>,
    /// `None` when the source does not say; a short page then ends the catalog
    pub has_more: Option<bool>,
}

impl CatalogPage {
    /// Accepts `{ "items": [...], "hasMore": bool }` or a bare array
    pub fn from_value(body: Value) -> Result<Self, SourceError> {
        match body {
            Value::Array(items) => Ok(Self { items, has_more: None }),
            Value::Object(mut map) => {
                let items = match map.remove("items") {
                    Some(Value::Array(items)) => items,
                    Some(_) => return Err(SourceError::Decode("'items' is not an array".to_string())),
                    None => return Err(SourceError::Decode("missing 'items'".to_string())),
                };
                let has_more = match map.remove("hasMore") {
                    None | Some(Value::Null) => None,
                    Some(Value::Bool(more)) => Some(more),
                    Some(_) => return Err(SourceError::Decode("'hasMore' is not a boolean".to_string())),
                };
                Ok(Self { items, has_more })
            },
            other => Err(SourceError::Decode(format!("expected an object, got {}", json_kind(&other)))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Paged access to one external catalog
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Fetch a 1-based page of at most `limit` items
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<CatalogPage, SourceError>;
}

/// Timeouts, retries and paging limits for catalog fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            backoff: DEFAULT_FETCH_BACKOFF,
            page_size: DEFAULT_FETCH_PAGE_SIZE,
            max_pages: DEFAULT_FETCH_MAX_PAGES,
        }
    }
}

/// Fetch every page of a catalog
pub async fn fetch_catalog(
    adapter: &dyn CatalogAdapter,
    policy: &FetchPolicy,
    fetch_type: FetchType,
) -> Result<Vec<Value>, EngineAbort> {
    let mut items = Vec::new();

    for page in 1..=policy.max_pages {
        let batch = fetch_page_with_retry(adapter, policy, fetch_type, page).await?;
        let received = batch.items.len();
        items.extend(batch.items);

        let more = batch
            .has_more
            .unwrap_or(received > 0 && received >= policy.page_size as usize);
        debug!(fetch_type = %fetch_type, page, received, more, "Fetched catalog page");

        if !more {
            info!(fetch_type = %fetch_type, pages = page, items = items.len(), "Catalog fetched");
            return Ok(items);
        }
    }

    Err(EngineAbort::Structural(format!(
        "{} catalog did not end within {} pages",
        fetch_type, policy.max_pages
    )))
}

async fn fetch_page_with_retry(
    adapter: &dyn CatalogAdapter,
    policy: &FetchPolicy,
    fetch_type: FetchType,
    page: u32,
) -> Result<CatalogPage, EngineAbort> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(policy.timeout, adapter.fetch_page(page, policy.page_size)).await
        {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout),
        };

        match result {
            Ok(batch) => return Ok(batch),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(
                    fetch_type = %fetch_type,
                    page,
                    "Fetch attempt {}/{} failed: {}",
                    attempt,
                    max_attempts,
                    e
                );
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            },
            Err(SourceError::Decode(reason)) => {
                return Err(EngineAbort::Structural(format!(
                    "{} page {}: {}",
                    fetch_type, page, reason
                )))
            },
            Err(e) => {
                return Err(EngineAbort::Transport(format!(
                    "{} page {} failed after {} attempt(s): {}",
                    fetch_type, page, attempt, e
                )))
            },
        }
    }
}

/// Wrap fetched items as a record source, decoding each in order
pub fn catalog_source(fetch_type: FetchType, items: Vec<Value>) -> RecordSource {
    let total = items.len() as i64;
    let decoded = items
        .iter()
        .enumerate()
        .map(|(i, item)| match decode_item(fetch_type, item, i + 1) {
            Ok(record) => SourceItem::Record(record),
            Err((identifier, error)) => SourceItem::Rejected { identifier, error },
        })
        .collect();
    RecordSource::from_items(total, decoded)
}

/// Decode one catalog item; `position` is 1-based
pub fn decode_item(
    fetch_type: FetchType,
    item: &Value,
    position: usize,
) -> Result<TypedRecord, (String, RecordError)> {
    let fallback = format!("item {}", position);
    let Some(object) = item.as_object() else {
        return Err((
            fallback,
            RecordError::invalid("item", json_kind(item), "a JSON object"),
        ));
    };

    let fields = ItemFields { object };
    let identifier = match fields.code("id") {
        Ok(Some(id)) => id,
        _ => fallback,
    };
    let fail = |e: RecordError| (identifier.clone(), e);

    let external_id = fields.required_code("id").map_err(fail)?;
    let name = fields.required_text("name").map_err(fail)?;

    let record = match fetch_type {
        FetchType::FetchProducts => TypedRecord::Product(Product {
            external_id,
            name,
            category: fields.text("category").map_err(fail)?,
            risk_level: fields.text("riskLevel").map_err(fail)?,
        }),
        FetchType::FetchFundManagers => TypedRecord::FundManager(FundManager {
            external_id,
            name,
            experience_years: fields.integer("experienceYears").map_err(fail)?,
            qualification: fields.text("qualification").map_err(fail)?,
        }),
        FetchType::FetchAmcs => TypedRecord::Amc(Amc {
            external_id,
            name,
            code: fields.text("code").map_err(fail)?,
            website: fields.text("website").map_err(fail)?,
        }),
        FetchType::FetchSchemes => TypedRecord::Scheme(Scheme {
            external_id,
            name,
            amc_id: fields.code("amcId").map_err(fail)?,
            category: fields.text("category").map_err(fail)?,
            isin: fields.code("isin").map_err(fail)?,
        }),
    };

    Ok(record)
}

struct ItemFields<'a> {
    object: &'a serde_json::Map<String, Value>,
}

impl ItemFields<'_> {
    fn present(&self, field: &str) -> Option<&Value> {
        self.object.get(field).filter(|v| !v.is_null())
    }

    fn text(&self, field: &str) -> Result<Option<String>, RecordError> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(normalize_text(s)),
            Some(other) => Err(RecordError::invalid(field, other.to_string(), "a string")),
        }
    }

    /// Identifiers may be strings or numbers
    fn code(&self, field: &str) -> Result<Option<String>, RecordError> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(normalize_code(s))),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(RecordError::invalid(field, other.to_string(), "a string or number")),
        }
    }

    fn integer(&self, field: &str) -> Result<Option<i64>, RecordError> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| RecordError::invalid(field, n.to_string(), "an integer")),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| RecordError::invalid(field, s.as_str(), "an integer")),
            Some(other) => Err(RecordError::invalid(field, other.to_string(), "an integer")),
        }
    }

    fn required_code(&self, field: &str) -> Result<String, RecordError> {
        self.code(field)?.ok_or_else(|| RecordError::missing(field))
    }

    fn required_text(&self, field: &str) -> Result<String, RecordError> {
        self.text(field)?.ok_or_else(|| RecordError::missing(field))
    }
}

/// Catalog adapters by fetch type
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<FetchType, Arc<dyn CatalogAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP adapters for every configured endpoint
    pub fn from_endpoints(endpoints: &HashMap<FetchType, String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = http::build_client(timeout)?;
        let mut registry = Self::new();
        for (fetch_type, endpoint) in endpoints {
            registry.insert(*fetch_type, Arc::new(HttpCatalogAdapter::new(client.clone(), endpoint.clone())));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, fetch_type: FetchType, adapter: Arc<dyn CatalogAdapter>) {
        self.adapters.insert(fetch_type, adapter);
    }

    pub fn with(mut self, fetch_type: FetchType, adapter: Arc<dyn CatalogAdapter>) -> Self {
        self.insert(fetch_type, adapter);
        self
    }

    pub fn get(&self, fetch_type: FetchType) -> Option<Arc<dyn CatalogAdapter>> {
        self.adapters.get(&fetch_type).cloned()
    }

    pub fn is_configured(&self, fetch_type: FetchType) -> bool {
        self.adapters.contains_key(&fetch_type)
    }
}
