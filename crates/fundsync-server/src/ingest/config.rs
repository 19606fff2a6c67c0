//! Ingestion pipeline configuration

use fundsync_common::env;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::sources::{
    FetchPolicy, DEFAULT_FETCH_BACKOFF, DEFAULT_FETCH_MAX_ATTEMPTS, DEFAULT_FETCH_MAX_PAGES,
    DEFAULT_FETCH_PAGE_SIZE, DEFAULT_FETCH_TIMEOUT,
};
use super::types::FetchType;

/// Default number of jobs processed concurrently
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Default scheduler poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default upload size ceiling (50 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Default spool directory name under the system temp dir
pub const DEFAULT_SPOOL_DIR_NAME: &str = "fundsync-spool";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub worker_pool_size: usize,
    pub poll_interval: Duration,
    pub max_upload_bytes: u64,
    pub spool_dir: PathBuf,
    pub fetch: FetchPolicy,
    /// Catalog endpoint per fetch type; types without one cannot be submitted
    pub fetch_endpoints: HashMap<FetchType, String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            spool_dir: std::env::temp_dir().join(DEFAULT_SPOOL_DIR_NAME),
            fetch: FetchPolicy::default(),
            fetch_endpoints: HashMap::new(),
        }
    }
}

impl IngestConfig {
    /// Read `INGEST_*` and `FETCH_*` variables on top of the defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let fetch = FetchPolicy {
            timeout: Duration::from_millis(env::parse_or(
                "INGEST_FETCH_TIMEOUT_MS",
                DEFAULT_FETCH_TIMEOUT.as_millis() as u64,
            )?),
            max_attempts: env::parse_or("INGEST_FETCH_MAX_ATTEMPTS", DEFAULT_FETCH_MAX_ATTEMPTS)?,
            backoff: Duration::from_millis(env::parse_or(
                "INGEST_FETCH_RETRY_BACKOFF_MS",
                DEFAULT_FETCH_BACKOFF.as_millis() as u64,
            )?),
            page_size: env::parse_or("INGEST_FETCH_PAGE_SIZE", DEFAULT_FETCH_PAGE_SIZE)?,
            max_pages: env::parse_or("INGEST_FETCH_MAX_PAGES", DEFAULT_FETCH_MAX_PAGES)?,
        };

        let config = Self {
            worker_pool_size: env::parse_or("INGEST_WORKER_POOL_SIZE", DEFAULT_WORKER_POOL_SIZE)?,
            poll_interval: Duration::from_millis(env::parse_or(
                "INGEST_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )?),
            max_upload_bytes: env::parse_or("INGEST_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            spool_dir: env::parse_opt::<PathBuf>("INGEST_SPOOL_DIR")?.unwrap_or(defaults.spool_dir),
            fetch,
            fetch_endpoints: fetch_endpoints_from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_pool_size == 0 {
            anyhow::bail!("INGEST_WORKER_POOL_SIZE must be greater than 0");
        }
        if self.poll_interval.is_zero() {
            anyhow::bail!("INGEST_POLL_INTERVAL_MS must be greater than 0");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("INGEST_MAX_UPLOAD_BYTES must be greater than 0");
        }
        if self.fetch.timeout.is_zero() {
            anyhow::bail!("INGEST_FETCH_TIMEOUT_MS must be greater than 0");
        }
        if self.fetch.max_attempts == 0 {
            anyhow::bail!("INGEST_FETCH_MAX_ATTEMPTS must be at least 1");
        }
        if self.fetch.page_size == 0 || self.fetch.max_pages == 0 {
            anyhow::bail!("INGEST_FETCH_PAGE_SIZE and INGEST_FETCH_MAX_PAGES must be greater than 0");
        }
        for (fetch_type, endpoint) in &self.fetch_endpoints {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                anyhow::bail!("Endpoint for {} must be an http(s) URL, got '{}'", fetch_type, endpoint);
            }
        }
        Ok(())
    }
}

/// `FETCH_<TYPE>_URL` wins; otherwise `FETCH_BASE_URL` joined with the type's default path
fn fetch_endpoints_from_env() -> HashMap<FetchType, String> {
    let base = env::var_or("FETCH_BASE_URL", "");

    FetchType::ALL
        .iter()
        .filter_map(|fetch_type| {
            let explicit = env::var_or(&format!("{}_URL", fetch_type.as_str()), "");
            let endpoint = if !explicit.is_empty() {
                explicit
            } else if !base.is_empty() {
                format!("{}/{}", base.trim_end_matches('/'), fetch_type.default_path())
            } else {
                return None;
            };
            Some((*fetch_type, endpoint))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_fetch_env() {
        std::env::remove_var("FETCH_BASE_URL");
        for fetch_type in FetchType::ALL {
            std::env::remove_var(format!("{}_URL", fetch_type.as_str()));
        }
    }

    #[test]
    #[serial]
    fn test_endpoints_from_base_url() {
        clear_fetch_env();
        std::env::set_var("FETCH_BASE_URL", "http://catalog.local/api/");
        std::env::set_var("FETCH_AMCS_URL", "https://amc.example/list");

        let endpoints = fetch_endpoints_from_env();
        clear_fetch_env();

        assert_eq!(endpoints.len(), 4);
        assert_eq!(endpoints[&FetchType::FetchProducts], "http://catalog.local/api/products");
        assert_eq!(endpoints[&FetchType::FetchAmcs], "https://amc.example/list");
    }

    #[test]
    #[serial]
    fn test_no_endpoints_without_env() {
        clear_fetch_env();
        assert!(fetch_endpoints_from_env().is_empty());
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_zero_workers() {
        std::env::set_var("INGEST_WORKER_POOL_SIZE", "0");
        let result = IngestConfig::from_env();
        std::env::remove_var("INGEST_WORKER_POOL_SIZE");
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        IngestConfig::default().validate().unwrap();
    }
}
