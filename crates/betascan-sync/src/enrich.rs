use std::time::Duration;

use async_trait::async_trait;
use betascan_adapters::{first_name_match, fill_missing_fields, parse_search_response, CatalogError, SearchResult};
use betascan_core::AppRecord;
use betascan_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::{debug, warn};

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SEARCH_URL: &str = "https://itunes.apple.com/search";

/// Fills metadata gaps on a candidate record. Implementations never fail
/// the caller; on any problem the input comes back unchanged.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, record: AppRecord) -> AppRecord;
}

#[derive(Default)]
pub struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    async fn enrich(&self, record: AppRecord) -> AppRecord {
        record
    }
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] CatalogError),
}

/// Keyword search against an App Store style endpoint.
pub struct SearchEnricher {
    http: HttpFetcher,
    search_url: String,
    timeout: Duration,
}

impl SearchEnricher {
    pub fn new(http: HttpFetcher, search_url: impl Into<String>) -> Self {
        Self {
            http,
            search_url: search_url.into(),
            timeout: SEARCH_TIMEOUT,
        }
    }

    /// First result whose track name contains `name`; `Ok(None)` when the
    /// search worked but nothing matched.
    pub async fn search(&self, name: &str) -> Result<Option<SearchResult>, EnrichError> {
        let resp = self
            .http
            .fetch_with_query(
                &self.search_url,
                &[("term", name), ("entity", "software"), ("limit", "5")],
                self.timeout,
            )
            .await?;
        let results = parse_search_response(&resp.body)?;
        Ok(first_name_match(&results, name).cloned())
    }
}

#[async_trait]
impl Enricher for SearchEnricher {
    async fn enrich(&self, mut record: AppRecord) -> AppRecord {
        match self.search(&record.name).await {
            Ok(Some(result)) => {
                let filled = fill_missing_fields(&mut record, &result);
                debug!(app = %record.name, ?filled, "enriched from search");
            }
            Ok(None) => debug!(app = %record.name, "no search match"),
            Err(err) => warn!(app = %record.name, error = %err, "metadata search failed"),
        }
        record
    }
}
