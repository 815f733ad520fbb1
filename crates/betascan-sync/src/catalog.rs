use std::time::Duration;

use async_trait::async_trait;
use betascan_adapters::CatalogFormat;
use betascan_core::CatalogEntry;
use betascan_storage::HttpFetcher;
use tracing::info;

use crate::ScanError;

pub const JSON_CATALOG_TIMEOUT: Duration = Duration::from_secs(10);
pub const MARKDOWN_CATALOG_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn load(&self, url: &str, format: CatalogFormat) -> Result<Vec<CatalogEntry>, ScanError>;
}

pub struct HttpCatalogSource {
    http: HttpFetcher,
}

impl HttpCatalogSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn load(&self, url: &str, format: CatalogFormat) -> Result<Vec<CatalogEntry>, ScanError> {
        let timeout = match format {
            CatalogFormat::Json => JSON_CATALOG_TIMEOUT,
            CatalogFormat::Markdown => MARKDOWN_CATALOG_TIMEOUT,
        };
        let resp = self
            .http
            .fetch_bytes(url, timeout)
            .await
            .map_err(|source| ScanError::UpstreamFetch {
                url: url.to_string(),
                source,
            })?;
        let entries = format.parse(&resp.body).map_err(|source| ScanError::CatalogParse {
            url: url.to_string(),
            source,
        })?;
        info!(url, apps = entries.len(), ?format, "catalog loaded");
        Ok(entries)
    }
}
