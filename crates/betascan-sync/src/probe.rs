use std::time::Duration;

use async_trait::async_trait;
use betascan_core::{classify_page_text, BetaStatus};
use betascan_storage::HttpFetcher;
use tracing::warn;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Marker phrases sit near the top of beta pages; the rest is not read.
pub const PROBE_MAX_BYTES: usize = 10_240;

/// Live availability check for one beta link. Network failures become
/// status values rather than errors.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self, link: &str) -> BetaStatus;
}

pub struct HttpStatusProbe {
    http: HttpFetcher,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpStatusProbe {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            timeout: PROBE_TIMEOUT,
            max_bytes: PROBE_MAX_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn probe(&self, link: &str) -> BetaStatus {
        match self.http.fetch_prefix(link, self.max_bytes, self.timeout).await {
            Ok(resp) => classify_page_text(&resp.text_lossy()),
            Err(err) if err.is_timeout() => {
                warn!(link, "beta page probe timed out");
                BetaStatus::Timeout
            }
            Err(err) => {
                warn!(link, error = %err, "beta page probe failed");
                BetaStatus::Error
            }
        }
    }
}
