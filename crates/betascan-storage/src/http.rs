use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
    /// Set when the body was cut at the caller's byte cap.
    pub capped: bool,
}

impl FetchedResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                source: err,
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Thin reqwest wrapper. Every call carries its own timeout and nothing is
/// retried; the periodic trigger is the only retry mechanism.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET the whole body. Non-2xx statuses are errors.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<FetchedResponse, FetchError> {
        self.fetch_capped(url, None, timeout).await
    }

    /// GET at most `max_bytes` of the body and drop the rest of the stream.
    pub async fn fetch_prefix(
        &self,
        url: &str,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<FetchedResponse, FetchError> {
        self.fetch_capped(url, Some(max_bytes), timeout).await
    }

    /// GET with query parameters; non-2xx statuses are errors.
    pub async fn fetch_with_query(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self
                .client
                .get(url)
                .query(query)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e))?;
            read_success_body(url, resp, None).await
        }
        .instrument(span)
        .await
    }

    /// POST a JSON body and hand back whatever the server answered,
    /// including non-2xx statuses.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_post", url);
        async {
            let resp = self
                .client
                .post(url)
                .json(body)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e))?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            let body = resp
                .bytes()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e))?
                .to_vec();
            Ok(FetchedResponse {
                status,
                final_url,
                body,
                capped: false,
            })
        }
        .instrument(span)
        .await
    }

    async fn fetch_capped(
        &self,
        url: &str,
        max_bytes: Option<usize>,
        timeout: Duration,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self
                .client
                .get(url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e))?;
            read_success_body(url, resp, max_bytes).await
        }
        .instrument(span)
        .await
    }
}

async fn read_success_body(
    url: &str,
    mut resp: reqwest::Response,
    max_bytes: Option<usize>,
) -> Result<FetchedResponse, FetchError> {
    let status = resp.status();
    let final_url = resp.url().to_string();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
            url: final_url,
        });
    }

    let Some(max_bytes) = max_bytes else {
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
            .to_vec();
        return Ok(FetchedResponse {
            status,
            final_url,
            body,
            capped: false,
        });
    };

    let mut body = Vec::with_capacity(max_bytes.min(16 * 1024));
    let mut capped = false;
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?
    {
        let remaining = max_bytes - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            capped = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }
    debug!(bytes = body.len(), capped, "read body prefix");

    Ok(FetchedResponse {
        status,
        final_url,
        body,
        capped,
    })
}
