use crate::config::ScraperConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use reqwest::redirect::Policy;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, warn};

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Invalid JSON format: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("notFound")]
    NotFound,
}

impl FetchError {
    /// Failures worth another attempt: the request never produced a response.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }

    /// What a `_next/data` route answers once its build id has gone stale.
    pub fn is_missing_route(&self) -> bool {
        matches!(
            self,
            FetchError::NotFound | FetchError::Status { status: 404, .. }
        )
    }
}

/// GET-only transport used by the scraper and the archiver.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch a URL and decode it as JSON, treating a truthy `notFound` as a miss.
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError>;

    /// Fetch a URL and return the body untouched.
    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpClient {
    inner: reqwest::Client,
    max_retries: usize,
    retry_delay_ms: u64,
}

struct Fetched {
    status: StatusCode,
    body: Vec<u8>,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            inner,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    async fn get_once(&self, url: &str) -> Result<Fetched, FetchError> {
        debug!("GET {}", url);
        let resp = self
            .inner
            .get(url)
            .header(ACCEPT, "application/json, */*")
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?.to_vec();
        Ok(Fetched { status, body })
    }

    /// GET with the configured number of retries on transport failures.
    async fn get(&self, url: &str) -> Result<Fetched, FetchError> {
        let strategy = FixedInterval::from_millis(self.retry_delay_ms).take(self.max_retries);
        RetryIf::start(
            strategy,
            || self.get_once(url),
            |e: &FetchError| {
                let retry = e.is_transient();
                if retry && self.max_retries > 0 {
                    warn!("GET {} failed, retrying: {}", url, e);
                }
                retry
            },
        )
        .await
    }
}

#[async_trait]
impl Fetch for HttpClient {
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let fetched = self.get(url).await?;
        let parsed = parse_json_body(&fetched.body);

        if fetched.status.is_success() {
            return parsed;
        }
        // Next.js answers a notFound page with a 404 carrying `{"notFound":true}`
        match parsed {
            Err(FetchError::NotFound) => Err(FetchError::NotFound),
            _ => Err(FetchError::Status {
                status: fetched.status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let fetched = self.get(url).await?;
        if !fetched.status.is_success() {
            return Err(FetchError::Status {
                status: fetched.status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(fetched.body)
    }
}

/// Decode an upstream JSON body.
///
/// The upstream occasionally fences its payload in backticks; those are
/// stripped from both ends before parsing. A document whose `notFound`
/// field is truthy is reported as [`FetchError::NotFound`].
pub fn parse_json_body(body: &[u8]) -> Result<Value, FetchError> {
    let text = String::from_utf8_lossy(body);
    let json: Value =
        serde_json::from_str(text.trim_matches('`')).map_err(FetchError::InvalidJson)?;

    if json.get("notFound").is_some_and(is_truthy) {
        return Err(FetchError::NotFound);
    }
    Ok(json)
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
