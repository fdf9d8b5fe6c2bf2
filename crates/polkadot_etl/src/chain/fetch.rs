//! Sidecar block client with retries, exponential backoff, and error classification.

use crate::polkadot::BlockRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};
use url::Url;

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_UNIT: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Total attempts per block, including the first.
    pub max_attempts: u32,
    pub backoff_unit: Duration,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_unit: BACKOFF_UNIT,
            max_delay: MAX_DELAY,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl FetchConfig {
    /// Delay after failed attempt `attempt` (1-based): unit * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockId {
    Head,
    Height(u64),
}

impl BlockId {
    pub fn validate(self) -> Result<Self, FetchError> {
        match self {
            BlockId::Height(0) => Err(FetchError::InvalidBlockIdentifier("0".to_string())),
            ok => Ok(ok),
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Head => f.write_str("head"),
            BlockId::Height(h) => write!(f, "{h}"),
        }
    }
}

impl FromStr for BlockId {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "head" {
            return Ok(BlockId::Head);
        }
        s.parse::<u64>()
            .map_err(|_| FetchError::InvalidBlockIdentifier(s.to_string()))
            .and_then(|h| BlockId::Height(h).validate())
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid sidecar endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid block identifier {0:?}: expected \"head\" or a height >= 1")]
    InvalidBlockIdentifier(String),
    #[error("block {block}: network error from {url}: {reason}")]
    Network {
        block: BlockId,
        url: String,
        reason: String,
    },
    #[error("block {block}: sidecar error from {url}: {reason}")]
    Sidecar {
        block: BlockId,
        url: String,
        reason: String,
    },
    #[error("block {block}: cannot decode response: {reason}")]
    Decode { block: BlockId, reason: String },
    #[error("block {block}: gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        block: BlockId,
        attempts: u32,
        last: Box<FetchError>,
    },
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network { .. } | FetchError::Sidecar { .. })
    }
}

/// Sidecar base URL. The query string may carry credentials: it is sent
/// with requests but never shown by `Display`, `Debug`, or errors.
#[derive(Clone)]
pub struct SidecarEndpoint {
    url: Url,
}

impl SidecarEndpoint {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let shown = raw.split('?').next().unwrap_or_default().trim().to_string();
        let url = Url::parse(raw.trim()).map_err(|_| FetchError::InvalidEndpoint(shown.clone()))?;
        if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
            return Err(FetchError::InvalidEndpoint(shown));
        }
        Ok(Self { url })
    }

    /// `{path}/blocks/{id}` without the query; safe to log.
    pub fn block_url(&self, id: BlockId) -> Url {
        let mut url = self.url.clone();
        url.set_query(None);
        url.set_fragment(None);
        let path = format!("{}/blocks/{id}", self.url.path().trim_end_matches('/'));
        url.set_path(&path);
        url
    }

    /// The URL actually requested: [`Self::block_url`] plus the original query.
    pub fn request_url(&self, id: BlockId) -> Url {
        let mut url = self.block_url(id);
        url.set_query(self.url.query());
        url
    }

    fn redacted(&self) -> Url {
        let mut url = self.url.clone();
        url.set_query(None);
        url
    }
}

impl fmt::Display for SidecarEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

impl fmt::Debug for SidecarEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SidecarEndpoint")
            .field(&self.redacted().as_str())
            .finish()
    }
}

impl FromStr for SidecarEndpoint {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// One raw GET. Errors are transport failures rendered without the URL.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<RawResponse, String>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, String> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| e.without_url().to_string())?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| e.without_url().to_string())?;
        Ok(RawResponse { status, body })
    }
}

/// Anything that can hand out sidecar block bodies.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Raw block body, already checked to be a sidecar block.
    async fn block_json(&self, id: BlockId) -> Result<Value, FetchError>;

    async fn block(&self, id: BlockId) -> Result<BlockRecord, FetchError> {
        let value = self.block_json(id).await?;
        decode_block(id, value)
    }
}

pub fn decode_block(id: BlockId, value: Value) -> Result<BlockRecord, FetchError> {
    serde_json::from_value(value).map_err(|e| FetchError::Decode {
        block: id,
        reason: e.to_string(),
    })
}

/// Sidecar client. Holds only configuration between calls.
pub struct SidecarClient<T = HttpTransport> {
    endpoint: SidecarEndpoint,
    config: FetchConfig,
    transport: T,
}

impl SidecarClient<HttpTransport> {
    pub fn new(endpoint: SidecarEndpoint, config: FetchConfig) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(endpoint, config, transport))
    }
}

impl<T: Transport> SidecarClient<T> {
    pub fn with_transport(endpoint: SidecarEndpoint, config: FetchConfig, transport: T) -> Self {
        Self {
            endpoint,
            config,
            transport,
        }
    }

    pub fn endpoint(&self) -> &SidecarEndpoint {
        &self.endpoint
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn fetch_once(&self, id: BlockId) -> Result<Value, FetchError> {
        let shown = self.endpoint.block_url(id).to_string();
        debug!(url = %shown, "GET block");
        let raw = self
            .transport
            .get(&self.endpoint.request_url(id))
            .await
            .map_err(|reason| FetchError::Network {
                block: id,
                url: shown.clone(),
                reason,
            })?;
        if !(200..300).contains(&raw.status) {
            return Err(FetchError::Network {
                block: id,
                url: shown,
                reason: format!("HTTP {}", raw.status),
            });
        }
        let value: Value = serde_json::from_str(&raw.body).map_err(|e| FetchError::Decode {
            block: id,
            reason: e.to_string(),
        })?;
        if let Some(code) = value.get("code") {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message");
            return Err(FetchError::Sidecar {
                block: id,
                url: shown,
                reason: format!("code {code}: {message}"),
            });
        }
        if value.get("extrinsics").is_none() {
            return Err(FetchError::Sidecar {
                block: id,
                url: shown,
                reason: "response has no extrinsics".to_string(),
            });
        }
        Ok(value)
    }

    /// Validated raw block body, retrying network and sidecar faults.
    pub async fn fetch_json(&self, id: BlockId) -> Result<Value, FetchError> {
        let id = id.validate()?;
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.fetch_once(id).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(FetchError::RetriesExhausted {
                        block: id,
                        attempts: max_attempts,
                        last: Box::new(e),
                    })
                }
                Err(e) => {
                    let delay = self.config.delay_for(attempt);
                    warn!(block = %id, attempt, max_attempts, ?delay, error = %e, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn fetch(&self, id: BlockId) -> Result<BlockRecord, FetchError> {
        let value = self.fetch_json(id).await?;
        decode_block(id, value)
    }

    /// Head height and its timestamp, if the head block carries one.
    pub async fn latest_block(&self) -> Result<(u64, Option<OffsetDateTime>), FetchError> {
        let block = self.fetch(BlockId::Head).await?;
        Ok((block.number, block.timestamp()))
    }
}

#[async_trait]
impl<T: Transport> BlockSource for SidecarClient<T> {
    async fn block_json(&self, id: BlockId) -> Result<Value, FetchError> {
        self.fetch_json(id).await
    }
}

/// Replays canned responses in order; used by tests across the crate.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: std::sync::Mutex<VecDeque<Result<RawResponse, String>>>,
    requested: std::sync::Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Result<RawResponse, String>>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().collect()),
            requested: std::sync::Mutex::default(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Result<RawResponse, String> {
        Ok(RawResponse {
            status: 200,
            body: body.into(),
        })
    }

    pub fn status(status: u16) -> Result<RawResponse, String> {
        Ok(RawResponse {
            status,
            body: String::new(),
        })
    }

    /// URLs requested so far, query included.
    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|r| r.to_vec())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.requested().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, String> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(url.to_string());
        }
        self.replies
            .lock()
            .map_err(|_| "script poisoned".to_string())?
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}
