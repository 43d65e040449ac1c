//! Content-addressed response cache + MediaWiki API client for the lords pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lords-fetch";

pub const DEFAULT_POLITE_DELAY: Duration = Duration::from_millis(600);
pub const CATEGORY_PAGE_LIMIT: &str = "500";
pub const BLOCKED_NAMESPACE_PREFIXES: [&str; 6] =
    ["Category:", "Template:", "File:", "User:", "Talk:", "Help:"];

/// Query parameters for one API request. Sorted, so serialization is canonical.
pub type ApiParams = BTreeMap<String, String>;

pub fn api_params<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> ApiParams {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("cache io at {path}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response is missing `{0}`")]
    MissingKey(String),
}

fn cache_io(path: &Path) -> impl FnOnce(std::io::Error) -> FetchError + '_ {
    move |source| FetchError::CacheIo {
        path: path.to_path_buf(),
        source,
    }
}

/// Permanent JSON store keyed by request fingerprint. No expiry, no eviction.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Fingerprint over the sorted-key JSON form of `params`.
    pub fn cache_key(params: &ApiParams) -> Result<String, FetchError> {
        let canonical = serde_json::to_vec(params)?;
        Ok(Self::sha256_hex(&canonical))
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    pub async fn load(&self, key: &str) -> Result<Option<JsonValue>, FetchError> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(cache_io(&path)(err)),
        }
    }

    /// Write via temp file + rename so a killed run never leaves a torn entry.
    pub async fn store(&self, key: &str, value: &JsonValue) -> Result<PathBuf, FetchError> {
        let path = self.path_for(key);
        fs::create_dir_all(&self.root)
            .await
            .map_err(cache_io(&self.root))?;

        let bytes = serde_json::to_vec_pretty(value)?;
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(cache_io(&temp_path))?;
        file.write_all(&bytes).await.map_err(cache_io(&temp_path))?;
        file.flush().await.map_err(cache_io(&temp_path))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(cache_io(&path)(err));
        }
        Ok(path)
    }
}

/// One network round trip to the query API. No caching, no retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, params: &ApiParams) -> Result<JsonValue, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub api_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://bannerlord.fandom.com/api.php".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: String,
}

impl HttpTransport {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            api_url: config.api_url,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, params: &ApiParams) -> Result<JsonValue, FetchError> {
        let resp = self.client.get(&self.api_url).query(params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.json().await?)
    }
}

/// Cache-first fetch: a hit never touches the transport, a miss sleeps first.
pub struct CachedFetcher {
    cache: ResponseCache,
    transport: Box<dyn Transport>,
    polite_delay: Duration,
}

impl CachedFetcher {
    pub fn new(cache: ResponseCache, transport: Box<dyn Transport>) -> Self {
        Self {
            cache,
            transport,
            polite_delay: DEFAULT_POLITE_DELAY,
        }
    }

    pub fn with_polite_delay(mut self, delay: Duration) -> Self {
        self.polite_delay = delay;
        self
    }

    pub async fn fetch(&self, params: ApiParams) -> Result<JsonValue, FetchError> {
        self.fetch_with_delay(params, self.polite_delay).await
    }

    /// `delay` of zero skips the politeness sleep.
    pub async fn fetch_with_delay(
        &self,
        mut params: ApiParams,
        delay: Duration,
    ) -> Result<JsonValue, FetchError> {
        params
            .entry("format".to_string())
            .or_insert_with(|| "json".to_string());

        let key = ResponseCache::cache_key(&params)?;
        if let Some(cached) = self.cache.load(&key).await? {
            debug!(%key, "cache hit");
            return Ok(cached);
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let action = params.get("action").cloned().unwrap_or_default();
        let span = info_span!("api_fetch", %key, action = %action);
        let data = self.transport.get_json(&params).instrument(span).await?;
        let path = self.cache.store(&key, &data).await?;
        info!(%key, path = %path.display(), "cached api response");
        Ok(data)
    }
}

fn json_path<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn require_str<'a>(value: &'a JsonValue, path: &[&str]) -> Result<&'a str, FetchError> {
    json_path(value, path)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| FetchError::MissingKey(path.join(".")))
}

/// The two request shapes the pipeline issues against a MediaWiki install.
pub struct WikiApi {
    fetcher: CachedFetcher,
}

impl WikiApi {
    pub fn new(fetcher: CachedFetcher) -> Self {
        Self { fetcher }
    }

    /// Walks every continuation page before cleaning, so dedup/sort see the full set.
    pub async fn list_category_members(&self, category: &str) -> Result<Vec<String>, FetchError> {
        let mut titles = Vec::new();
        let mut cont: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut params = api_params([
                ("action", "query"),
                ("list", "categorymembers"),
                ("cmtitle", category),
                ("cmtype", "page"),
                ("cmlimit", CATEGORY_PAGE_LIMIT),
            ]);
            if let Some(token) = &cont {
                params.insert("cmcontinue".to_string(), token.clone());
            }

            let data = self.fetcher.fetch(params).await?;
            pages += 1;
            let members = json_path(&data, &["query", "categorymembers"])
                .and_then(JsonValue::as_array)
                .ok_or_else(|| FetchError::MissingKey("query.categorymembers".to_string()))?;
            for member in members {
                titles.push(require_str(member, &["title"])?.to_string());
            }

            cont = json_path(&data, &["continue", "cmcontinue"])
                .and_then(JsonValue::as_str)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string);
            if cont.is_none() {
                break;
            }
        }

        let cleaned = clean_titles(titles);
        info!(category, pages, titles = cleaned.len(), "enumerated category");
        Ok(cleaned)
    }

    pub async fn fetch_page_html(&self, title: &str) -> Result<String, FetchError> {
        let data = self
            .fetcher
            .fetch(api_params([
                ("action", "parse"),
                ("page", title),
                ("prop", "text"),
                ("redirects", "1"),
            ]))
            .await?;
        Ok(require_str(&data, &["parse", "text", "*"])?.to_string())
    }
}

/// Trim, drop non-content namespaces and empties, dedupe, sort.
pub fn clean_titles(titles: impl IntoIterator<Item = String>) -> Vec<String> {
    titles
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| !BLOCKED_NAMESPACE_PREFIXES.iter().any(|p| t.starts_with(p)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
