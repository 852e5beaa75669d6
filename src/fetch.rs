//! HTTP transport.
//!
//! [`Client`] is the async side used by the installer for GitHub API calls
//! and asset downloads. [`Fetcher`] is the small blocking interface the
//! verifiers use to pull checksum files.

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

const AGENT: &str = concat!("relget/", env!("CARGO_PKG_VERSION"));

/// Upper bound on the buffer reserved up front from `Content-Length`.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Blocking text fetch, one round trip per call.
pub trait Fetcher: Send + Sync {
    fn get_text(&self, url: &str) -> Result<String, FetchError>;
}

/// [`Fetcher`] backed by `reqwest::blocking`. Must not be built or dropped
/// on an async runtime thread.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(token: Option<String>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(AGENT)
            .build()
            .map_err(|source| FetchError::Request {
                url: String::new(),
                source,
            })?;
        Ok(Self { client, token })
    }
}

impl Fetcher for HttpFetcher {
    fn get_text(&self, url: &str) -> Result<String, FetchError> {
        if let Some(path) = local_path(url) {
            return read_local(&path).map(|b| String::from_utf8_lossy(&b).into_owned());
        }

        let mut request = self.client.get(url);
        if let Some(token) = self.token.as_deref().filter(|_| is_github(url)) {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = request.send().map_err(request_error)?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        response.text().map_err(request_error)
    }
}

/// GitHub's API quota as reported on the last response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset: DateTime<Utc>,
}

impl RateLimitInfo {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let number = |name: &str| -> Option<i64> { headers.get(name)?.to_str().ok()?.parse().ok() };
        Some(Self {
            limit: u32::try_from(number("x-ratelimit-limit")?).ok()?,
            remaining: u32::try_from(number("x-ratelimit-remaining")?).ok()?,
            reset: Utc.timestamp_opt(number("x-ratelimit-reset")?, 0).single()?,
        })
    }
}

/// Async HTTP client for API calls and downloads.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    token: Option<String>,
    show_progress: bool,
}

impl Client {
    pub fn new(token: Option<String>, show_progress: bool) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(AGENT)
            .build()
            .map_err(|source| FetchError::Request {
                url: String::new(),
                source,
            })?;
        Ok(Self {
            http,
            token,
            show_progress,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match self.token.as_deref() {
            Some(token) if is_github(url) => {
                tracing::debug!("Using GITHUB_TOKEN");
                request.header(AUTHORIZATION, format!("token {token}"))
            }
            _ => request,
        }
    }

    /// Fetches and decodes a GitHub API document.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<(T, Option<RateLimitInfo>), FetchError> {
        tracing::debug!("Fetching {}", url);

        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self
            .get(url)
            .header(ACCEPT, "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(request_error)?;

        let rate_limit = RateLimitInfo::from_headers(response.headers());
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let body = response.bytes().await.map_err(request_error)?;
        let value = serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })?;
        Ok((value, rate_limit))
    }

    /// Downloads a URL (or reads a local file) into memory, drawing a
    /// progress bar on stderr when enabled.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Some(path) = local_path(url) {
            return read_local(&path);
        }

        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self.get(url).send().await.map_err(request_error)?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let total_size = response.content_length().unwrap_or(0);
        let pb = self.progress_bar(total_size, crate::types::base_name(url));

        let mut body = Vec::with_capacity(initial_capacity(total_size));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(request_error)?;
            body.extend_from_slice(&chunk);
            pb.set_position(body.len() as u64);
        }

        pb.finish_and_clear();
        Ok(body)
    }

    fn progress_bar(&self, total_size: u64, filename: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total_size);
        let style = ProgressStyle::default_bar()
            .template("{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(format!("Downloading {}", filename));
        pb
    }
}

/// Buffer size to reserve for a body announced as `content_length` bytes.
/// The header is untrusted, so the reservation is capped and the buffer
/// grows past it as data arrives.
fn initial_capacity(content_length: u64) -> usize {
    usize::try_from(content_length.min(MAX_PREALLOC)).unwrap_or(0)
}

fn is_github(url: &str) -> bool {
    url.starts_with("https://api.github.com/") || url.starts_with("https://github.com/")
}

/// Maps `file://` URLs and plain paths to a local path.
pub fn local_path(target: &str) -> Option<PathBuf> {
    if let Some(path) = target.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if target.starts_with("http://") || target.starts_with("https://") {
        return None;
    }
    Some(PathBuf::from(target))
}

fn read_local(path: &Path) -> Result<Vec<u8>, FetchError> {
    std::fs::read(path).map_err(|source| FetchError::Local {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_local_path() {
        assert_eq!(local_path("file:///tmp/x.tar.gz"), Some(PathBuf::from("/tmp/x.tar.gz")));
        assert_eq!(local_path("./x.tar.gz"), Some(PathBuf::from("./x.tar.gz")));
        assert_eq!(local_path("https://example.com/x.tar.gz"), None);
    }

    #[test]
    fn test_initial_capacity_is_capped() {
        assert_eq!(initial_capacity(0), 0);
        assert_eq!(initial_capacity(4096), 4096);
        assert_eq!(initial_capacity(u64::MAX), MAX_PREALLOC as usize);

        // A bogus length must not abort the allocation.
        let buf: Vec<u8> = Vec::with_capacity(initial_capacity(u64::MAX));
        assert!(buf.capacity() >= MAX_PREALLOC as usize);
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("60"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("12"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));

        let info = RateLimitInfo::from_headers(&headers).unwrap();
        assert_eq!(info.limit, 60);
        assert_eq!(info.remaining, 12);
        assert_eq!(info.reset.timestamp(), 1_700_000_000);

        headers.remove("x-ratelimit-reset");
        assert!(RateLimitInfo::from_headers(&headers).is_none());
    }

    #[test]
    fn test_http_fetcher_reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sums.txt");
        std::fs::write(&path, "abc  tool\n").unwrap();

        let fetcher = HttpFetcher::new(None).unwrap();
        let text = fetcher.get_text(path.to_str().unwrap()).unwrap();
        assert_eq!(text, "abc  tool\n");

        let missing = dir.path().join("missing");
        assert!(matches!(
            fetcher.get_text(missing.to_str().unwrap()),
            Err(FetchError::Local { .. })
        ));
    }
}
