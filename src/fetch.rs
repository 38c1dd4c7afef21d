use std::fs;
use std::path::Path;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::info;

use crate::domain::AggregationLevel;
use crate::error::CacheError;
use crate::store::Cache;

pub trait PartitionSource: Send + Sync {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, CacheError>;
}

#[derive(Clone)]
pub struct HttpPartitionSource {
    client: Client,
}

impl HttpPartitionSource {
    pub fn new() -> Result<Self, CacheError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("rdbc/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CacheError::DownloadHttp {
                    url: String::new(),
                    message: err.to_string(),
                })?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| CacheError::DownloadHttp {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl PartitionSource for HttpPartitionSource {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, CacheError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CacheError::DownloadHttp {
                url: redact_url(url),
                message: err.without_url().to_string(),
            })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "partition request failed".to_string());
            return Err(CacheError::DownloadStatus {
                url: redact_url(url),
                status,
                message,
            });
        }
        let bytes = response.bytes().map_err(|err| CacheError::DownloadHttp {
            url: redact_url(url),
            message: err.without_url().to_string(),
        })?;
        fs::write(destination, &bytes).map_err(|err| CacheError::Write {
            path: destination.display().to_string(),
            message: err.to_string(),
        })?;
        Ok(bytes.len() as u64)
    }
}

pub fn fetch(
    cache: &Cache,
    source: &dyn PartitionSource,
    level: AggregationLevel,
    relative_path: &str,
    url: &str,
) -> Result<Utf8PathBuf, CacheError> {
    let target = cache.local_path(level, relative_path)?;
    // Renamed over the target only once the body is complete.
    let staged = Cache::staging_file(&target)?;
    let bytes = source.download(url, staged.path())?;
    Cache::persist(staged, &target)?;
    info!(%level, path = %target, bytes, "cached partition");
    Ok(target)
}

pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => url.to_string(),
    }
}
