//! Artifact downloads and the download cache.
//!
//! The installer never talks to the network directly; it asks a [`Fetcher`] for bytes and
//! keeps them in a [`DownloadCache`] keyed by the bottle's cache filename:
//! ```text
//! ~/.cache/pourover/
//!   hello--2.12.arm64_sonoma.bottle.tar.gz
//!   hello--2.12.tar.gz                        # source archive
//! ```
//! Cached files are only trusted after checksum verification; a file that fails
//! verification is discarded so the next attempt downloads it again.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to download {url}: HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("Failed to download {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to download {url}: {reason}")]
    Unavailable { url: String, reason: String },

    #[error("Download cache error: {0}")]
    Io(#[from] std::io::Error),
}

/// Downloads artifacts by URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// [`Fetcher`] over HTTP(S)
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(format!("pourover/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Transport {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        tracing::debug!("Downloading {}", url);
        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(transport)?;
        tracing::debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

/// Flat directory of downloaded artifacts
#[derive(Debug, Clone)]
pub struct DownloadCache {
    dir: PathBuf,
}

impl DownloadCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Cached bytes for `filename`, if present
    pub async fn read(&self, filename: &str) -> Result<Option<Vec<u8>>, FetchError> {
        match fs::read(self.path_for(filename)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn store(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, FetchError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(filename);
        let partial = self.path_for(&format!("{}.incomplete", filename));
        let mut file = fs::File::create(&partial).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&partial, &path).await?;

        Ok(path)
    }

    pub async fn discard(&self, filename: &str) -> Result<(), FetchError> {
        match fs::remove_file(self.path_for(filename)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Cached bytes, or fetch and cache them
    pub async fn fetch_with(
        &self,
        fetcher: &dyn Fetcher,
        url: &str,
        filename: &str,
    ) -> Result<Vec<u8>, FetchError> {
        if let Some(bytes) = self.read(filename).await? {
            tracing::debug!("Using cached {}", filename);
            return Ok(bytes);
        }

        let bytes = fetcher.fetch(url).await?;
        self.store(filename, &bytes).await?;
        Ok(bytes)
    }
}
