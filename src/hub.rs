// src/hub.rs

//! Hugging Face style hub over HTTP.

use crate::config::{DownloaderConfig, DEFAULT_REVISION};
use crate::downloader::DownloadError;
use crate::models::{RemoteFile, SourceLocator};
use crate::source::{RemoteResourceFetcher, RemoteStream, RepositoryFileLister};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ModelInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
    size: Option<u64>,
    lfs: Option<LfsInfo>,
}

#[derive(Debug, Deserialize)]
struct LfsInfo {
    sha256: Option<String>,
}

/// Lists and streams repository files from a hub endpoint.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: Client,
    endpoint: String,
    token: Option<String>,
}

impl HubClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self, DownloadError> {
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DownloadError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        Self::new(config.endpoint.clone(), config.token.clone())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn listing_url(&self, repo_id: &str, revision: &str) -> String {
        format!("{}/api/models/{}/revision/{}", self.endpoint, repo_id, revision)
    }

    fn resolve_url(&self, locator: &SourceLocator) -> String {
        let revision = locator.revision.as_deref().unwrap_or(DEFAULT_REVISION);
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint, locator.repo_id, revision, locator.filename
        )
    }

    async fn fetch_listing(
        &self,
        repo_id: &str,
        revision: Option<&str>,
    ) -> Result<Vec<RemoteFile>, DownloadError> {
        let failure = |reason: String| DownloadError::ListingFailure {
            repo_id: repo_id.to_string(),
            reason,
        };

        let url = self.listing_url(repo_id, revision.unwrap_or(DEFAULT_REVISION));
        tracing::debug!(%url, "listing repository");
        let info: ModelInfo = self
            .authorized(self.http.get(&url).query(&[("blobs", "true")]))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failure(e.to_string()))?
            .json()
            .await
            .map_err(|e| failure(e.to_string()))?;

        Ok(info
            .siblings
            .into_iter()
            .map(|s| RemoteFile {
                path: s.rfilename,
                size: s.size,
                sha256: s.lfs.and_then(|lfs| lfs.sha256),
            })
            .collect())
    }

    async fn fetch_stream(&self, locator: &SourceLocator) -> Result<RemoteStream, DownloadError> {
        let url = self.resolve_url(locator);
        tracing::debug!(%url, "opening stream");
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DownloadError::Connect {
                filename: locator.filename.clone(),
                reason: e.to_string(),
            })?;

        let total_len = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        Ok(RemoteStream { body, total_len })
    }
}

impl RepositoryFileLister for HubClient {
    fn list_files<'a>(
        &'a self,
        repo_id: &'a str,
        revision: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<RemoteFile>, DownloadError>> {
        self.fetch_listing(repo_id, revision).boxed()
    }
}

impl RemoteResourceFetcher for HubClient {
    fn open_stream<'a>(
        &'a self,
        locator: &'a SourceLocator,
    ) -> BoxFuture<'a, Result<RemoteStream, DownloadError>> {
        self.fetch_stream(locator).boxed()
    }
}
