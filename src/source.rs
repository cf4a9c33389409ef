// src/source.rs

//! The two capabilities the engine needs from a remote repository host.

use crate::downloader::DownloadError;
use crate::models::{RemoteFile, SourceLocator};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

/// Body of an opened remote file.
pub struct RemoteStream {
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
    /// Advertised length, if the host sent one.
    pub total_len: Option<u64>,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("total_len", &self.total_len)
            .finish_non_exhaustive()
    }
}

/// Enumerates the files of a repository.
pub trait RepositoryFileLister: Send + Sync {
    fn list_files<'a>(
        &'a self,
        repo_id: &'a str,
        revision: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<RemoteFile>, DownloadError>>;
}

/// Opens a streaming read of one remote file.
pub trait RemoteResourceFetcher: Send + Sync {
    fn open_stream<'a>(
        &'a self,
        locator: &'a SourceLocator,
    ) -> BoxFuture<'a, Result<RemoteStream, DownloadError>>;
}
