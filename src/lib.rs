pub mod config;
pub mod continuation;
pub mod control;
pub mod downloader;
pub mod events;
pub mod hub;
pub mod integrity;
pub mod limiter;
pub mod manager;
pub mod models;
pub mod ordering;
pub mod registry;
pub mod session;
pub mod source;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::config::DownloaderConfig;
    pub use crate::continuation::ContinuationResolver;
    pub use crate::control::ControlSignals;
    pub use crate::downloader::{DownloadError, ErrorKind, TransferWorker, Transferred};
    pub use crate::events::{DownloadEvent, DownloadObserver, TracingObserver, TransferOutcome};
    pub use crate::hub::HubClient;
    pub use crate::limiter::BandwidthAllocator;
    pub use crate::manager::{BatchOptions, BatchOutcome, BatchReport, Continuation, DownloadOrchestrator};
    pub use crate::models::{DownloadKey, RemoteFile, SourceLocator, TaskStatus, TransferTask};
    pub use crate::ordering::{FileKind, FileOrderPolicy};
    pub use crate::registry::DownloadRegistry;
    pub use crate::session::DownloadSession;
    pub use crate::source::{RemoteResourceFetcher, RemoteStream, RepositoryFileLister};
}
