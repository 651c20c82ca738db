//! Error types shared by the crawler and the work queues

use std::io;
use thiserror::Error;

/// Failures of a [`WorkQueue`](crate::work_queue::WorkQueue).
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was already disposed (closed, aborted or dropped).
    #[error("work queue '{0}' has already been disposed")]
    Disposed(String),

    /// The consumer thread could not be spawned.
    #[error("failed to spawn consumer thread for work queue '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl QueueError {
    pub fn is_disposed(&self) -> bool {
        matches!(self, QueueError::Disposed(_))
    }
}

/// Fatal failures of a crawl. Per-directory permission problems are not
/// errors; they are reported as [`ScanEvent::SecurityError`](crate::scan_events::ScanEvent).
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn crawler thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("crawler thread panicked")]
    Panicked,
}

impl CrawlError {
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        CrawlError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures of a whole analysis run.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to create report {path}: {source}")]
    Report {
        path: String,
        #[source]
        source: io::Error,
    },
}
