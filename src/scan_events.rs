//! Events emitted by the crawler while it walks a tree

use crate::node::Node;

/// One step of a crawl, in emission order.
///
/// For every directory the crawler emits `DirectoryDiscovered` first, then
/// the events of its subdirectories, then one `FilesRead` batch and finally
/// `DirectoryRead` carrying the aggregate size. A directory that cannot be
/// opened or listed gets `SecurityError` instead of the last two. Exactly
/// one terminal event (`Complete` or `Terminating`) ends the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A directory is about to be read.
    DirectoryDiscovered(String),

    /// All files directly inside the current directory.
    FilesRead(Vec<Node>),

    /// A directory has been fully read, with its aggregate size.
    DirectoryRead(Node),

    /// A directory could not be opened or listed.
    SecurityError(String),

    /// The crawl finished normally.
    Complete,

    /// The crawl stopped early (cancellation or fatal error).
    Terminating,
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEvent::Complete | ScanEvent::Terminating)
    }

    /// Short label used in trace logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanEvent::DirectoryDiscovered(_) => "directory-discovered",
            ScanEvent::FilesRead(_) => "files-read",
            ScanEvent::DirectoryRead(_) => "directory-read",
            ScanEvent::SecurityError(_) => "security-error",
            ScanEvent::Complete => "complete",
            ScanEvent::Terminating => "terminating",
        }
    }
}
