//! Recursive directory crawler that reports progress as a stream of events
//!
//! The walk is depth-first with post-order size aggregation: every
//! subdirectory is visited before the files of its parent are read, and a
//! directory's `DirectoryRead` event carries the sum of its own files and
//! all of its subdirectories.
//!
//! Subscribers are called synchronously, in registration order, on the
//! crawling thread. The crawler does not move on until every subscriber has
//! returned, so a subscriber that blocks (e.g. on a full work queue) applies
//! backpressure to the walk itself.

use crate::error::CrawlError;
use crate::metadata::NodeEnricher;
use crate::node::Node;
use crate::path_util;
use crate::scan_events::ScanEvent;
use crate::size::Size;
use std::fs::{DirEntry, Metadata};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Callback receiving crawler events.
pub type Subscriber = Box<dyn FnMut(&ScanEvent) + Send + 'static>;

/// Handle returned by [`Crawler::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Cooperative cancellation flag shared between a crawl and its callers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a crawl that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The whole tree was visited; carries the root aggregate.
    Completed(Size),
    /// Cancellation was observed before the walk finished.
    Cancelled,
}

/// Why the walk stopped early.
enum Halt {
    Cancelled,
    Fatal(CrawlError),
}

/// A directory whose subdirectories are still being walked.
struct Frame {
    /// Event payload form of `dir`.
    path: String,
    dir: PathBuf,
    subdirs: std::vec::IntoIter<PathBuf>,
    files: Vec<DirEntry>,
    total: Size,
}

enum Entered {
    Listed(Frame),
    /// Reported as a security error; contributes nothing.
    Faulted,
}

impl From<CrawlError> for Halt {
    fn from(err: CrawlError) -> Self {
        Halt::Fatal(err)
    }
}

pub struct Crawler {
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    cancel: CancelToken,
    enricher: Arc<dyn NodeEnricher>,
}

impl Crawler {
    pub fn new(enricher: Arc<dyn NodeEnricher>) -> Self {
        Self {
            subscribers: Vec::new(),
            next_subscription: 0,
            cancel: CancelToken::new(),
            enricher,
        }
    }

    /// Use a cancellation flag created elsewhere, e.g. before the crawler.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register a subscriber. Every subscriber sees every event.
    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: FnMut(&ScanEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    /// Remove a subscriber; returns false if `id` was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask the crawl to stop before the next directory is visited.
    pub fn request_cancellation(&self) {
        self.cancel.cancel();
    }

    /// Walk `root` on the calling thread.
    ///
    /// Exactly one terminal event is emitted: `Complete` on success,
    /// `Terminating` on cancellation or before a fatal error is returned.
    pub fn run(&mut self, root: &str) -> Result<CrawlOutcome, CrawlError> {
        let root = path_util::normalize(root);
        tracing::info!(root = %root, "crawl started");

        match self.walk(PathBuf::from(&root)) {
            Ok(total) => {
                self.emit(ScanEvent::Complete);
                tracing::info!(root = %root, bytes = total.bytes(), "crawl complete");
                Ok(CrawlOutcome::Completed(total))
            }
            Err(Halt::Cancelled) => {
                self.emit(ScanEvent::Terminating);
                tracing::info!(root = %root, "crawl cancelled");
                Ok(CrawlOutcome::Cancelled)
            }
            Err(Halt::Fatal(err)) => {
                self.emit(ScanEvent::Terminating);
                tracing::error!(root = %root, error = %err, "crawl failed");
                Err(err)
            }
        }
    }

    /// Run the crawl on a dedicated thread.
    pub fn spawn(self, root: impl Into<String>) -> Result<CrawlHandle, CrawlError> {
        let root = root.into();
        let cancel = self.cancel.clone();
        let mut crawler = self;
        let join = thread::Builder::new()
            .name("crawler".into())
            .spawn(move || crawler.run(&root))
            .map_err(CrawlError::Spawn)?;

        Ok(CrawlHandle {
            cancel,
            join: Some(join),
        })
    }

    fn emit(&mut self, event: ScanEvent) {
        tracing::trace!(kind = event.kind(), "emit");
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&event);
        }
    }

    /// Depth-first walk with an explicit stack of open directories, so tree
    /// depth is bounded by memory rather than by the thread's stack.
    fn walk(&mut self, root: PathBuf) -> Result<Size, Halt> {
        let mut stack = match self.enter(root)? {
            Entered::Listed(frame) => vec![frame],
            Entered::Faulted => return Ok(Size::UNDEFINED),
        };

        loop {
            let next = match stack.last_mut() {
                Some(frame) => frame.subdirs.next(),
                None => return Ok(Size::UNDEFINED),
            };
            if let Some(subdir) = next {
                if let Entered::Listed(child) = self.enter(subdir)? {
                    stack.push(child);
                }
                continue;
            }

            let Some(frame) = stack.pop() else {
                return Ok(Size::UNDEFINED);
            };
            let total = self.leave(frame)?;
            match stack.last_mut() {
                Some(parent) => parent.total += total,
                None => return Ok(total),
            }
        }
    }

    /// Announce and list one directory.
    fn enter(&mut self, dir: PathBuf) -> Result<Entered, Halt> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }

        let path = dir.to_string_lossy().into_owned();
        self.emit(ScanEvent::DirectoryDiscovered(path.clone()));

        let listing = match path_util::list_dir(&dir) {
            Ok(listing) => listing,
            Err(e) => return self.unreadable_directory(path, e),
        };

        let mut subdirs = Vec::new();
        let mut files = Vec::new();
        for entry in listing {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return self.unreadable_directory(path, e),
            };
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return self.unreadable_directory(path, e),
            };

            let entry_path = entry.path();
            if file_type.is_symlink() || path_util::is_reparse_point(&entry_path) {
                tracing::trace!(path = %entry_path.display(), "skipping link");
                continue;
            }
            if file_type.is_dir() {
                subdirs.push(entry_path);
            } else {
                files.push(entry);
            }
        }
        subdirs.sort();
        files.sort_by_key(|entry| entry.file_name());

        Ok(Entered::Listed(Frame {
            path,
            dir,
            subdirs: subdirs.into_iter(),
            files,
            total: Size::UNDEFINED,
        }))
    }

    /// Read the files of a directory whose subdirectories are all done.
    fn leave(&mut self, frame: Frame) -> Result<Size, Halt> {
        let Frame {
            path,
            dir,
            files,
            mut total,
            ..
        } = frame;

        let mut nodes = Vec::with_capacity(files.len());
        for entry in &files {
            if let Some(node) = self.file_node(entry)? {
                nodes.push(node);
            }
        }
        total += nodes.iter().map(Node::size).sum::<Size>();
        self.emit(ScanEvent::FilesRead(nodes));

        let properties = match path_util::link_metadata(&dir) {
            Ok(meta) => self.enricher.properties(&path, &meta),
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "no metadata for directory");
                Vec::new()
            }
        };
        self.emit(ScanEvent::DirectoryRead(Node::with_properties(path, total, properties)));

        Ok(total)
    }

    /// Permission problems become a `SecurityError` and contribute nothing to
    /// the parent; anything else aborts the crawl.
    fn unreadable_directory(&mut self, path: String, err: io::Error) -> Result<Entered, Halt> {
        if err.kind() == io::ErrorKind::PermissionDenied {
            tracing::debug!(path = %path, error = %err, "directory not readable");
            self.emit(ScanEvent::SecurityError(path));
            return Ok(Entered::Faulted);
        }
        Err(CrawlError::io(path, err).into())
    }

    fn file_node(&self, entry: &DirEntry) -> Result<Option<Node>, CrawlError> {
        let path = entry.path().to_string_lossy().into_owned();
        let meta: Metadata = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path, "file vanished during crawl");
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Ok(Some(Node::new(path, Size::UNDEFINED)));
            }
            Err(e) => return Err(CrawlError::io(path, e)),
        };

        let properties = self.enricher.properties(&path, &meta);
        Ok(Some(Node::with_properties(path, Size::new(meta.len()), properties)))
    }
}

/// A crawl running on its own thread.
pub struct CrawlHandle {
    cancel: CancelToken,
    join: Option<JoinHandle<Result<CrawlOutcome, CrawlError>>>,
}

impl CrawlHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the crawl thread and return its result.
    pub fn wait(mut self) -> Result<CrawlOutcome, CrawlError> {
        match self.join.take() {
            Some(join) => join.join().map_err(|_| CrawlError::Panicked)?,
            None => Err(CrawlError::Panicked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::NoEnrichment;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn recording_crawler() -> (Crawler, Arc<Mutex<Vec<ScanEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut crawler = Crawler::new(Arc::new(NoEnrichment));
        let sink = Arc::clone(&events);
        crawler.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        (crawler, events)
    }

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    /// root/a.txt (100 bytes), root/sub/b.txt (50 bytes)
    fn sample_tree() -> TempDir {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a.txt"), vec![b'a'; 100]).unwrap();
        fs::create_dir(temp_dir.path().join("sub")).unwrap();
        fs::write(temp_dir.path().join("sub").join("b.txt"), vec![b'b'; 50]).unwrap();
        temp_dir
    }

    #[test]
    fn test_event_order_for_sample_tree() {
        let temp_dir = sample_tree();
        let root = path_str(temp_dir.path());
        let sub = path_str(&temp_dir.path().join("sub"));
        let (mut crawler, events) = recording_crawler();

        let outcome = crawler.run(&root).unwrap();
        assert_eq!(outcome, CrawlOutcome::Completed(Size::new(150)));

        let expected = vec![
            ScanEvent::DirectoryDiscovered(root.clone()),
            ScanEvent::DirectoryDiscovered(sub.clone()),
            ScanEvent::FilesRead(vec![Node::new(
                path_str(&temp_dir.path().join("sub").join("b.txt")),
                Size::new(50),
            )]),
            ScanEvent::DirectoryRead(Node::new(sub, Size::new(50))),
            ScanEvent::FilesRead(vec![Node::new(
                path_str(&temp_dir.path().join("a.txt")),
                Size::new(100),
            )]),
            ScanEvent::DirectoryRead(Node::new(root, Size::new(150))),
            ScanEvent::Complete,
        ];
        assert_eq!(*events.lock().unwrap(), expected);
    }

    #[test]
    fn test_aggregate_is_files_plus_subdirectories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        fs::create_dir_all(base.join("x").join("y")).unwrap();
        fs::create_dir(base.join("empty")).unwrap();
        fs::write(base.join("top.bin"), vec![0u8; 7]).unwrap();
        fs::write(base.join("x").join("one.bin"), vec![0u8; 11]).unwrap();
        fs::write(base.join("x").join("y").join("two.bin"), vec![0u8; 13]).unwrap();
        fs::write(base.join("x").join("y").join("three.bin"), vec![0u8; 17]).unwrap();

        let (mut crawler, events) = recording_crawler();
        crawler.run(&path_str(base)).unwrap();

        let sizes: Vec<(String, u64)> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                ScanEvent::DirectoryRead(node) => {
                    Some((path_util::short_name(node.path()), node.size().bytes()))
                }
                _ => None,
            })
            .collect();

        let size_of = |name: &str| sizes.iter().find(|(n, _)| n == name).map(|(_, s)| *s);
        assert_eq!(size_of("y"), Some(30));
        assert_eq!(size_of("x"), Some(41));
        assert_eq!(size_of("empty"), Some(0));
        assert_eq!(sizes.last().map(|(_, s)| *s), Some(48));
    }

    #[test]
    fn test_cancel_before_start_emits_only_terminating() {
        let temp_dir = sample_tree();
        let (mut crawler, events) = recording_crawler();
        crawler.request_cancellation();

        let outcome = crawler.run(&path_str(temp_dir.path())).unwrap();
        assert_eq!(outcome, CrawlOutcome::Cancelled);
        assert_eq!(*events.lock().unwrap(), vec![ScanEvent::Terminating]);
    }

    #[test]
    fn test_cancel_mid_crawl_stops_at_next_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        for name in ["d1", "d2", "d3"] {
            fs::create_dir(temp_dir.path().join(name)).unwrap();
            fs::write(temp_dir.path().join(name).join("f"), "data").unwrap();
        }

        let (mut crawler, events) = recording_crawler();
        let token = crawler.cancel_token();
        crawler.subscribe(move |event| {
            if matches!(event, ScanEvent::DirectoryRead(_)) {
                token.cancel();
            }
        });

        let outcome = crawler.run(&path_str(temp_dir.path())).unwrap();
        assert_eq!(outcome, CrawlOutcome::Cancelled);

        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&ScanEvent::Terminating));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        let discovered = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::DirectoryDiscovered(_)))
            .count();
        // root and d1 only
        assert_eq!(discovered, 2);
    }

    #[test]
    fn test_missing_root_is_fatal_after_terminating() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = path_str(&temp_dir.path().join("does-not-exist"));
        let (mut crawler, events) = recording_crawler();

        let err = crawler.run(&missing).unwrap_err();
        assert!(matches!(err, CrawlError::Io { .. }));
        assert_eq!(events.lock().unwrap().last(), Some(&ScanEvent::Terminating));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let temp_dir = sample_tree();
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut crawler = Crawler::new(Arc::new(NoEnrichment));
        let sink = Arc::clone(&events);
        let id = crawler.subscribe(move |event: &ScanEvent| sink.lock().unwrap().push(event.clone()));

        assert!(crawler.unsubscribe(id));
        assert!(!crawler.unsubscribe(id));
        crawler.run(&path_str(temp_dir.path())).unwrap();
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_trailing_separator_is_stripped() {
        let temp_dir = sample_tree();
        let root = path_str(temp_dir.path());
        let with_sep = format!("{}{}", root, std::path::MAIN_SEPARATOR);
        let (mut crawler, events) = recording_crawler();

        crawler.run(&with_sep).unwrap();
        assert_eq!(
            events.lock().unwrap().first(),
            Some(&ScanEvent::DirectoryDiscovered(root))
        );
    }

    #[test]
    fn test_spawned_crawl_runs_on_its_own_thread() {
        let temp_dir = sample_tree();
        let thread_names = Arc::new(Mutex::new(Vec::new()));
        let mut crawler = Crawler::new(Arc::new(NoEnrichment));
        let names = Arc::clone(&thread_names);
        crawler.subscribe(move |_| {
            names
                .lock()
                .unwrap()
                .push(thread::current().name().map(str::to_string));
        });

        let handle = crawler.spawn(path_str(temp_dir.path())).unwrap();
        let outcome = handle.wait().unwrap();

        assert_eq!(outcome, CrawlOutcome::Completed(Size::new(150)));
        assert!(thread_names
            .lock()
            .unwrap()
            .iter()
            .all(|name| name.as_deref() == Some("crawler")));
    }

    #[test]
    fn test_deep_tree_does_not_exhaust_the_stack() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut deepest = temp_dir.path().to_path_buf();
        for _ in 0..1500 {
            deepest.push("a");
            fs::create_dir(&deepest).unwrap();
        }
        fs::write(deepest.join("leaf.bin"), vec![0u8; 10]).unwrap();

        let directories = Arc::new(Mutex::new(0usize));
        let mut crawler = Crawler::new(Arc::new(NoEnrichment));
        let counter = Arc::clone(&directories);
        crawler.subscribe(move |event| {
            if matches!(event, ScanEvent::DirectoryRead(node) if node.size() == Size::new(10)) {
                *counter.lock().unwrap() += 1;
            }
        });

        let outcome = crawler.spawn(path_str(temp_dir.path())).unwrap().wait().unwrap();
        assert_eq!(outcome, CrawlOutcome::Completed(Size::new(10)));
        assert_eq!(*directories.lock().unwrap(), 1501);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_non_utf8_directory_names_are_walked() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("a.txt"), vec![b'a'; 100]).unwrap();
        let odd = temp_dir.path().join(OsStr::from_bytes(b"bad\xff"));
        fs::create_dir(&odd).unwrap();
        fs::write(odd.join("inner.bin"), vec![0u8; 5]).unwrap();

        let (mut crawler, events) = recording_crawler();
        let outcome = crawler.run(&path_str(temp_dir.path())).unwrap();
        assert_eq!(outcome, CrawlOutcome::Completed(Size::new(105)));

        let events = events.lock().unwrap();
        assert!(events.contains(&ScanEvent::DirectoryRead(Node::new(
            path_str(&odd),
            Size::new(5)
        ))));
        assert!(!events.iter().any(|e| matches!(e, ScanEvent::SecurityError(_))));
    }

    #[cfg(unix)]
    fn running_as_root() -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_not_followed() {
        use std::os::unix::fs::symlink;

        let temp_dir = sample_tree();
        symlink(temp_dir.path().join("sub"), temp_dir.path().join("loop")).unwrap();
        symlink(temp_dir.path().join("a.txt"), temp_dir.path().join("alias.txt")).unwrap();

        let (mut crawler, _events) = recording_crawler();
        let outcome = crawler.run(&path_str(temp_dir.path())).unwrap();
        assert_eq!(outcome, CrawlOutcome::Completed(Size::new(150)));
    }

    #[test]
    #[cfg(unix)]
    fn test_unreadable_directory_reports_security_error() {
        use std::os::unix::fs::PermissionsExt;

        if running_as_root() {
            return;
        }

        let temp_dir = sample_tree();
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("secret.bin"), vec![0u8; 1000]).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let (mut crawler, events) = recording_crawler();
        let outcome = crawler.run(&path_str(temp_dir.path()));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(outcome.unwrap(), CrawlOutcome::Completed(Size::new(150)));
        let events = events.lock().unwrap();
        assert!(events.contains(&ScanEvent::SecurityError(path_str(&locked))));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ScanEvent::DirectoryRead(n) if n.path() == path_str(&locked))));
        assert_eq!(events.last(), Some(&ScanEvent::Complete));
    }
}
