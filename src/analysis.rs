//! One analysis run: a crawler feeding the live view and the XML report
//!
//! Every crawler event is turned into closures on two independent work
//! queues, one per sink. The view queue is small so the display stays close
//! to the crawl, the report queue is large so writes are batched. Each sink
//! is touched only by its own queue's consumer thread.
//!
//! On `Complete` both queues are closed gracefully (view first, then
//! report), so everything emitted has been applied before the crawl thread
//! finishes. On `Terminating` both are aborted. The report output is closed
//! in both cases.

use crate::config::{Config, QueueConfig};
use crate::crawler::{CancelToken, CrawlHandle, CrawlOutcome, Crawler};
use crate::error::AnalysisError;
use crate::metadata::{MetadataEnricher, NoEnrichment, NodeEnricher};
use crate::path_util;
use crate::report::ReportWriter;
use crate::scan_events::ScanEvent;
use crate::size::Size;
use crate::view::{ViewStateSink, ViewTree};
use crate::work_queue::WorkQueue;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Destination of the XML report.
pub type ReportOutput = Box<dyn Write + Send>;

type SharedReport = Arc<Mutex<ReportWriter<ReportOutput>>>;

fn lock_report(report: &SharedReport) -> MutexGuard<'_, ReportWriter<ReportOutput>> {
    report.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counters updated on the crawl thread as events are dispatched.
#[derive(Debug, Default)]
struct RunStats {
    directories: AtomicU64,
    files: AtomicU64,
    security_errors: AtomicU64,
}

impl RunStats {
    fn record(&self, event: &ScanEvent) {
        match event {
            ScanEvent::DirectoryDiscovered(_) => {
                self.directories.fetch_add(1, Ordering::Relaxed);
            }
            ScanEvent::FilesRead(files) => {
                self.files.fetch_add(files.len() as u64, Ordering::Relaxed);
            }
            ScanEvent::SecurityError(_) => {
                self.security_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

/// Builder for a run. Nothing happens until [`start`](Self::start).
pub struct Analysis {
    root: String,
    enricher: Arc<dyn NodeEnricher>,
    queues: QueueConfig,
    view: ViewStateSink,
    report_path: Option<PathBuf>,
    report_out: ReportOutput,
    cancel: CancelToken,
}

impl Analysis {
    /// Run over `root` with default queues, no enrichment and no report
    /// output.
    pub fn new(root: &str) -> Self {
        Self {
            root: path_util::normalize(root),
            enricher: Arc::new(NoEnrichment),
            queues: QueueConfig::default(),
            view: ViewStateSink::new(Arc::new(Mutex::new(ViewTree::new()))),
            report_path: None,
            report_out: Box::new(io::sink()),
            cancel: CancelToken::new(),
        }
    }

    /// Queues and enrichment taken from `config`.
    pub fn from_config(root: &str, config: &Config) -> Self {
        let analysis = Self::new(root).with_queues(config.queues.clone());
        if config.scan.enrich_metadata {
            analysis.with_enricher(Arc::new(MetadataEnricher::for_current_user(
                config.scan.max_enrichable_path_len,
            )))
        } else {
            analysis
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn NodeEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_queues(mut self, queues: QueueConfig) -> Self {
        self.queues = queues;
        self
    }

    /// Apply events to an existing tree, e.g. one with observers attached.
    pub fn with_view(mut self, tree: Arc<Mutex<ViewTree>>) -> Self {
        self.view = ViewStateSink::new(tree);
        self
    }

    /// Write the report to a new file at `path`.
    pub fn with_report_file(mut self, path: &Path) -> Result<Self, AnalysisError> {
        let file = File::create(path).map_err(|source| AnalysisError::Report {
            path: path.display().to_string(),
            source,
        })?;
        self.report_out = Box::new(BufWriter::new(file));
        self.report_path = Some(path.to_path_buf());
        Ok(self)
    }

    pub fn with_report_writer(mut self, out: ReportOutput) -> Self {
        self.report_out = out;
        self.report_path = None;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn view(&self) -> Arc<Mutex<ViewTree>> {
        self.view.tree()
    }

    /// Token that stops the run once cancelled, also usable before `start`.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Start both queue consumers and the crawl thread.
    pub fn start(self) -> Result<AnalysisHandle, AnalysisError> {
        let flush_interval = self.queues.flush_interval();
        let ui_queue = Arc::new(WorkQueue::with_flush_interval(
            "ui",
            self.queues.ui_capacity,
            flush_interval,
        ));
        let report_queue = Arc::new(WorkQueue::with_flush_interval(
            "report",
            self.queues.report_capacity,
            flush_interval,
        ));
        ui_queue.start()?;
        report_queue.start()?;

        let report: SharedReport = Arc::new(Mutex::new(ReportWriter::new(self.report_out, &self.root)));
        let stats = Arc::new(RunStats::default());

        let fanout = Fanout {
            ui_queue: Arc::clone(&ui_queue),
            report_queue: Arc::clone(&report_queue),
            view: self.view.clone(),
            report: Arc::clone(&report),
            stats: Arc::clone(&stats),
        };
        let mut crawler = Crawler::new(self.enricher).with_cancel_token(self.cancel);
        crawler.subscribe(move |event| fanout.dispatch(event));

        tracing::info!(
            root = %self.root,
            ui_capacity = ui_queue.capacity(),
            report_capacity = report_queue.capacity(),
            "analysis started"
        );
        let crawl = crawler.spawn(self.root.clone())?;

        Ok(AnalysisHandle {
            crawl,
            root: self.root,
            report_path: self.report_path,
            report,
            stats,
            queues: [ui_queue, report_queue],
            started: Instant::now(),
        })
    }
}

/// Subscriber side of the run, executed on the crawl thread.
struct Fanout {
    ui_queue: Arc<WorkQueue>,
    report_queue: Arc<WorkQueue>,
    view: ViewStateSink,
    report: SharedReport,
    stats: Arc<RunStats>,
}

impl Fanout {
    fn dispatch(&self, event: &ScanEvent) {
        self.stats.record(event);
        let event = Arc::new(event.clone());

        match event.as_ref() {
            ScanEvent::Complete => {
                self.to_report(&event);
                self.finish();
            }
            ScanEvent::Terminating => self.stop(),
            _ => {
                self.to_view(&event);
                self.to_report(&event);
            }
        }
    }

    /// Files go to the view one closure each.
    fn to_view(&self, event: &Arc<ScanEvent>) {
        if let ScanEvent::FilesRead(files) = event.as_ref() {
            for file in files {
                let view = self.view.clone();
                let path = file.path().to_string();
                let size = file.size();
                submit(&self.ui_queue, move || view.add_file(&path, size));
            }
            return;
        }

        let view = self.view.clone();
        let event = Arc::clone(event);
        submit(&self.ui_queue, move || view.apply(&event));
    }

    fn to_report(&self, event: &Arc<ScanEvent>) {
        let report = Arc::clone(&self.report);
        let event = Arc::clone(event);
        submit(&self.report_queue, move || lock_report(&report).apply(&event));
    }

    fn finish(&self) {
        for queue in [&self.ui_queue, &self.report_queue] {
            if let Err(e) = queue.close() {
                tracing::warn!(queue = queue.name(), error = %e, "graceful close failed");
            }
        }
        self.close_report();
    }

    fn stop(&self) {
        for queue in [&self.ui_queue, &self.report_queue] {
            if let Err(e) = queue.abort() {
                tracing::debug!(queue = queue.name(), error = %e, "abort skipped");
            }
        }
        self.close_report();
    }

    fn close_report(&self) {
        // dropping the writer releases the file handle
        drop(lock_report(&self.report).close());
    }
}

fn submit<F>(queue: &WorkQueue, work: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = queue.submit(work) {
        tracing::warn!(queue = queue.name(), error = %e, "event dropped");
    }
}

/// A run in progress.
pub struct AnalysisHandle {
    crawl: CrawlHandle,
    root: String,
    report_path: Option<PathBuf>,
    report: SharedReport,
    stats: Arc<RunStats>,
    queues: [Arc<WorkQueue>; 2],
    started: Instant,
}

impl AnalysisHandle {
    /// Request cooperative cancellation. The crawl stops before its next
    /// directory and both queues are aborted.
    pub fn cancel(&self) {
        self.crawl.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.crawl.cancel_token()
    }

    pub fn is_finished(&self) -> bool {
        self.crawl.is_finished()
    }

    /// Wait for the crawl and both sinks. A fatal crawl error is returned
    /// after the queues were stopped and the report closed.
    pub fn wait(self) -> Result<AnalysisSummary, AnalysisError> {
        let result = self.crawl.wait();

        // no-ops unless the crawl thread died before its terminal event
        for queue in &self.queues {
            queue.dispose();
        }
        let report_error = {
            let mut report = lock_report(&self.report);
            drop(report.close());
            report.error().map(|e| e.to_string())
        };

        let outcome = result?;
        let total_size = match outcome {
            CrawlOutcome::Completed(total) => total,
            CrawlOutcome::Cancelled => Size::UNDEFINED,
        };
        let summary = AnalysisSummary {
            root: self.root,
            outcome,
            total_size,
            directories: self.stats.directories.load(Ordering::Relaxed),
            files: self.stats.files.load(Ordering::Relaxed),
            security_errors: self.stats.security_errors.load(Ordering::Relaxed),
            report_path: self.report_path,
            report_error,
            elapsed: self.started.elapsed(),
        };
        tracing::info!(
            root = %summary.root,
            outcome = ?summary.outcome,
            directories = summary.directories,
            files = summary.files,
            "analysis finished"
        );
        Ok(summary)
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisSummary {
    pub root: String,
    pub outcome: CrawlOutcome,
    pub total_size: Size,
    pub directories: u64,
    pub files: u64,
    pub security_errors: u64,
    pub report_path: Option<PathBuf>,
    /// First failure while writing the report, if any.
    pub report_error: Option<String>,
    pub elapsed: Duration,
}

impl AnalysisSummary {
    pub fn is_cancelled(&self) -> bool {
        self.outcome == CrawlOutcome::Cancelled
    }
}
