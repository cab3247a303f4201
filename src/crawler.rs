//! The crawl pipeline.
//!
//! ```text
//! ┌──────────┐  entries  ┌────────────┐  outcomes  ┌──────────┐  batches  ┌───────────┐
//! │  walker  │──────────▶│ dispatcher │──────────▶│ recorder │──────────▶│ publisher │
//! │ walkdir  │  bounded  │ N workers  │  bounded   │ report + │  bounded  │  retries  │
//! │ blocking │           │ (blocking) │            │ batcher  │           │           │
//! └──────────┘           └────────────┘            └──────────┘           └───────────┘
//! ```
//!
//! - The walker runs on a blocking thread, visits entries depth-first in
//!   file-name order, applies the [`PathFilter`], and prunes rejected
//!   directories so their children are never seen.
//! - The dispatcher runs at most `crawler.workers` extractions at once, each
//!   on the blocking pool. A panicking or timed-out extractor becomes a
//!   `Failed` outcome for that file only.
//! - The recorder is the only task that touches the report. Successful
//!   records stream into the [`RecordBatcher`] as they arrive.
//! - The publisher drains sealed batches while the walk continues. After an
//!   authentication failure it stops submitting; later batches are recorded
//!   as not submitted.
//!
//! Every channel is bounded, so a slow publisher throttles the walk instead
//! of buffering the tree in memory.
//!
//! Cancellation is cooperative: once the token fires no new extraction
//! starts, in-flight extractions finish, already-sealed records are still
//! flushed and published, and the report ends as [`RunStatus::Cancelled`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::batch::RecordBatcher;
use crate::config::Config;
use crate::error::{CrawlError, ExtractionError, PublishError};
use crate::extract::ExtractorRegistry;
use crate::filter::PathFilter;
use crate::models::{
    relative_path, Batch, EntryKind, ExtractionOutcome, FileEntry, RecordTemplate, SkipReason,
};
use crate::persist::JsonRecordWriter;
use crate::progress::{CrawlProgressEvent, CrawlProgressReporter, NoProgress, REPORT_EVERY};
use crate::publish::IndexPublisher;
use crate::report::{BatchReport, ReportBuilder, RunReport, RunStatus};

/// What the walker hands the dispatcher.
#[derive(Debug)]
enum WalkItem {
    File(FileEntry),
    Rejected(FileEntry, SkipReason),
    Pruned(PathBuf),
    Error(String),
}

/// What reaches the recorder.
#[derive(Debug)]
enum Event {
    Outcome(FileEntry, ExtractionOutcome),
    Pruned(PathBuf),
    WalkError(String),
}

pub struct Crawler {
    config: Arc<Config>,
    filter: Arc<PathFilter>,
    registry: Arc<ExtractorRegistry>,
    template: Arc<RecordTemplate>,
    publisher: Option<IndexPublisher>,
    writer: Option<JsonRecordWriter>,
    progress: Arc<dyn CrawlProgressReporter>,
}

impl Crawler {
    /// Validate `config` and set up the built-in extractors. No publisher
    /// is attached: batches are formed and reported but not submitted.
    pub fn new(config: Config) -> Result<Self, CrawlError> {
        let filter = PathFilter::new(&config.crawler)?;
        config
            .validate()
            .map_err(|e| CrawlError::InvalidConfig(format!("{e:#}")))?;

        let writer = match (&config.metadata.json_dir, config.metadata.save_json) {
            (Some(dir), true) => Some(
                JsonRecordWriter::new(dir)
                    .map_err(|e| CrawlError::InvalidConfig(format!("{e:#}")))?,
            ),
            _ => None,
        };

        Ok(Self {
            filter: Arc::new(filter),
            registry: Arc::new(ExtractorRegistry::with_builtins(&config.extract)),
            template: Arc::new(RecordTemplate::new(
                config.publish.subject_prefix.clone(),
                config.publish.visible_to.clone(),
            )),
            publisher: None,
            writer,
            progress: Arc::new(NoProgress),
            config: Arc::new(config),
        })
    }

    /// Replace the extractor registry, e.g. one with user extractors.
    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_publisher(mut self, publisher: IndexPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn CrawlProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    pub async fn crawl(&self, root: &Path) -> Result<RunReport, CrawlError> {
        self.crawl_with_cancel(root, CancellationToken::new()).await
    }

    /// Crawl `root` until the walk is exhausted or `cancel` fires.
    ///
    /// Only a bad root is an error; everything that goes wrong below the
    /// root is recorded in the report.
    pub async fn crawl_with_cancel(
        &self,
        root: &Path,
        cancel: CancellationToken,
    ) -> Result<RunReport, CrawlError> {
        let root = resolve_root(root)?;
        let root_label = root.display().to_string();
        info!(root = %root_label, workers = self.config.crawler.resolved_workers(), "crawl started");
        self.progress.report(CrawlProgressEvent::Discovering {
            root: root_label.clone(),
        });

        let capacity = self.config.crawler.channel_capacity;
        let (walk_tx, walk_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (batch_tx, batch_rx) = mpsc::channel(self.config.publish.queue_capacity);

        let walker = {
            let root = root.clone();
            let filter = self.filter.clone();
            let cancel = cancel.clone();
            let follow = self.config.crawler.follow_symlinks;
            let pause = Duration::from_millis(self.config.crawler.polling_rate_ms);
            tokio::task::spawn_blocking(move || {
                walk(&root, &filter, follow, pause, &cancel, &walk_tx)
            })
        };
        let publisher = tokio::spawn(publish_batches(
            self.publisher.clone(),
            batch_rx,
            self.progress.clone(),
        ));

        let (dispatch_stopped, mut builder) = tokio::join!(
            self.dispatch(walk_rx, event_tx, cancel.clone()),
            self.record(&root, event_rx, batch_tx),
        );

        let walk_stopped = match walker.await {
            Ok(stopped) => stopped,
            Err(e) => {
                error!(error = %e, "walker task failed");
                builder.walk_error(format!("walker task failed: {}", e));
                false
            }
        };
        let batches = match publisher.await {
            Ok(batches) => batches,
            Err(e) => {
                error!(error = %e, "publisher task failed");
                Vec::new()
            }
        };

        // A token fired after the walk was exhausted does not cancel the run.
        let status = if walk_stopped || dispatch_stopped {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        let report = builder.finish(status, batches);
        let counts = report.counts();
        info!(
            root = %root_label,
            status = ?status,
            succeeded = counts.succeeded,
            skipped = counts.skipped,
            failed = counts.failed,
            pruned_dirs = counts.pruned_dirs,
            batches = counts.batches,
            failed_batches = counts.failed_batches,
            "crawl finished"
        );
        self.progress.report(CrawlProgressEvent::Finished {
            root: root_label,
            succeeded: counts.succeeded as u64,
            skipped: counts.skipped as u64,
            failed: counts.failed as u64,
            cancelled: status == RunStatus::Cancelled,
        });
        Ok(report)
    }

    /// Returns true when cancellation left entries unprocessed.
    async fn dispatch(
        &self,
        mut entries: mpsc::Receiver<WalkItem>,
        events: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) -> bool {
        let slots = Arc::new(Semaphore::new(self.config.crawler.resolved_workers()));
        let timeout = self
            .config
            .crawler
            .extract_timeout_secs
            .map(Duration::from_secs);
        let mut tasks = JoinSet::new();
        let mut stopped = false;

        while let Some(item) = entries.recv().await {
            let event = match item {
                WalkItem::File(entry) => {
                    let permit = tokio::select! {
                        permit = slots.clone().acquire_owned() => permit,
                        _ = cancel.cancelled() => {
                            stopped = true;
                            break;
                        }
                    };
                    let Ok(permit) = permit else { break };
                    if cancel.is_cancelled() {
                        stopped = true;
                        break;
                    }
                    let registry = self.registry.clone();
                    let template = self.template.clone();
                    let events = events.clone();
                    tasks.spawn(async move {
                        let outcome =
                            extract_one(registry, template, entry.clone(), timeout, permit).await;
                        let _ = events.send(Event::Outcome(entry, outcome)).await;
                    });
                    while let Some(done) = tasks.try_join_next() {
                        if let Err(e) = done {
                            error!(error = %e, "extraction task failed");
                        }
                    }
                    continue;
                }
                WalkItem::Rejected(entry, reason) => {
                    Event::Outcome(entry, ExtractionOutcome::Skipped(reason))
                }
                WalkItem::Pruned(path) => Event::Pruned(path),
                WalkItem::Error(message) => Event::WalkError(message),
            };
            if events.send(event).await.is_err() {
                break;
            }
        }
        if stopped {
            debug!(in_flight = tasks.len(), "cancelled; waiting for in-flight extractions");
        }
        while let Some(done) = tasks.join_next().await {
            if let Err(e) = done {
                error!(error = %e, "extraction task failed");
            }
        }
        stopped
    }

    async fn record(
        &self,
        root: &Path,
        mut events: mpsc::Receiver<Event>,
        batches: mpsc::Sender<Batch>,
    ) -> ReportBuilder {
        let mut builder = ReportBuilder::new(root, self.config.crawler.keep_records);
        let mut batcher = RecordBatcher::new(self.config.publish.batch_size);
        let root_label = root.display().to_string();

        while let Some(event) = events.recv().await {
            match event {
                Event::Outcome(entry, outcome) => {
                    if let Some(record) = builder.record(&entry, outcome) {
                        if let Some(writer) = &self.writer {
                            writer.save_or_warn(&record).await;
                        }
                        if let Some(batch) = batcher.add(record) {
                            forward(&batches, batch).await;
                        }
                    }
                    if builder.processed() % REPORT_EVERY == 0 {
                        self.progress.report(CrawlProgressEvent::Extracting {
                            root: root_label.clone(),
                            processed: builder.processed() as u64,
                            failed: builder.failed() as u64,
                        });
                    }
                }
                Event::Pruned(path) => {
                    debug!(path = %path.display(), "pruned directory");
                    builder.pruned();
                }
                Event::WalkError(message) => {
                    warn!(error = %message, "walk error");
                    builder.walk_error(message);
                }
            }
        }
        if let Some(batch) = batcher.flush() {
            forward(&batches, batch).await;
        }
        builder
    }
}

async fn forward(batches: &mpsc::Sender<Batch>, batch: Batch) {
    let index = batch.index();
    if batches.send(batch).await.is_err() {
        error!(batch = index, "publisher is gone; batch dropped");
    }
}

fn resolve_root(root: &Path) -> Result<PathBuf, CrawlError> {
    let metadata = std::fs::metadata(root).map_err(|e| CrawlError::root_io(root, e))?;
    if !metadata.is_dir() {
        return Err(CrawlError::NotADirectory {
            path: root.to_path_buf(),
        });
    }
    std::fs::canonicalize(root).map_err(|e| CrawlError::root_io(root, e))
}

/// What the walker decided about one directory entry.
enum Visit {
    Descend,
    Prune(PathBuf),
    Send(WalkItem),
}

fn visit(
    root: &Path,
    dent: &walkdir::DirEntry,
    filter: &PathFilter,
    follow: bool,
) -> std::io::Result<Visit> {
    let metadata = dent.metadata().map_err(std::io::Error::from)?;
    let is_link = dent.path_is_symlink();
    let kind = if is_link && !follow {
        EntryKind::Symlink
    } else if metadata.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    let path = dent.path().to_path_buf();
    let relative = relative_path(root, &path);
    let mut entry = FileEntry::from_metadata(path, relative, dent.depth(), kind, &metadata);
    if is_link {
        entry.symlink_target = std::fs::read_link(dent.path()).ok();
    }

    Ok(match filter.verdict(&entry, entry.depth) {
        Some(reason) if entry.is_dir() => {
            debug!(path = %entry.path.display(), reason = ?reason, "directory rejected");
            Visit::Prune(entry.path)
        }
        Some(reason) => Visit::Send(WalkItem::Rejected(entry, reason)),
        None if entry.is_dir() => Visit::Descend,
        None if metadata.is_file() => Visit::Send(WalkItem::File(entry)),
        None => Visit::Send(WalkItem::Rejected(entry, SkipReason::SpecialFile)),
    })
}

/// Depth-first walk in file-name order, deterministic for a fixed tree.
/// Returns true when cancellation stopped it before the tree was exhausted.
fn walk(
    root: &Path,
    filter: &PathFilter,
    follow: bool,
    pause: Duration,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<WalkItem>,
) -> bool {
    let mut entries = WalkDir::new(root)
        .follow_links(follow)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter();

    while let Some(next) = entries.next() {
        if cancel.is_cancelled() {
            debug!("walk cancelled");
            return true;
        }
        let item = match next {
            Ok(dent) => match visit(root, &dent, filter, follow) {
                Ok(Visit::Descend) => continue,
                Ok(Visit::Prune(path)) => {
                    if dent.file_type().is_dir() {
                        entries.skip_current_dir();
                    }
                    WalkItem::Pruned(path)
                }
                Ok(Visit::Send(item)) => item,
                Err(e) => WalkItem::Error(format!("{}: {}", dent.path().display(), e)),
            },
            // Symlink loops land here too when following links.
            Err(e) => WalkItem::Error(e.to_string()),
        };
        if tx.blocking_send(item).is_err() {
            break;
        }
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }
    false
}

/// Extract one file on the blocking pool. The worker slot is held by the
/// blocking thread itself, so a timed-out extraction keeps its slot until
/// the thread actually returns.
async fn extract_one(
    registry: Arc<ExtractorRegistry>,
    template: Arc<RecordTemplate>,
    entry: FileEntry,
    timeout: Option<Duration>,
    permit: OwnedSemaphorePermit,
) -> ExtractionOutcome {
    let path = entry.path.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        registry.extract(&entry, &template)
    });
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // The blocking thread keeps running; its result is discarded.
                warn!(path = %path.display(), secs = limit.as_secs(), "extraction timed out");
                return ExtractionOutcome::Failed(ExtractionError::timeout(&path, limit.as_secs()));
            }
        },
        None => handle.await,
    };
    joined.unwrap_or_else(|e| {
        error!(path = %path.display(), error = %e, "extractor panicked");
        ExtractionOutcome::Failed(ExtractionError::corrupt(
            &path,
            format!("extractor panicked: {}", e),
        ))
    })
}

async fn publish_batches(
    publisher: Option<IndexPublisher>,
    mut batches: mpsc::Receiver<Batch>,
    progress: Arc<dyn CrawlProgressReporter>,
) -> Vec<BatchReport> {
    let mut reports = Vec::new();
    let mut halted = false;

    while let Some(batch) = batches.recv().await {
        let report = match &publisher {
            Some(publisher) if !halted => {
                let result = publisher.publish(&batch).await;
                if result
                    .error
                    .as_ref()
                    .is_some_and(PublishError::is_auth_failure)
                {
                    error!(batch = batch.index(), "authentication failed; no further batches will be submitted");
                    halted = true;
                }
                BatchReport::from_result(batch.len(), result)
            }
            Some(_) => {
                debug!(batch = batch.index(), "publishing halted; batch not submitted");
                BatchReport::not_submitted(batch.index(), batch.len())
            }
            None => BatchReport::not_submitted(batch.index(), batch.len()),
        };
        if report.submitted {
            progress.report(CrawlProgressEvent::Published {
                batch: report.index as u64,
                records: report.size as u64,
                ok: !report.is_failure(),
            });
        }
        reports.push(report);
    }
    reports
}
