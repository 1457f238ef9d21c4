//! Debounced per-resource analysis.
//!
//! Every change to a resource (re)arms a size-tiered debounce timer; only the
//! timer that survives a burst of changes sends a request. At most one
//! analysis per resource is in flight. A change that lands while one is in
//! flight is kept, and the completion re-arms the timer once so the newest
//! text is eventually analyzed.
//!
//! Job state lives behind a `std::sync::Mutex` that is never held across an
//! await. Timers are spawned tasks; re-arming aborts the previous one, and a
//! generation counter catches timers that woke before they could be aborted.
//!
//! The in-flight slot belongs to the path rather than the job, so it outlives
//! `close`. It is released when the request completes or its future is dropped.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use aura_protocol::RequestError;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::AnalysisBackend;
use crate::diagnostics::DiagnosticsTranslator;
use crate::document::Document;
use crate::settings::SchedulerSettings;
use crate::types::Annotation;

/// Why a resource was not analyzed. Informational, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge { bytes: usize, limit: usize },
    Empty,
    UnsupportedLanguage(String),
    AlreadyInFlight,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { bytes, limit } => {
                write!(f, "too large ({bytes} bytes, limit {limit})")
            }
            Self::Empty => f.write_str("empty"),
            Self::UnsupportedLanguage(lang) => write!(f, "unsupported language {lang:?}"),
            Self::AlreadyInFlight => f.write_str("analysis already in flight"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Skipped {
        path: PathBuf,
        reason: SkipReason,
    },
    Started {
        path: PathBuf,
    },
    Completed {
        path: PathBuf,
        annotations: usize,
        elapsed: Duration,
    },
    Failed {
        path: PathBuf,
        error: String,
    },
    /// The result arrived after the resource was closed or the scheduler disposed.
    Discarded {
        path: PathBuf,
    },
    SweepProgress {
        processed: usize,
        total: usize,
    },
}

/// What `on_change` did with a change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDisposition {
    Scheduled { delay: Duration },
    Skipped(SkipReason),
    /// The scheduler has been disposed.
    Ignored,
}

#[derive(Debug)]
pub enum AnalysisOutcome {
    Analyzed(Arc<[Annotation]>),
    Skipped(SkipReason),
    Failed(RequestError),
    Discarded,
}

/// Totals for one workspace sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub total: usize,
    pub analyzed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub discarded: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &AnalysisOutcome) {
        match outcome {
            AnalysisOutcome::Analyzed(_) => self.analyzed += 1,
            AnalysisOutcome::Skipped(_) => self.skipped += 1,
            AnalysisOutcome::Failed(_) => self.failed += 1,
            AnalysisOutcome::Discarded => self.discarded += 1,
        }
    }
}

struct AnalysisJob {
    /// When the armed timer fires.
    scheduled_at: Option<Instant>,
    debounce: Option<JoinHandle<()>>,
    /// Generation of the most recently armed timer.
    timer: u64,
    /// Newest text not yet handed to the backend.
    latest: Option<Document>,
    changed_while_in_flight: bool,
    /// Identifies this job instance; a closed-then-reopened resource gets a new one.
    epoch: u64,
}

impl AnalysisJob {
    fn new(epoch: u64) -> Self {
        Self {
            scheduled_at: None,
            debounce: None,
            timer: 0,
            latest: None,
            changed_while_in_flight: false,
            epoch,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
        self.scheduled_at = None;
        self.timer += 1;
    }
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<PathBuf, AnalysisJob>,
    /// Paths with a request at the backend, including closed ones.
    running: HashSet<PathBuf>,
    next_epoch: u64,
    disposed: bool,
}

impl SchedulerState {
    fn job(&mut self, path: &Path) -> &mut AnalysisJob {
        let next_epoch = &mut self.next_epoch;
        self.jobs.entry(path.to_path_buf()).or_insert_with(|| {
            *next_epoch += 1;
            AnalysisJob::new(*next_epoch)
        })
    }
}

struct SchedulerInner {
    settings: SchedulerSettings,
    backend: Arc<dyn AnalysisBackend>,
    translator: Arc<DiagnosticsTranslator>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    state: Mutex<SchedulerState>,
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }

    fn admit(&self, document: &Document) -> Result<(), SkipReason> {
        let limit = self.settings.max_resource_bytes;
        if document.len() > limit {
            return Err(SkipReason::TooLarge {
                bytes: document.len(),
                limit,
            });
        }
        if document.is_empty() {
            return Err(SkipReason::Empty);
        }
        if !self.settings.supports(&document.language_id) {
            return Err(SkipReason::UnsupportedLanguage(document.language_id.clone()));
        }
        Ok(())
    }

    fn skip(&self, path: &Path, reason: SkipReason) {
        tracing::debug!(path = %path.display(), %reason, "Skipping analysis");
        self.emit(SchedulerEvent::Skipped {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// Holds a path's in-flight slot. Dropping it frees the slot and re-arms the
/// timer for text that arrived while the request was running.
struct InFlight<'a> {
    inner: &'a Arc<SchedulerInner>,
    path: PathBuf,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.running.remove(&self.path);
        if state.disposed {
            return;
        }
        let Some(job) = state.jobs.get_mut(&self.path) else {
            return;
        };
        if !job.changed_while_in_flight || job.debounce.is_some() {
            return;
        }
        job.changed_while_in_flight = false;
        let pending = job.latest.as_ref().map(Document::len);
        if let Some(bytes) = pending
            && tokio::runtime::Handle::try_current().is_ok()
        {
            let delay = self.inner.settings.debounce_for(bytes);
            tracing::debug!(path = %self.path.display(), ?delay, "Re-arming for newer text");
            arm(self.inner, job, &self.path, delay);
        }
    }
}

fn arm(inner: &Arc<SchedulerInner>, job: &mut AnalysisJob, path: &Path, delay: Duration) {
    job.cancel_timer();
    let generation = job.timer;
    job.scheduled_at = Some(Instant::now() + delay);

    let inner = Arc::clone(inner);
    let path = path.to_path_buf();
    job.debounce = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fire(&inner, &path, generation).await;
    }));
}

async fn fire(inner: &Arc<SchedulerInner>, path: &Path, generation: u64) {
    let (document, epoch) = {
        let mut state = inner.lock();
        if state.disposed {
            return;
        }
        let busy = state.running.contains(path);
        let Some(job) = state.jobs.get_mut(path) else {
            return;
        };
        if job.timer != generation {
            return;
        }
        // Detach this task from the job so a later re-arm cannot abort the request.
        job.debounce = None;
        job.scheduled_at = None;
        if busy {
            job.changed_while_in_flight = true;
            tracing::trace!(path = %path.display(), "Debounce fired during analysis");
            return;
        }
        let Some(document) = job.latest.take() else {
            return;
        };
        job.changed_while_in_flight = false;
        let epoch = job.epoch;
        state.running.insert(path.to_path_buf());
        (document, epoch)
    };
    run(inner, document, epoch).await;
}

/// Send one request. The caller has already claimed the path's slot.
async fn run(inner: &Arc<SchedulerInner>, document: Document, epoch: u64) -> AnalysisOutcome {
    let path = document.path.clone();
    let _slot = InFlight {
        inner,
        path: path.clone(),
    };
    tracing::debug!(path = %path.display(), bytes = document.len(), "Analysis started");
    inner.emit(SchedulerEvent::Started { path: path.clone() });
    let started = Instant::now();

    let result = inner.backend.analyze(&document).await;

    let outcome = {
        let state = inner.lock();
        let current = !state.disposed
            && state
                .jobs
                .get(&path)
                .is_some_and(|job| job.epoch == epoch);
        match result {
            Ok(issues) if current => {
                AnalysisOutcome::Analyzed(inner.translator.apply(&path, &issues))
            }
            Err(e) if current => AnalysisOutcome::Failed(e),
            _ => AnalysisOutcome::Discarded,
        }
    };

    let elapsed = started.elapsed();
    match &outcome {
        AnalysisOutcome::Analyzed(annotations) => {
            tracing::debug!(
                path = %path.display(),
                annotations = annotations.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Analysis complete"
            );
            inner.emit(SchedulerEvent::Completed {
                path,
                annotations: annotations.len(),
                elapsed,
            });
        }
        AnalysisOutcome::Failed(e) => {
            tracing::warn!(path = %path.display(), "Analysis failed: {e}");
            inner.emit(SchedulerEvent::Failed {
                path,
                error: e.to_string(),
            });
        }
        AnalysisOutcome::Discarded => {
            tracing::debug!(path = %path.display(), "Discarding stale analysis result");
            inner.emit(SchedulerEvent::Discarded { path });
        }
        AnalysisOutcome::Skipped(_) => {}
    }
    outcome
}

/// Per-resource analysis scheduler. Cheap to clone; clones share state.
///
/// Methods that arm timers spawn Tokio tasks and must run inside a runtime.
#[derive(Clone)]
pub struct AnalysisScheduler {
    inner: Arc<SchedulerInner>,
}

impl AnalysisScheduler {
    pub fn new(
        settings: SchedulerSettings,
        backend: Arc<dyn AnalysisBackend>,
        translator: Arc<DiagnosticsTranslator>,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = SchedulerInner {
            settings,
            backend,
            translator,
            events,
            state: Mutex::new(SchedulerState::default()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn translator(&self) -> &Arc<DiagnosticsTranslator> {
        &self.inner.translator
    }

    /// Record a change and (re)arm the resource's debounce timer.
    pub fn on_change(&self, document: Document) -> ChangeDisposition {
        if let Err(reason) = self.inner.admit(&document) {
            self.inner.skip(&document.path, reason.clone());
            return ChangeDisposition::Skipped(reason);
        }
        let delay = self.inner.settings.debounce_for(document.len());

        let mut state = self.inner.lock();
        if state.disposed {
            return ChangeDisposition::Ignored;
        }
        let path = document.path.clone();
        let busy = state.running.contains(&path);
        let job = state.job(&path);
        if busy {
            job.changed_while_in_flight = true;
        }
        job.latest = Some(document);
        arm(&self.inner, job, &path, delay);
        tracing::trace!(path = %path.display(), ?delay, "Debounce armed");
        ChangeDisposition::Scheduled { delay }
    }

    /// Analyze immediately, cancelling any pending debounce.
    ///
    /// Still one request per resource: returns `Skipped(AlreadyInFlight)`
    /// when one is running, and the running analysis picks up this text
    /// when it completes. Dropping the future abandons the request and frees
    /// the resource.
    pub async fn analyze_now(&self, document: Document) -> AnalysisOutcome {
        if let Err(reason) = self.inner.admit(&document) {
            self.inner.skip(&document.path, reason.clone());
            return AnalysisOutcome::Skipped(reason);
        }

        let epoch = {
            let mut state = self.inner.lock();
            if state.disposed {
                return AnalysisOutcome::Discarded;
            }
            let busy = state.running.contains(&document.path);
            let job = state.job(&document.path);
            job.cancel_timer();
            if busy {
                job.latest = Some(document.clone());
                job.changed_while_in_flight = true;
                drop(state);
                self.inner.skip(&document.path, SkipReason::AlreadyInFlight);
                return AnalysisOutcome::Skipped(SkipReason::AlreadyInFlight);
            }
            job.latest = None;
            job.changed_while_in_flight = false;
            let epoch = job.epoch;
            state.running.insert(document.path.clone());
            epoch
        };
        run(&self.inner, document, epoch).await
    }

    /// Analyze `documents` in batches of `batch_size`, one batch at a time.
    pub async fn sweep(&self, documents: Vec<Document>) -> SweepReport {
        let total = documents.len();
        let batch_size = self.inner.settings.batch_size.max(1);
        let mut report = SweepReport {
            total,
            ..SweepReport::default()
        };
        tracing::info!(total, batch_size, "Workspace sweep started");

        let mut processed = 0;
        for batch in documents.chunks(batch_size) {
            let outcomes = join_all(batch.iter().cloned().map(|doc| self.analyze_now(doc))).await;
            for outcome in &outcomes {
                report.record(outcome);
            }
            processed += batch.len();
            self.inner
                .emit(SchedulerEvent::SweepProgress { processed, total });
            tracing::debug!(processed, total, "Sweep progress");

            if self.inner.lock().disposed {
                break;
            }
        }

        tracing::info!(
            analyzed = report.analyzed,
            skipped = report.skipped,
            failed = report.failed,
            "Workspace sweep finished"
        );
        report
    }

    /// Forget a resource along with its timer and annotations. A request
    /// already at the backend keeps the path busy until it returns.
    pub fn close(&self, path: &Path) {
        let mut state = self.inner.lock();
        if let Some(mut job) = state.jobs.remove(path) {
            job.cancel_timer();
        }
        self.inner.translator.clear(path);
    }

    /// Cancel every timer and ignore all further events. In-flight
    /// requests finish but their results are discarded.
    pub fn dispose(&self) {
        let mut state = self.inner.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        for job in state.jobs.values_mut() {
            job.cancel_timer();
        }
        state.jobs.clear();
        tracing::debug!("Analysis scheduler disposed");
    }

    #[must_use]
    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.inner.lock().running.contains(path)
    }

    /// When the resource's armed timer fires, if one is armed.
    #[must_use]
    pub fn scheduled_at(&self, path: &Path) -> Option<Instant> {
        self.inner
            .lock()
            .jobs
            .get(path)
            .and_then(|job| job.scheduled_at)
    }
}
