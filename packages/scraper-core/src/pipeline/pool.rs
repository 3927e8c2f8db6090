//! Bounded worker pool over one shared FIFO queue.
//!
//! Workers pull [`ScrapeInput`]s, build a [`ScrapeRequest`], and hand it to
//! the configured [`Extractor`]. Per-item failures are reported through the
//! `on_error` callback and never stop sibling workers.
//!
//! With `preserve_order` set, results land in a pre-sized slot array. Each URL
//! owns a FIFO list of pending slot indices, so duplicate URLs fill their
//! slots first-come-first-filled. The lock covers only the slot claim; the
//! extraction itself runs fully concurrently.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::ScrapeError;
use crate::traits::extractor::Extractor;
use crate::types::item::ScrapedItem;
use crate::types::request::{ScrapeInput, ScrapeRequest};

pub type ItemCallback = Arc<dyn Fn(&ScrapedItem) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str, &ScrapeError) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

// ============================================================================
// Configuration
// ============================================================================

/// Pool configuration. Treated as immutable once handed to [`WorkerPool`].
#[derive(Clone)]
pub struct WorkerPoolConfig {
    /// Concurrent workers, at least 1
    pub concurrency: usize,
    pub take_screenshot: bool,
    /// Queue capacity; `None` sizes the queue to the input count
    pub max_queue_size: Option<usize>,
    pub on_item_processed: Option<ItemCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_progress: Option<ProgressCallback>,
    pub preserve_order: bool,
    pub cancel: CancelToken,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            take_screenshot: false,
            max_queue_size: None,
            on_item_processed: None,
            on_error: None,
            on_progress: None,
            preserve_order: false,
            cancel: CancelToken::none(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..Self::default()
        }
    }

    pub fn with_screenshots(mut self, take_screenshot: bool) -> Self {
        self.take_screenshot = take_screenshot;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size.max(1));
        self
    }

    pub fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Poll `predicate` alongside any cancel flag already configured.
    pub fn with_should_cancel<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.cancel = self.cancel.with_predicate(predicate);
        self
    }

    pub fn on_item_processed<F>(mut self, f: F) -> Self
    where
        F: Fn(&ScrapedItem) + Send + Sync + 'static,
    {
        self.on_item_processed = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &ScrapeError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for WorkerPoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolConfig")
            .field("concurrency", &self.concurrency)
            .field("take_screenshot", &self.take_screenshot)
            .field("max_queue_size", &self.max_queue_size)
            .field("preserve_order", &self.preserve_order)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Result Collection
// ============================================================================

enum Collector {
    Unordered(Vec<ScrapedItem>),
    Ordered {
        slots: Vec<Option<ScrapedItem>>,
        pending: HashMap<String, VecDeque<usize>>,
    },
}

impl Collector {
    fn new(inputs: &[ScrapeInput], preserve_order: bool) -> Self {
        if !preserve_order {
            return Collector::Unordered(Vec::with_capacity(inputs.len()));
        }
        let mut pending: HashMap<String, VecDeque<usize>> = HashMap::new();
        for (idx, input) in inputs.iter().enumerate() {
            pending.entry(input.url.clone()).or_default().push_back(idx);
        }
        Collector::Ordered {
            slots: vec![None; inputs.len()],
            pending,
        }
    }

    fn place(&mut self, url: &str, item: ScrapedItem) {
        match self {
            Collector::Unordered(items) => items.push(item),
            Collector::Ordered { slots, pending } => {
                match pending.get_mut(url).and_then(VecDeque::pop_front) {
                    Some(idx) => slots[idx] = Some(item),
                    None => warn!(url = %url, "No pending slot for result; dropping"),
                }
            }
        }
    }

    fn into_items(self) -> Vec<ScrapedItem> {
        match self {
            Collector::Unordered(items) => items,
            Collector::Ordered { slots, .. } => slots.into_iter().flatten().collect(),
        }
    }
}

// ============================================================================
// Pool
// ============================================================================

struct Shared {
    extractor: Arc<dyn Extractor>,
    config: WorkerPoolConfig,
    total: usize,
    done: AtomicUsize,
    /// Highest progress value reported so far
    reported: Mutex<Option<usize>>,
    results: Mutex<Collector>,
}

impl Shared {
    fn results(&self) -> MutexGuard<'_, Collector> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report progress without going backwards or repeating a value.
    fn report_progress(&self, done: usize) {
        let Some(on_progress) = &self.config.on_progress else {
            return;
        };
        let mut reported = self.reported.lock().unwrap_or_else(PoisonError::into_inner);
        if reported.is_some_and(|last| done <= last) {
            return;
        }
        *reported = Some(done);
        guarded("on_progress", || on_progress(done, self.total));
    }

    async fn process(&self, worker_id: usize, input: ScrapeInput) {
        let url = input.url.clone();
        debug!(worker_id, url = %url, "Processing item");

        let outcome = match ScrapeRequest::from_input(&input, self.config.take_screenshot) {
            Ok(request) => AssertUnwindSafe(self.extractor.extract(request, &self.config.cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ScrapeError::WorkerPanic(panic_message(&*panic)))),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some(item)) => {
                if let Some(on_item) = &self.config.on_item_processed {
                    guarded("on_item_processed", || on_item(&item));
                }
                self.results().place(&url, item);
                debug!(worker_id, url = %url, "Item extracted");
            }
            Ok(None) => {
                debug!(worker_id, url = %url, "No item extracted");
            }
            Err(e) => {
                warn!(worker_id, url = %url, error = %e, "Extraction failed");
                if let Some(on_error) = &self.config.on_error {
                    guarded("on_error", || on_error(&url, &e));
                }
            }
        }

        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        self.report_progress(done);
    }
}

type SharedQueue = Arc<AsyncMutex<mpsc::Receiver<ScrapeInput>>>;

async fn worker_loop(worker_id: usize, shared: Arc<Shared>, queue: SharedQueue) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(input) = next else {
            break;
        };
        if shared.config.cancel.is_canceled() {
            debug!(worker_id, url = %input.url, "Draining item after cancellation");
            continue;
        }
        shared.process(worker_id, input).await;
    }
    debug!(worker_id, "Worker finished");
}

/// Runs one batch of inputs through an extractor.
pub struct WorkerPool {
    extractor: Arc<dyn Extractor>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(extractor: Arc<dyn Extractor>, config: WorkerPoolConfig) -> Self {
        Self { extractor, config }
    }

    /// Process every input and return the extracted items.
    ///
    /// Cancellation before start returns nothing. Cancellation mid-run lets
    /// in-flight items finish, drains the rest, and returns what was collected.
    pub async fn run(&self, inputs: Vec<ScrapeInput>) -> Vec<ScrapedItem> {
        let cancel = self.config.cancel.clone();
        if cancel.is_canceled() {
            info!("Worker pool canceled before start");
            return Vec::new();
        }

        let total = inputs.len();
        let shared = Arc::new(Shared {
            extractor: self.extractor.clone(),
            config: self.config.clone(),
            total,
            done: AtomicUsize::new(0),
            reported: Mutex::new(None),
            results: Mutex::new(Collector::new(&inputs, self.config.preserve_order)),
        });

        shared.report_progress(0);
        if total == 0 {
            return Vec::new();
        }

        let workers = self.config.concurrency.max(1).min(total);
        let capacity = self.config.max_queue_size.unwrap_or(total).max(1);
        info!(
            extractor = self.extractor.name(),
            total,
            workers,
            preserve_order = self.config.preserve_order,
            "Starting worker pool"
        );

        let (tx, rx) = mpsc::channel::<ScrapeInput>(capacity);
        let queue: SharedQueue = Arc::new(AsyncMutex::new(rx));

        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            for input in inputs {
                if producer_cancel.is_canceled() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = producer_cancel.cancelled() => break,
                    sent = tx.send(input) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            set.spawn(worker_loop(worker_id, shared.clone(), queue.clone()));
        }

        if let Err(e) = producer.await {
            warn!(error = %e, "Queue producer failed");
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task failed");
            }
        }

        let canceled = cancel.is_canceled();
        if !canceled {
            shared.report_progress(total);
        }

        let items =
            std::mem::replace(&mut *shared.results(), Collector::Unordered(Vec::new())).into_items();

        info!(
            total,
            extracted = items.len(),
            canceled,
            "Worker pool finished"
        );
        items
    }
}

/// Run a callback, logging instead of unwinding if it panics.
pub(crate) fn guarded(name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(callback = name, "Callback panicked; ignoring");
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
