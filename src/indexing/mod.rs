//! Batched vector indexing.
//!
//! Note writes push an [`IndexingTask`] onto an in-memory FIFO and return.
//! Tasks are embedded and stored later, either when the caller flushes (batch
//! mode) or from a worker thread (background mode). Nothing is persisted: a
//! crash loses whatever is still queued.

pub mod provider;
pub mod watcher;

use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub use provider::{EmbeddingProvider, SearchHit, VectorStore};

use crate::config::{IndexingConfig, IndexingStrategy, VaultConfig};
use crate::error::{Result, VaultError};

/// Characters of the first task's content embedded to learn the vector
/// dimension when the store schema is created.
pub const SCHEMA_PROBE_CHARS: usize = 512;
/// Pause after a failed background batch.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// How long `stop()` waits for the worker thread.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOperation {
    Add,
    Update,
    Remove,
}

impl std::fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexingTask {
    pub file_path: PathBuf,
    pub content: String,
    pub operation: IndexOperation,
    /// Diagnostic only. The queue is FIFO.
    pub priority: i32,
}

impl IndexingTask {
    pub fn new(file_path: &Path, content: &str, operation: IndexOperation) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            content: content.to_string(),
            operation,
            priority: 0,
        }
    }
}

/// Point-in-time snapshot of indexer counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexerStats {
    pub tasks_queued: u64,
    pub tasks_processed: u64,
    pub batches_processed: u64,
    pub errors: u64,
    pub queue_size: usize,
    pub background_running: bool,
}

#[derive(Default)]
struct Counters {
    tasks_queued: AtomicU64,
    tasks_processed: AtomicU64,
    batches_processed: AtomicU64,
    errors: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the indexer handle and its worker thread.
struct Shared {
    queue: Mutex<VecDeque<IndexingTask>>,
    counters: Counters,
    accepting: AtomicBool,
    background_running: AtomicBool,
    schema_ready: Mutex<bool>,
    last_flush: Mutex<Instant>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn VectorStore>>,
    vector_search_enabled: bool,
    batch_size: usize,
}

impl Shared {
    fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    fn should_flush(&self, batch_timeout: Duration) -> bool {
        let len = self.queue_len();
        len >= self.batch_size || (len > 0 && lock(&self.last_flush).elapsed() >= batch_timeout)
    }

    fn process_batch(&self) -> Result<usize> {
        if !self.vector_search_enabled || !self.accepting.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let (embedder, store) = match (&self.embedder, &self.store) {
            (Some(embedder), Some(store)) => (embedder, store),
            _ => return Ok(0),
        };

        let batch: Vec<IndexingTask> = {
            let mut queue = lock(&self.queue);
            let take = queue.len().min(self.batch_size);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }
        *lock(&self.last_flush) = Instant::now();

        {
            let mut ready = lock(&self.schema_ready);
            if !*ready {
                let init = embedder
                    .embed(&schema_probe(&batch[0].content))
                    .and_then(|vector| store.initialize_schema(vector.len()));
                if let Err(e) = init {
                    self.counters
                        .errors
                        .fetch_add(batch.len() as u64, Ordering::SeqCst);
                    log::error!(
                        "[Indexer] Schema initialization failed, dropped {} tasks: {}",
                        batch.len(),
                        e
                    );
                    return Err(e);
                }
                *ready = true;
            }
        }

        let (embedder, store): (&dyn EmbeddingProvider, &dyn VectorStore) =
            (embedder.as_ref(), store.as_ref());
        let mut vectors = embed_batch(embedder, &batch);
        let mut processed = 0usize;
        for task in &batch {
            let result = match task.operation {
                IndexOperation::Remove => store.remove(&task.file_path),
                IndexOperation::Add | IndexOperation::Update => {
                    match vectors.as_mut().and_then(Iterator::next) {
                        Some(vector) => store_vector(embedder, store, task, vector),
                        None => apply_task(embedder, store, task),
                    }
                }
            };
            match result {
                Ok(()) => {
                    processed += 1;
                    self.counters.tasks_processed.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::SeqCst);
                    log::error!(
                        "[Indexer] Failed to {} {} (priority {}): {}",
                        task.operation,
                        task.file_path.display(),
                        task.priority,
                        e
                    );
                }
            }
        }
        self.counters.batches_processed.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "[Indexer] Batch done: {}/{} tasks succeeded",
            processed,
            batch.len()
        );
        Ok(batch.len())
    }
}

/// Text embedded to learn the vector dimension.
pub(crate) fn schema_probe(content: &str) -> String {
    content.chars().take(SCHEMA_PROBE_CHARS).collect()
}

/// Embed every add/update task of a batch in one call. `None` when the
/// provider fails or returns the wrong number of vectors, in which case each
/// task is embedded on its own so one bad note cannot sink the others.
fn embed_batch(
    embedder: &dyn EmbeddingProvider,
    batch: &[IndexingTask],
) -> Option<std::vec::IntoIter<Vec<f32>>> {
    let texts: Vec<&str> = batch
        .iter()
        .filter(|task| task.operation != IndexOperation::Remove)
        .map(|task| task.content.as_str())
        .collect();
    if texts.is_empty() {
        return None;
    }
    match embedder.embed_batch(&texts) {
        Ok(vectors) if vectors.len() == texts.len() => Some(vectors.into_iter()),
        Ok(vectors) => {
            log::warn!(
                "[Indexer] Batch embedding returned {} vectors for {} texts, embedding one by one",
                vectors.len(),
                texts.len()
            );
            None
        }
        Err(e) => {
            log::debug!("[Indexer] Batch embedding failed, embedding one by one: {}", e);
            None
        }
    }
}

/// Store a vector after checking it has the provider's dimension.
fn store_vector(
    embedder: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    task: &IndexingTask,
    vector: Vec<f32>,
) -> Result<()> {
    let expected = embedder.dimension();
    if vector.len() != expected {
        return Err(VaultError::indexing(
            "store_vector",
            format!(
                "Embedding has {} dimensions, expected {}",
                vector.len(),
                expected
            ),
        )
        .with_context("path", task.file_path.display().to_string()));
    }
    store.store(&task.file_path, &vector, &task.content)
}

pub(crate) fn apply_task(
    embedder: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    task: &IndexingTask,
) -> Result<()> {
    match task.operation {
        IndexOperation::Add | IndexOperation::Update => {
            let vector = embedder.embed(&task.content)?;
            store_vector(embedder, store, task, vector)
        }
        IndexOperation::Remove => store.remove(&task.file_path),
    }
}

/// Clears `background_running` when the worker exits, including by panic.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Worker {
    shutdown_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

fn run_worker(
    shared: Arc<Shared>,
    config: IndexingConfig,
    shutdown_rx: Receiver<()>,
    done_tx: Sender<()>,
) {
    let _running = RunningFlag(&shared.background_running);
    log::info!(
        "[Indexer] Background worker started (batch_size={}, timeout={:?})",
        shared.batch_size,
        config.batch_timeout()
    );

    let mut wait = config.poll_interval();
    loop {
        match shutdown_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if !shared.accepting.load(Ordering::SeqCst) {
            break;
        }

        wait = config.poll_interval();
        if shared.should_flush(config.batch_timeout()) {
            if let Err(e) = shared.process_batch() {
                log::error!("[Indexer] Background batch failed: {}", e);
                wait = ERROR_BACKOFF;
            }
        }
    }

    let _ = done_tx.send(());
    log::info!("[Indexer] Background worker stopped");
}

/// Queue of pending index updates plus the optional worker draining it.
pub struct BatchIndexer {
    shared: Arc<Shared>,
    config: IndexingConfig,
    worker: Mutex<Option<Worker>>,
}

impl BatchIndexer {
    /// A caller-driven indexer. Call [`start_background`](Self::start_background)
    /// to hand flushing to a worker thread.
    pub fn new(
        config: IndexingConfig,
        vector_search_enabled: bool,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        store: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        let shared = Shared {
            queue: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
            accepting: AtomicBool::new(true),
            background_running: AtomicBool::new(false),
            schema_ready: Mutex::new(false),
            last_flush: Mutex::new(Instant::now()),
            embedder,
            store,
            vector_search_enabled,
            batch_size: config.batch_size.max(1),
        };
        Self {
            shared: Arc::new(shared),
            config,
            worker: Mutex::new(None),
        }
    }

    pub fn start_background(&self) -> Result<()> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(VaultError::indexing(
                "start_background",
                "Indexer has been stopped",
            ));
        }
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();

        self.shared.background_running.store(true, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("mdvault-indexer".to_string())
            .spawn(move || run_worker(shared, config, shutdown_rx, done_tx))
            .map_err(|e| {
                self.shared.background_running.store(false, Ordering::SeqCst);
                VaultError::indexing("start_background", format!("Failed to spawn worker: {}", e))
            })?;

        *worker = Some(Worker {
            shutdown_tx,
            done_rx,
            handle,
        });
        Ok(())
    }

    pub fn queue_task(&self, file_path: &Path, content: &str, operation: IndexOperation) {
        self.queue(IndexingTask::new(file_path, content, operation));
    }

    pub fn queue(&self, task: IndexingTask) {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            log::debug!(
                "[Indexer] Stopped, ignoring {} for {}",
                task.operation,
                task.file_path.display()
            );
            return;
        }

        let len = {
            let mut queue = lock(&self.shared.queue);
            queue.push_back(task);
            queue.len()
        };
        self.shared.counters.tasks_queued.fetch_add(1, Ordering::SeqCst);

        if !self.shared.background_running.load(Ordering::SeqCst) && len >= self.shared.batch_size {
            if let Err(e) = self.shared.process_batch() {
                log::error!("[Indexer] Inline batch failed: {}", e);
            }
        }
    }

    /// Process up to `batch_size` queued tasks. Returns how many tasks were
    /// taken off the queue, successful or not; 0 when there is nothing to do
    /// or no embedding provider and vector store are configured.
    pub fn process_batch(&self) -> Result<usize> {
        self.shared.process_batch()
    }

    /// Flush until the queue is empty. Returns the number of tasks handled.
    pub fn process_all_pending(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let handled = self.shared.process_batch()?;
            if handled == 0 {
                return Ok(total);
            }
            total += handled;
        }
    }

    /// Stop accepting and processing tasks and shut the worker down. Safe to
    /// call more than once.
    pub fn stop(&self) {
        let was_accepting = self.shared.accepting.swap(false, Ordering::SeqCst);
        let worker = lock(&self.worker).take();

        if let Some(worker) = worker {
            let _ = worker.shutdown_tx.send(());
            match worker.done_rx.recv_timeout(STOP_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        log::warn!("[Indexer] Background worker panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "[Indexer] Background worker did not stop within {:?}",
                        STOP_TIMEOUT
                    );
                }
            }
        }

        if was_accepting {
            log::info!(
                "[Indexer] Stopped with {} tasks still queued",
                self.shared.queue_len()
            );
        }
    }

    pub fn is_stopped(&self) -> bool {
        !self.shared.accepting.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> IndexerStats {
        let counters = &self.shared.counters;
        IndexerStats {
            tasks_queued: counters.tasks_queued.load(Ordering::SeqCst),
            tasks_processed: counters.tasks_processed.load(Ordering::SeqCst),
            batches_processed: counters.batches_processed.load(Ordering::SeqCst),
            errors: counters.errors.load(Ordering::SeqCst),
            queue_size: self.shared.queue_len(),
            background_running: self.shared.background_running.load(Ordering::SeqCst),
        }
    }
}

impl Drop for BatchIndexer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the indexer for `strategy`. `Background` comes back with its worker
/// already running. Yields `None` for `Immediate`, which needs no queue, and
/// whenever nothing could drain a queue: vector search disabled or no
/// embedding provider and vector store.
pub fn create_batch_indexer(
    config: &VaultConfig,
    strategy: IndexingStrategy,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn VectorStore>>,
) -> Result<Option<BatchIndexer>> {
    if strategy == IndexingStrategy::Immediate {
        return Ok(None);
    }
    if !config.vector_search_enabled {
        log::debug!("[Indexer] Vector search disabled, no {} indexer", strategy);
        return Ok(None);
    }
    let (embedder, store) = match (embedder, store) {
        (Some(embedder), Some(store)) => (embedder, store),
        _ => {
            log::info!(
                "[Indexer] No embedding provider or vector store, {} indexing off",
                strategy
            );
            return Ok(None);
        }
    };
    let indexer = BatchIndexer::new(config.indexing.clone(), true, Some(embedder), Some(store));
    if strategy == IndexingStrategy::Background {
        indexer.start_background()?;
    }
    log::info!(
        "[Indexer] Created {} indexer (batch_size={})",
        strategy,
        config.indexing.batch_size
    );
    Ok(Some(indexer))
}

/// Lazily-initialized indexer owned by a vault.
#[derive(Default)]
pub struct IndexerSlot {
    cell: OnceCell<Option<Arc<BatchIndexer>>>,
}

impl IndexerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the indexer, running `create` on first use. A failed `create`
    /// leaves the slot empty so the next call retries.
    pub fn get_or_create<F>(&self, create: F) -> Result<Option<Arc<BatchIndexer>>>
    where
        F: FnOnce() -> Result<Option<BatchIndexer>>,
    {
        self.cell
            .get_or_try_init(|| create().map(|indexer| indexer.map(Arc::new)))
            .map(Option::clone)
    }

    /// The indexer if it has been created.
    pub fn get(&self) -> Option<Arc<BatchIndexer>> {
        self.cell.get().and_then(Option::clone)
    }
}
