//! File synchronization engine.
//!
//! [`SyncEngine`] reconciles the local vault against the remote file store,
//! uploads the notes that are missing, and feeds every upload into a pending
//! buffer that the population scheduler (see [`crate::scheduler`]) later
//! attaches to the vector store in one batch.
//!
//! # Lifecycle
//!
//! ```text
//! SyncEngine::new ──▶ resolve vector store ──▶ resolve assistant ──▶ start scheduler
//!        │                                                               │
//!        ▼                                                               ▼
//!   sync() / add_remote_file ──▶ pending buffer ──────────────▶ file batch (per tick)
//! ```
//!
//! Initialization runs in the background; [`SyncEngine::ready`] waits for
//! it. [`SyncEngine::shutdown`] stops future scheduler ticks.
//!
//! # Matching
//!
//! A local note counts as synchronized when any remote file's `filename`
//! equals the note's vault path. Content is never compared.
//!
//! # Resource resolution
//!
//! The vector store and assistant are looked up by their well-known names,
//! scanning pages until the first match, and created when absent. Nothing
//! prevents two engines from racing through the scan and both creating a
//! resource; the first match on later scans wins.

use anyhow::{bail, Context, Result};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, DEFAULT_FLUSH_INTERVAL, DEFAULT_RESOURCE_NAME};
use crate::error::EngineError;
use crate::models::{
    Assistant, AssistantRequest, FilePurpose, Identified, LocalDocument, Page, RemoteFile,
    VectorStore, VectorStoreFile,
};
use crate::scheduler::{self, FlushOutcome, PopulationFlag, PopulationStatus};
use crate::traits::{DocumentSource, RemoteClients};

/// Tunables for a [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub vector_store_name: String,
    pub assistant_name: String,
    pub assistant_model: String,
    pub assistant_instructions: Option<String>,
    /// Period of the population scheduler.
    pub flush_interval: Duration,
    /// Put a failed batch back in the buffer instead of dropping it.
    pub requeue_failed_batches: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vector_store_name: DEFAULT_RESOURCE_NAME.to_string(),
            assistant_name: DEFAULT_RESOURCE_NAME.to_string(),
            assistant_model: "gpt-4o".to_string(),
            assistant_instructions: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            requeue_failed_batches: false,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            vector_store_name: config.assistant.vector_store_name.clone(),
            assistant_name: config.assistant.name.clone(),
            assistant_model: config.assistant.model.clone(),
            assistant_instructions: config.assistant.instructions.clone(),
            flush_interval: config.sync.flush_interval(),
            requeue_failed_batches: config.sync.requeue_failed_batches,
        }
    }
}

pub struct SyncEngineOptions {
    pub remote: RemoteClients,
    pub source: Arc<dyn DocumentSource>,
    pub settings: EngineSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InitState {
    Pending,
    Ready,
    Failed(String),
}

pub(crate) struct EngineInner {
    pub(crate) remote: RemoteClients,
    source: Arc<dyn DocumentSource>,
    pub(crate) settings: EngineSettings,
    pending: Mutex<Vec<RemoteFile>>,
    pub(crate) population: Arc<PopulationFlag>,
    vector_store: RwLock<Option<VectorStore>>,
    assistant: RwLock<Option<Assistant>>,
    init: watch::Sender<InitState>,
    shutdown: watch::Sender<bool>,
    pub(crate) flushes: broadcast::Sender<FlushOutcome>,
}

impl EngineInner {
    pub(crate) fn lock_pending(&self) -> MutexGuard<'_, Vec<RemoteFile>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop a deleted file from the pending buffer so the next batch does
    /// not reference it.
    fn forget_pending(&self, file_id: &str) {
        self.lock_pending().retain(|f| f.id != file_id);
    }

    pub(crate) fn current_vector_store(&self) -> Option<VectorStore> {
        self.vector_store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_vector_store(&self, vector_store: Option<VectorStore>) {
        *self
            .vector_store
            .write()
            .unwrap_or_else(PoisonError::into_inner) = vector_store;
    }

    fn set_assistant(&self, assistant: Option<Assistant>) {
        *self.assistant.write().unwrap_or_else(PoisonError::into_inner) = assistant;
    }
}

/// Handle to the synchronization engine. Clones share the same state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Build the engine and start background initialization.
    ///
    /// Must be called from within a Tokio runtime; the vector store and
    /// assistant are resolved on a spawned task, after which the population
    /// scheduler starts ticking every `settings.flush_interval`.
    pub fn new(options: SyncEngineOptions) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("SyncEngine must be created inside a Tokio runtime")?;

        let (init, _) = watch::channel(InitState::Pending);
        let (shutdown, _) = watch::channel(false);
        let (flushes, _) = broadcast::channel(64);

        let engine = Self {
            inner: Arc::new(EngineInner {
                remote: options.remote,
                source: options.source,
                settings: options.settings,
                pending: Mutex::new(Vec::new()),
                population: Arc::new(PopulationFlag::new()),
                vector_store: RwLock::new(None),
                assistant: RwLock::new(None),
                init,
                shutdown,
                flushes,
            }),
        };

        runtime.spawn(engine.clone().initialize());
        Ok(engine)
    }

    async fn initialize(self) {
        let state = match self.get_or_create_vector_store().await {
            Ok(vector_store) => {
                self.inner.set_vector_store(Some(vector_store.clone()));

                if let Err(e) = self.get_or_create_assistant(&vector_store).await {
                    warn!(error = %format!("{:#}", e), "could not resolve assistant");
                }
                InitState::Ready
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "could not resolve vector store");
                InitState::Failed(format!("{:#}", e))
            }
        };

        let ready = state == InitState::Ready;
        self.inner.init.send_replace(state);

        if ready && !*self.inner.shutdown.borrow() {
            let period = self.inner.settings.flush_interval.max(Duration::from_millis(1));
            scheduler::spawn(Arc::downgrade(&self.inner), period, self.inner.shutdown.subscribe());
        }
    }

    /// Wait for background initialization and return the resolved vector
    /// store.
    pub async fn ready(&self) -> Result<VectorStore> {
        let mut rx = self.inner.init.subscribe();
        let state = rx
            .wait_for(|s| *s != InitState::Pending)
            .await
            .map_err(|_| EngineError::InitAborted)?
            .clone();

        match state {
            InitState::Ready => self
                .vector_store()
                .ok_or_else(|| EngineError::VectorStoreNotInitialized.into()),
            InitState::Failed(message) => Err(EngineError::InitFailed(message).into()),
            InitState::Pending => Err(EngineError::InitAborted.into()),
        }
    }

    /// Stop the population scheduler. An attach already in flight is left
    /// to complete; pending files stay buffered.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        debug!("sync engine shutdown requested");
    }

    pub fn vector_store(&self) -> Option<VectorStore> {
        self.inner.current_vector_store()
    }

    pub fn assistant(&self) -> Option<Assistant> {
        self.inner
            .assistant
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn population_status(&self) -> PopulationStatus {
        self.inner.population.status()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Files uploaded since the last flush, in upload order.
    pub fn pending_files(&self) -> Vec<RemoteFile> {
        self.inner.lock_pending().clone()
    }

    /// Receive the outcome of every population attempt that reached the
    /// remote index.
    pub fn subscribe_flushes(&self) -> broadcast::Receiver<FlushOutcome> {
        self.inner.flushes.subscribe()
    }

    /// Upload every local note that has no remote counterpart.
    ///
    /// The returned stream is lazy: nothing happens until it is polled, and
    /// each item is yielded right after its upload completes. Uploads happen
    /// one at a time in the source's enumeration order. The remote listing is
    /// fetched once per pass. The first error ends the stream; notes uploaded
    /// before it stay uploaded.
    pub fn sync(&self) -> BoxStream<'static, Result<LocalDocument>> {
        stream::try_unfold(SyncPass::Start(self.clone()), |pass| pass.advance()).boxed()
    }

    /// Upload one note and queue it for the next population batch.
    ///
    /// Returns `None` without contacting the remote when the note is empty.
    pub async fn add_remote_file(&self, doc: &LocalDocument) -> Result<Option<RemoteFile>> {
        if doc.contents.is_empty() {
            return Ok(None);
        }

        let file = self
            .inner
            .remote
            .files
            .create_file(
                &doc.path,
                doc.contents.as_bytes().to_vec(),
                FilePurpose::Assistants,
            )
            .await
            .with_context(|| format!("Failed to upload {}", doc.path))?;

        self.inner.lock_pending().push(file.clone());
        info!(path = %doc.path, file_id = %file.id, "uploaded note");

        Ok(Some(file))
    }

    /// Full listing of assistant-purpose remote files, every page drained.
    pub async fn list_remote_files(&self) -> Result<Vec<RemoteFile>> {
        let files = &self.inner.remote.files;
        collect_pages(|after| async move {
            files
                .list_files(FilePurpose::Assistants, after.as_deref())
                .await
        })
        .await
        .context("Failed to list remote files")
    }

    /// Delete every remote file named `path`. Returns how many were removed;
    /// zero is not an error. Deleted files also leave the pending buffer.
    ///
    /// The vector store may keep serving deleted files until the remote side
    /// catches up.
    pub async fn delete_remote_file(&self, path: &str) -> Result<usize> {
        let files = self.list_remote_files().await?;
        let mut deleted = 0;

        for file in files.iter().filter(|f| f.filename == path) {
            self.inner.remote.files.delete_file(&file.id).await?;
            self.inner.forget_pending(&file.id);
            deleted += 1;
        }

        debug!(path, deleted, "deleted remote file");
        Ok(deleted)
    }

    /// Delete every assistant-purpose remote file.
    pub async fn delete_remote_files(&self) -> Result<usize> {
        let files = self.list_remote_files().await?;

        for file in &files {
            self.inner.remote.files.delete_file(&file.id).await?;
            self.inner.forget_pending(&file.id);
        }

        info!(deleted = files.len(), "deleted all remote files");
        Ok(files.len())
    }

    /// Files attached to the resolved vector store, every page drained.
    pub async fn list_vector_store_files(&self) -> Result<Vec<VectorStoreFile>> {
        let vector_store = self
            .vector_store()
            .ok_or(EngineError::VectorStoreNotInitialized)?;
        let index = &self.inner.remote.index;
        let id = vector_store.id.as_str();

        collect_pages(|after| async move {
            index.list_vector_store_files(id, after.as_deref()).await
        })
        .await
        .with_context(|| format!("Failed to list files of vector store {}", id))
    }

    /// Find the vector store with the configured name, creating it when no
    /// page contains one.
    pub async fn get_or_create_vector_store(&self) -> Result<VectorStore> {
        let name = self.inner.settings.vector_store_name.as_str();
        let index = &self.inner.remote.index;

        let existing = find_in_pages(
            |after| async move { index.list_vector_stores(after.as_deref()).await },
            |vs: &VectorStore| vs.has_name(name),
        )
        .await
        .context("Failed to list vector stores")?;

        if let Some(vector_store) = existing {
            debug!(id = %vector_store.id, "found vector store");
            return Ok(vector_store);
        }

        let vector_store = index
            .create_vector_store(name)
            .await
            .context("Failed to create vector store")?;
        info!(id = %vector_store.id, name, "created vector store");
        Ok(vector_store)
    }

    /// Find the assistant with the configured name, creating one bound to
    /// `vector_store` when absent.
    ///
    /// Every call repeats the full scan; the result also becomes the
    /// engine's current assistant.
    pub async fn get_or_create_assistant(&self, vector_store: &VectorStore) -> Result<Assistant> {
        let settings = &self.inner.settings;
        let assistants = &self.inner.remote.assistants;
        let name = settings.assistant_name.as_str();

        let existing = find_in_pages(
            |after| async move { assistants.list_assistants(after.as_deref()).await },
            |a: &Assistant| a.has_name(name),
        )
        .await
        .context("Failed to list assistants")?;

        let assistant = match existing {
            Some(assistant) => {
                debug!(id = %assistant.id, "found assistant");
                assistant
            }
            None => {
                let request = AssistantRequest {
                    name: name.to_string(),
                    model: settings.assistant_model.clone(),
                    instructions: settings.assistant_instructions.clone(),
                    vector_store_id: vector_store.id.clone(),
                };
                let assistant = assistants
                    .create_assistant(&request)
                    .await
                    .context("Failed to create assistant")?;
                info!(
                    id = %assistant.id,
                    name,
                    vector_store = %vector_store.id,
                    "created assistant"
                );
                assistant
            }
        };

        self.inner.set_assistant(Some(assistant.clone()));
        Ok(assistant)
    }

    /// Delete the resolved vector store, if any, and forget it.
    pub async fn delete_vector_store(&self) -> Result<Option<VectorStore>> {
        let Some(vector_store) = self.vector_store() else {
            return Ok(None);
        };

        self.inner
            .remote
            .index
            .delete_vector_store(&vector_store.id)
            .await?;
        self.inner.set_vector_store(None);
        info!(id = %vector_store.id, "deleted vector store");
        Ok(Some(vector_store))
    }

    /// Delete the current assistant, if any, and forget it.
    pub async fn delete_assistant(&self) -> Result<Option<Assistant>> {
        let Some(assistant) = self.assistant() else {
            return Ok(None);
        };

        self.inner
            .remote
            .assistants
            .delete_assistant(&assistant.id)
            .await?;
        self.inner.set_assistant(None);
        info!(id = %assistant.id, "deleted assistant");
        Ok(Some(assistant))
    }

    /// Run one population attempt now, subject to the same at-most-one guard
    /// as the scheduler.
    pub async fn flush(&self) -> FlushOutcome {
        match self.inner.population.try_begin() {
            Some(guard) => self.inner.populate(guard).await,
            None => FlushOutcome::Busy,
        }
    }

    /// Flush until the pending buffer is empty and no attach is in flight.
    ///
    /// Stops after the first failure when failed batches are requeued, so a
    /// permanently failing index cannot spin forever.
    pub async fn drain(&self) -> Vec<FlushOutcome> {
        let mut outcomes = Vec::new();

        loop {
            match self.flush().await {
                FlushOutcome::Busy => self.inner.population.wait_idle().await,
                FlushOutcome::Empty => break,
                outcome @ FlushOutcome::Failed { requeued: true, .. } => {
                    outcomes.push(outcome);
                    break;
                }
                outcome => outcomes.push(outcome),
            }
        }

        outcomes
    }
}

/// State carried between items of a [`SyncEngine::sync`] stream.
enum SyncPass {
    Start(SyncEngine),
    Uploading {
        engine: SyncEngine,
        pending: std::vec::IntoIter<LocalDocument>,
        remote: HashSet<String>,
    },
}

impl SyncPass {
    async fn advance(self) -> Result<Option<(LocalDocument, SyncPass)>> {
        let (engine, mut pending, mut remote) = match self {
            SyncPass::Start(engine) => {
                let docs = engine.inner.source.documents().await?;
                let remote: HashSet<String> = engine
                    .list_remote_files()
                    .await?
                    .into_iter()
                    .map(|f| f.filename)
                    .collect();
                debug!(local = docs.len(), remote = remote.len(), "starting sync pass");
                (engine, docs.into_iter(), remote)
            }
            SyncPass::Uploading {
                engine,
                pending,
                remote,
            } => (engine, pending, remote),
        };

        while let Some(doc) = pending.next() {
            if doc.contents.is_empty() {
                trace!(path = %doc.path, "skipping empty note");
                continue;
            }
            if remote.contains(&doc.path) {
                trace!(path = %doc.path, "already synchronized");
                continue;
            }
            if engine.add_remote_file(&doc).await?.is_some() {
                remote.insert(doc.path.clone());
                return Ok(Some((
                    doc,
                    SyncPass::Uploading {
                        engine,
                        pending,
                        remote,
                    },
                )));
            }
        }

        Ok(None)
    }
}

/// Drain a cursor-paginated listing into one ordered `Vec`.
async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    T: Identified,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = fetch(cursor.clone()).await?;
        let next = page.next_cursor();
        items.extend(page.data);

        match next {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                bail!("remote listing did not advance past cursor {}", next)
            }
            Some(next) => cursor = Some(next),
            None => return Ok(items),
        }
    }
}

/// Scan pages in order and return the first item matching `matches`,
/// without fetching pages beyond it.
async fn find_in_pages<T, F, Fut, P>(mut fetch: F, matches: P) -> Result<Option<T>>
where
    T: Identified,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
    P: Fn(&T) -> bool,
{
    let mut cursor: Option<String> = None;

    loop {
        let page = fetch(cursor.clone()).await?;
        let next = page.next_cursor();

        if let Some(found) = page.data.into_iter().find(|item| matches(item)) {
            return Ok(Some(found));
        }

        match next {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                bail!("remote listing did not advance past cursor {}", next)
            }
            Some(next) => cursor = Some(next),
            None => return Ok(None),
        }
    }
}
