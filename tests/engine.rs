//! End-to-end tests for the sync engine against the in-memory remote.
//!
//! `CountingRemote` wraps [`InMemoryRemote`] to count calls, slow down or fail
//! file batches, and track how many attaches are in flight at once.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use vault_sync::events::{apply_event, VaultEvent};
use vault_sync::memory::InMemoryRemote;
use vault_sync::models::{
    Assistant, AssistantRequest, FileBatch, FilePurpose, LocalDocument, Page, RemoteFile,
    VectorStore, VectorStoreFile,
};
use vault_sync::traits::{RemoteAssistants, RemoteClients, RemoteFileStore, RemoteIndex};
use vault_sync::vault::InMemoryVault;
use vault_sync::{
    EngineError, EngineSettings, FlushOutcome, PopulationStatus, SyncEngine, SyncEngineOptions,
};

// ─── Test remote ────────────────────────────────────────────────────

#[derive(Default)]
struct CountingRemote {
    inner: InMemoryRemote,
    uploads: AtomicUsize,
    attaches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    attach_delay_ms: AtomicUsize,
    fail_attach: AtomicBool,
    fail_list_files: AtomicBool,
    fail_create_vector_store: AtomicBool,
    attached_ids: Mutex<Vec<String>>,
}

impl CountingRemote {
    fn paged(page_size: usize) -> Self {
        Self {
            inner: InMemoryRemote::with_page_size(page_size),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RemoteFileStore for CountingRemote {
    async fn list_files(
        &self,
        purpose: FilePurpose,
        after: Option<&str>,
    ) -> Result<Page<RemoteFile>> {
        if self.fail_list_files.load(Ordering::SeqCst) {
            bail!("listing unavailable");
        }
        self.inner.list_files(purpose, after).await
    }

    async fn create_file(
        &self,
        filename: &str,
        contents: Vec<u8>,
        purpose: FilePurpose,
    ) -> Result<RemoteFile> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.create_file(filename, contents, purpose).await
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.inner.delete_file(file_id).await
    }
}

#[async_trait]
impl RemoteIndex for CountingRemote {
    async fn list_vector_stores(&self, after: Option<&str>) -> Result<Page<VectorStore>> {
        self.inner.list_vector_stores(after).await
    }

    async fn create_vector_store(&self, name: &str) -> Result<VectorStore> {
        if self.fail_create_vector_store.load(Ordering::SeqCst) {
            bail!("quota exceeded");
        }
        self.inner.create_vector_store(name).await
    }

    async fn delete_vector_store(&self, vector_store_id: &str) -> Result<()> {
        self.inner.delete_vector_store(vector_store_id).await
    }

    async fn create_file_batch(
        &self,
        vector_store_id: &str,
        file_ids: &[String],
    ) -> Result<FileBatch> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.attach_delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let result = if self.fail_attach.load(Ordering::SeqCst) {
            Err(anyhow::anyhow!("batch rejected"))
        } else {
            self.attached_ids
                .lock()
                .unwrap()
                .extend(file_ids.iter().cloned());
            self.inner.create_file_batch(vector_store_id, file_ids).await
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn list_vector_store_files(
        &self,
        vector_store_id: &str,
        after: Option<&str>,
    ) -> Result<Page<VectorStoreFile>> {
        self.inner
            .list_vector_store_files(vector_store_id, after)
            .await
    }
}

#[async_trait]
impl RemoteAssistants for CountingRemote {
    async fn list_assistants(&self, after: Option<&str>) -> Result<Page<Assistant>> {
        self.inner.list_assistants(after).await
    }

    async fn create_assistant(&self, request: &AssistantRequest) -> Result<Assistant> {
        self.inner.create_assistant(request).await
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        self.inner.delete_assistant(assistant_id).await
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn fast_settings() -> EngineSettings {
    EngineSettings {
        flush_interval: Duration::from_millis(5),
        ..EngineSettings::default()
    }
}

/// Scheduler effectively never ticks after the first (empty) tick.
fn manual_settings() -> EngineSettings {
    EngineSettings {
        flush_interval: Duration::from_secs(3600),
        ..EngineSettings::default()
    }
}

fn engine(
    remote: &Arc<CountingRemote>,
    vault: &Arc<InMemoryVault>,
    settings: EngineSettings,
) -> SyncEngine {
    SyncEngine::new(SyncEngineOptions {
        remote: RemoteClients::shared(remote.clone()),
        source: vault.clone(),
        settings,
    })
    .unwrap()
}

fn test_note() -> LocalDocument {
    LocalDocument::new("Test.md", "Test files")
}

async fn next_flush(rx: &mut broadcast::Receiver<FlushOutcome>) -> FlushOutcome {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no flush within 5s")
        .expect("flush channel closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

async fn seed_remote(remote: &CountingRemote, filename: &str) -> RemoteFile {
    remote
        .inner
        .create_file(filename, b"seed".to_vec(), FilePurpose::Assistants)
        .await
        .unwrap()
}

// ─── Reconciliation ─────────────────────────────────────────────────

#[tokio::test]
async fn sync_into_empty_remote_uploads_the_note() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, fast_settings());
    engine.ready().await.unwrap();

    vault.add_file(test_note());

    let uploaded: Vec<LocalDocument> = engine.sync().try_collect().await.unwrap();
    assert_eq!(uploaded, vec![test_note()]);
    assert_eq!(engine.list_remote_files().await.unwrap().len(), 1);

    let again: Vec<LocalDocument> = engine.sync().try_collect().await.unwrap();
    assert!(again.is_empty(), "already-synced notes must not be re-uploaded");
    assert_eq!(remote.uploads.load(Ordering::SeqCst), 1);

    engine.shutdown();
}

#[tokio::test]
async fn sync_uploads_only_missing_notes_in_vault_order() {
    let remote = Arc::new(CountingRemote::paged(2));
    for name in ["a.md", "x.md", "y.md"] {
        seed_remote(&remote, name).await;
    }

    let vault = Arc::new(InMemoryVault::new(vec![
        LocalDocument::new("c.md", "third"),
        LocalDocument::new("a.md", "already there"),
        LocalDocument::new("empty.md", ""),
        LocalDocument::new("b.md", "second"),
    ]));
    let engine = engine(&remote, &vault, manual_settings());
    engine.ready().await.unwrap();
    engine.shutdown();

    let uploaded: Vec<String> = engine
        .sync()
        .map_ok(|doc| doc.path)
        .try_collect()
        .await
        .unwrap();

    assert_eq!(uploaded, vec!["c.md".to_string(), "b.md".to_string()]);
    assert_eq!(remote.uploads.load(Ordering::SeqCst), 2);

    let pending: Vec<String> = engine
        .pending_files()
        .into_iter()
        .map(|f| f.filename)
        .collect();
    assert_eq!(pending, uploaded);
}

#[tokio::test]
async fn sync_is_lazy() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::new(vec![
        LocalDocument::new("one.md", "1"),
        LocalDocument::new("two.md", "2"),
    ]));
    let engine = engine(&remote, &vault, manual_settings());
    engine.ready().await.unwrap();
    engine.shutdown();

    let mut stream = engine.sync();
    assert_eq!(remote.uploads.load(Ordering::SeqCst), 0);

    let first = stream.try_next().await.unwrap().unwrap();
    assert_eq!(first.path, "one.md");
    assert_eq!(remote.uploads.load(Ordering::SeqCst), 1);

    drop(stream);
    assert_eq!(remote.uploads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sync_stops_at_first_remote_error() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::new(vec![test_note()]));
    let engine = engine(&remote, &vault, manual_settings());
    engine.ready().await.unwrap();
    engine.shutdown();

    remote.fail_list_files.store(true, Ordering::SeqCst);

    let mut stream = engine.sync();
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(format!("{:#}", err).contains("listing unavailable"));
    assert!(stream.next().await.is_none());
    assert_eq!(remote.uploads.load(Ordering::SeqCst), 0);
}

// ─── Upload, listing, deletion ──────────────────────────────────────

#[tokio::test]
async fn empty_note_is_not_uploaded() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());

    let result = engine
        .add_remote_file(&LocalDocument::new("Empty.md", ""))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(remote.uploads.load(Ordering::SeqCst), 0);
    assert_eq!(engine.pending_len(), 0);
    engine.shutdown();
}

#[tokio::test]
async fn added_file_is_listed_and_buffered() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());
    engine.ready().await.unwrap();
    engine.shutdown();

    let file = engine.add_remote_file(&test_note()).await.unwrap().unwrap();

    assert_eq!(file.filename, "Test.md");
    assert_eq!(
        remote.inner.file_contents(&file.id).unwrap(),
        b"Test files".to_vec()
    );
    let listed = engine.list_remote_files().await.unwrap();
    assert!(listed.iter().any(|f| f.filename == "Test.md"));
    assert_eq!(engine.pending_files(), vec![file]);
}

#[tokio::test]
async fn delete_remote_file_removes_every_match() {
    let remote = Arc::new(CountingRemote::paged(2));
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());

    assert_eq!(engine.delete_remote_file("Test.md").await.unwrap(), 0);

    for _ in 0..3 {
        seed_remote(&remote, "Test.md").await;
    }
    seed_remote(&remote, "Other.md").await;

    assert_eq!(engine.delete_remote_file("Test.md").await.unwrap(), 3);

    let remaining = engine.list_remote_files().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].filename, "Other.md");
    engine.shutdown();
}

#[tokio::test]
async fn delete_remote_files_empties_the_store() {
    let remote = Arc::new(CountingRemote::paged(3));
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());

    for i in 0..7 {
        seed_remote(&remote, &format!("note-{}.md", i)).await;
    }

    assert_eq!(engine.delete_remote_files().await.unwrap(), 7);
    assert!(engine.list_remote_files().await.unwrap().is_empty());
    assert_eq!(engine.delete_remote_files().await.unwrap(), 0);
    engine.shutdown();
}

// ─── Resource lifecycle ─────────────────────────────────────────────

#[tokio::test]
async fn vector_store_resolution_is_idempotent() {
    let remote = Arc::new(CountingRemote::paged(1));
    for name in ["decoy-1", "decoy-2", "decoy-3"] {
        remote.inner.create_vector_store(name).await.unwrap();
    }
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());

    let resolved = engine.ready().await.unwrap();
    let first = engine.get_or_create_vector_store().await.unwrap();
    let second = engine.get_or_create_vector_store().await.unwrap();

    assert_eq!(first.id, resolved.id);
    assert_eq!(second.id, resolved.id);
    assert!(resolved.has_name("Vault Assistant"));
    assert_eq!(remote.inner.vector_store_count(), 4);
    engine.shutdown();
}

#[tokio::test]
async fn existing_vector_store_is_reused() {
    let remote = Arc::new(CountingRemote::paged(1));
    remote.inner.create_vector_store("other").await.unwrap();
    let existing = remote
        .inner
        .create_vector_store("Vault Assistant")
        .await
        .unwrap();
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());

    assert_eq!(engine.ready().await.unwrap().id, existing.id);
    assert_eq!(remote.inner.vector_store_count(), 2);
    engine.shutdown();
}

#[tokio::test]
async fn assistant_is_bound_to_the_vector_store() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());

    let vector_store = engine.ready().await.unwrap();
    let assistant = engine.assistant().expect("assistant resolved during init");

    let request = remote.inner.assistant_request(&assistant.id).unwrap();
    assert_eq!(request.vector_store_id, vector_store.id);
    assert_eq!(request.name, "Vault Assistant");
    assert_eq!(request.model, "gpt-4o");

    let again = engine.get_or_create_assistant(&vector_store).await.unwrap();
    assert_eq!(again.id, assistant.id);
    assert_eq!(remote.inner.assistant_count(), 1);
    engine.shutdown();
}

#[tokio::test]
async fn teardown_removes_store_and_assistant() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());
    let vector_store = engine.ready().await.unwrap();
    engine.shutdown();

    let deleted = engine.delete_vector_store().await.unwrap();
    assert_eq!(deleted.map(|vs| vs.id), Some(vector_store.id));
    assert!(engine.delete_assistant().await.unwrap().is_some());

    assert_eq!(remote.inner.vector_store_count(), 0);
    assert_eq!(remote.inner.assistant_count(), 0);
    assert!(engine.vector_store().is_none());
    assert!(engine.assistant().is_none());

    assert!(engine.delete_vector_store().await.unwrap().is_none());
    assert!(engine.delete_assistant().await.unwrap().is_none());

    let err = engine.list_vector_store_files().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<EngineError>(),
        Some(&EngineError::VectorStoreNotInitialized)
    );
}

#[tokio::test]
async fn failed_vector_store_resolution_is_reported() {
    let remote = Arc::new(CountingRemote::default());
    remote.fail_create_vector_store.store(true, Ordering::SeqCst);
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, fast_settings());

    let err = engine.ready().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::InitFailed(msg)) if msg.contains("quota exceeded")
    ));
    assert!(engine.assistant().is_none());

    let err = engine.list_vector_store_files().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<EngineError>(),
        Some(&EngineError::VectorStoreNotInitialized)
    );

    // Uploads still work; the batch cannot be attached and is dropped.
    engine.add_remote_file(&test_note()).await.unwrap();
    match engine.flush().await {
        FlushOutcome::Failed {
            file_ids, requeued, ..
        } => {
            assert_eq!(file_ids.len(), 1);
            assert!(!requeued);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(remote.attaches.load(Ordering::SeqCst), 0);
    engine.shutdown();
}

// ─── Batch population ───────────────────────────────────────────────

#[tokio::test]
async fn flushed_file_can_be_deleted() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, fast_settings());
    engine.ready().await.unwrap();
    let mut flushes = engine.subscribe_flushes();

    engine.add_remote_file(&test_note()).await.unwrap();
    assert!(matches!(
        next_flush(&mut flushes).await,
        FlushOutcome::Attached { .. }
    ));

    engine.delete_remote_file("Test.md").await.unwrap();
    assert_eq!(engine.list_remote_files().await.unwrap().len(), 0);
    engine.shutdown();
}

#[tokio::test]
async fn synced_note_reaches_the_vector_store() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, fast_settings());
    engine.ready().await.unwrap();
    let mut flushes = engine.subscribe_flushes();

    vault.add_file(test_note());
    let uploaded: Vec<LocalDocument> = engine.sync().try_collect().await.unwrap();
    assert_eq!(uploaded.len(), 1);

    match next_flush(&mut flushes).await {
        FlushOutcome::Attached { file_ids, batch } => {
            assert_eq!(file_ids.len(), 1);
            assert_eq!(batch.file_counts.total, 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(engine.list_vector_store_files().await.unwrap().len(), 1);
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(engine.population_status(), PopulationStatus::Idle);
    engine.shutdown();
}

#[tokio::test]
async fn busy_ticks_are_skipped_not_queued() {
    let remote = Arc::new(CountingRemote::default());
    remote.attach_delay_ms.store(100, Ordering::SeqCst);
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, fast_settings());
    engine.ready().await.unwrap();
    let mut flushes = engine.subscribe_flushes();

    let first = engine
        .add_remote_file(&LocalDocument::new("first.md", "1"))
        .await
        .unwrap()
        .unwrap();
    wait_until(|| remote.attaches.load(Ordering::SeqCst) == 1).await;
    assert_eq!(engine.population_status(), PopulationStatus::Running);

    let second = engine
        .add_remote_file(&LocalDocument::new("second.md", "2"))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(remote.attaches.load(Ordering::SeqCst), 1);
    assert_eq!(engine.pending_len(), 1);
    assert!(matches!(engine.flush().await, FlushOutcome::Busy));

    match next_flush(&mut flushes).await {
        FlushOutcome::Attached { file_ids, .. } => assert_eq!(file_ids, vec![first.id]),
        other => panic!("unexpected outcome: {:?}", other),
    }
    match next_flush(&mut flushes).await {
        FlushOutcome::Attached { file_ids, .. } => assert_eq!(file_ids, vec![second.id]),
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 1);
    engine.shutdown();
}

#[tokio::test]
async fn attaches_never_overlap_and_never_repeat() {
    let remote = Arc::new(CountingRemote::default());
    remote.attach_delay_ms.store(15, Ordering::SeqCst);
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, EngineSettings {
        flush_interval: Duration::from_millis(1),
        ..EngineSettings::default()
    });
    engine.ready().await.unwrap();

    let mut uploaded = Vec::new();
    for i in 0..8 {
        let file = engine
            .add_remote_file(&LocalDocument::new(format!("note-{}.md", i), "body"))
            .await
            .unwrap()
            .unwrap();
        uploaded.push(file.id);
        tokio::time::sleep(Duration::from_millis(4)).await;
    }

    engine.drain().await;
    engine.shutdown();

    assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(engine.pending_len(), 0);

    let mut attached = remote.attached_ids.lock().unwrap().clone();
    let before_dedup = attached.len();
    attached.sort();
    attached.dedup();
    assert_eq!(attached.len(), before_dedup, "a file was attached twice");

    uploaded.sort();
    assert_eq!(attached, uploaded);
    assert_eq!(engine.list_vector_store_files().await.unwrap().len(), 8);
}

#[tokio::test]
async fn failed_batch_is_dropped_and_status_resets() {
    let remote = Arc::new(CountingRemote::default());
    remote.fail_attach.store(true, Ordering::SeqCst);
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, fast_settings());
    engine.ready().await.unwrap();
    let mut flushes = engine.subscribe_flushes();

    engine.add_remote_file(&test_note()).await.unwrap();
    match next_flush(&mut flushes).await {
        FlushOutcome::Failed {
            file_ids,
            error,
            requeued,
        } => {
            assert_eq!(file_ids.len(), 1);
            assert!(error.contains("batch rejected"));
            assert!(!requeued);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(engine.population_status(), PopulationStatus::Idle);

    remote.fail_attach.store(false, Ordering::SeqCst);
    let later = engine
        .add_remote_file(&LocalDocument::new("Later.md", "later"))
        .await
        .unwrap()
        .unwrap();
    match next_flush(&mut flushes).await {
        FlushOutcome::Attached { file_ids, .. } => assert_eq!(file_ids, vec![later.id]),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(engine.list_vector_store_files().await.unwrap().len(), 1);
    engine.shutdown();
}

#[tokio::test]
async fn failed_batch_can_be_requeued() {
    let remote = Arc::new(CountingRemote::default());
    remote.fail_attach.store(true, Ordering::SeqCst);
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, EngineSettings {
        requeue_failed_batches: true,
        ..manual_settings()
    });
    engine.ready().await.unwrap();
    engine.shutdown();

    let first = engine.add_remote_file(&test_note()).await.unwrap().unwrap();
    assert!(matches!(
        engine.flush().await,
        FlushOutcome::Failed { requeued: true, .. }
    ));

    let second = engine
        .add_remote_file(&LocalDocument::new("Second.md", "2"))
        .await
        .unwrap()
        .unwrap();
    let pending: Vec<String> = engine.pending_files().into_iter().map(|f| f.id).collect();
    assert_eq!(pending, vec![first.id.clone(), second.id.clone()]);

    remote.fail_attach.store(false, Ordering::SeqCst);
    let outcomes = engine.drain().await;
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        FlushOutcome::Attached { file_ids, .. } => {
            assert_eq!(file_ids, &vec![first.id, second.id])
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn shutdown_stops_future_ticks() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, fast_settings());
    engine.ready().await.unwrap();

    engine.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.add_remote_file(&test_note()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.pending_len(), 1);
    assert_eq!(remote.attaches.load(Ordering::SeqCst), 0);

    assert!(matches!(engine.flush().await, FlushOutcome::Attached { .. }));
    assert!(matches!(engine.flush().await, FlushOutcome::Empty));
}

#[tokio::test]
async fn shutdown_does_not_cancel_inflight_attach() {
    let remote = Arc::new(CountingRemote::default());
    remote.attach_delay_ms.store(50, Ordering::SeqCst);
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, fast_settings());
    engine.ready().await.unwrap();
    let mut flushes = engine.subscribe_flushes();

    engine.add_remote_file(&test_note()).await.unwrap();
    wait_until(|| remote.attaches.load(Ordering::SeqCst) == 1).await;
    engine.shutdown();

    assert!(matches!(
        next_flush(&mut flushes).await,
        FlushOutcome::Attached { .. }
    ));
    assert_eq!(engine.list_vector_store_files().await.unwrap().len(), 1);
}

// ─── Vault events ───────────────────────────────────────────────────

#[tokio::test]
async fn vault_events_mirror_changes() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());
    engine.ready().await.unwrap();
    engine.shutdown();

    assert!(apply_event(&engine, VaultEvent::Created(LocalDocument::new("a.md", "v1")))
        .await
        .unwrap());
    let created = engine.list_remote_files().await.unwrap();
    assert_eq!(created.len(), 1);

    apply_event(&engine, VaultEvent::Modified(LocalDocument::new("a.md", "v2")))
        .await
        .unwrap();
    let modified = engine.list_remote_files().await.unwrap();
    assert_eq!(modified.len(), 1);
    assert_ne!(modified[0].id, created[0].id);
    assert_eq!(remote.inner.file_contents(&modified[0].id).unwrap(), b"v2".to_vec());

    apply_event(
        &engine,
        VaultEvent::Renamed {
            document: LocalDocument::new("b.md", "v2"),
            old_path: "a.md".to_string(),
        },
    )
    .await
    .unwrap();
    let renamed: Vec<String> = engine
        .list_remote_files()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.filename)
        .collect();
    assert_eq!(renamed, vec!["b.md".to_string()]);

    apply_event(&engine, VaultEvent::Deleted { path: "b.md".to_string() })
        .await
        .unwrap();
    assert!(engine.list_remote_files().await.unwrap().is_empty());

    let ignored = apply_event(&engine, VaultEvent::Created(LocalDocument::new("x.png", "img")))
        .await
        .unwrap();
    assert!(!ignored);
    assert_eq!(remote.uploads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn modified_note_before_flush_attaches_only_new_version() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());
    engine.ready().await.unwrap();
    engine.shutdown();

    apply_event(&engine, VaultEvent::Created(LocalDocument::new("a.md", "v1")))
        .await
        .unwrap();
    apply_event(&engine, VaultEvent::Modified(LocalDocument::new("a.md", "v2")))
        .await
        .unwrap();

    let current = engine.list_remote_files().await.unwrap();
    assert_eq!(current.len(), 1);
    let pending: Vec<String> = engine.pending_files().into_iter().map(|f| f.id).collect();
    assert_eq!(pending, vec![current[0].id.clone()]);

    match engine.flush().await {
        FlushOutcome::Attached { file_ids, .. } => {
            assert_eq!(file_ids, vec![current[0].id.clone()])
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(engine.list_vector_store_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn renamed_note_before_flush_attaches_only_new_path() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());
    engine.ready().await.unwrap();
    engine.shutdown();

    apply_event(&engine, VaultEvent::Created(LocalDocument::new("old.md", "body")))
        .await
        .unwrap();
    apply_event(
        &engine,
        VaultEvent::Renamed {
            document: LocalDocument::new("new.md", "body"),
            old_path: "old.md".to_string(),
        },
    )
    .await
    .unwrap();

    let pending: Vec<String> = engine
        .pending_files()
        .into_iter()
        .map(|f| f.filename)
        .collect();
    assert_eq!(pending, vec!["new.md".to_string()]);
    assert!(matches!(engine.flush().await, FlushOutcome::Attached { .. }));
}

#[tokio::test]
async fn deleting_all_files_empties_the_pending_buffer() {
    let remote = Arc::new(CountingRemote::default());
    let vault = Arc::new(InMemoryVault::default());
    let engine = engine(&remote, &vault, manual_settings());
    engine.ready().await.unwrap();
    engine.shutdown();

    engine.add_remote_file(&test_note()).await.unwrap();
    assert_eq!(engine.pending_len(), 1);

    assert_eq!(engine.delete_remote_files().await.unwrap(), 1);
    assert_eq!(engine.pending_len(), 0);
    assert!(matches!(engine.flush().await, FlushOutcome::Empty));
    assert_eq!(remote.attaches.load(Ordering::SeqCst), 0);
}
