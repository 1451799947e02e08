//! Capability traits consumed by the sync engine.
//!
//! The engine never talks HTTP itself. It is handed implementations of the
//! traits below: three remote capabilities and one local document source.
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────────────────────────┐
//! │  DocumentSource  │──▶│              SyncEngine              │
//! │ FS / in-memory   │   │  reconcile ─▶ upload ─▶ pending buf  │
//! └──────────────────┘   │                  flush ─▶ file batch │
//!                        └───┬──────────────┬──────────────┬────┘
//!                            ▼              ▼              ▼
//!                   RemoteFileStore    RemoteIndex   RemoteAssistants
//! ```
//!
//! [`OpenAiClient`](crate::openai::OpenAiClient) and
//! [`InMemoryRemote`](crate::memory::InMemoryRemote) implement all three
//! remote traits.
//!
//! All list operations return a single [`Page`]; draining pages is the
//! engine's job, so implementations stay thin.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{
    Assistant, AssistantRequest, FileBatch, FilePurpose, LocalDocument, Page, RemoteFile,
    VectorStore, VectorStoreFile,
};

/// Remote store of opaque file objects.
#[async_trait]
pub trait RemoteFileStore: Send + Sync {
    /// List one page of files with the given purpose, starting after `after`.
    async fn list_files(&self, purpose: FilePurpose, after: Option<&str>)
        -> Result<Page<RemoteFile>>;

    /// Upload raw bytes under `filename`.
    async fn create_file(
        &self,
        filename: &str,
        contents: Vec<u8>,
        purpose: FilePurpose,
    ) -> Result<RemoteFile>;

    /// Delete a file by id. Deleting an unknown id is not an error.
    async fn delete_file(&self, file_id: &str) -> Result<()>;
}

/// Remote searchable index ("vector store") resources.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    async fn list_vector_stores(&self, after: Option<&str>) -> Result<Page<VectorStore>>;

    async fn create_vector_store(&self, name: &str) -> Result<VectorStore>;

    /// Delete a vector store by id. Deleting an unknown id is not an error.
    async fn delete_vector_store(&self, vector_store_id: &str) -> Result<()>;

    /// Attach `file_ids` to a vector store in one call. The batch succeeds
    /// or fails as a whole.
    async fn create_file_batch(&self, vector_store_id: &str, file_ids: &[String])
        -> Result<FileBatch>;

    async fn list_vector_store_files(
        &self,
        vector_store_id: &str,
        after: Option<&str>,
    ) -> Result<Page<VectorStoreFile>>;
}

/// Remote assistant resources.
#[async_trait]
pub trait RemoteAssistants: Send + Sync {
    async fn list_assistants(&self, after: Option<&str>) -> Result<Page<Assistant>>;

    async fn create_assistant(&self, request: &AssistantRequest) -> Result<Assistant>;

    /// Delete an assistant by id. Deleting an unknown id is not an error.
    async fn delete_assistant(&self, assistant_id: &str) -> Result<()>;
}

/// The local set of text documents.
///
/// Each call returns a fresh snapshot in a stable enumeration order.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn documents(&self) -> Result<Vec<LocalDocument>>;
}

/// Handles to the three remote capabilities the engine consumes.
#[derive(Clone)]
pub struct RemoteClients {
    pub files: Arc<dyn RemoteFileStore>,
    pub index: Arc<dyn RemoteIndex>,
    pub assistants: Arc<dyn RemoteAssistants>,
}

impl RemoteClients {
    /// Bundle a single client that implements every remote capability.
    pub fn shared<C>(client: Arc<C>) -> Self
    where
        C: RemoteFileStore + RemoteIndex + RemoteAssistants + 'static,
    {
        Self {
            files: client.clone(),
            index: client.clone(),
            assistants: client,
        }
    }
}
