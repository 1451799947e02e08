//! Core data models used throughout Vault Sync.
//!
//! These types mirror the remote objects the engine reconciles against
//! (files, vector stores, assistants) and the local documents it uploads.
//! Remote types deserialize straight from the OpenAI JSON shapes.

use serde::{Deserialize, Serialize};

/// Types addressable by an opaque remote id.
///
/// Used by [`Page`] to derive the pagination cursor.
pub trait Identified {
    fn id(&self) -> &str;
}

/// A file held by the remote file store.
///
/// Matching against local documents is by `filename` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub created_at: i64,
}

/// A local text document, as read from the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDocument {
    /// Vault-relative path, also used as the remote filename.
    pub path: String,
    pub contents: String,
}

impl LocalDocument {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// The remote searchable index ("vector store").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStore {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl VectorStore {
    pub fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}

/// A remote assistant configured to search one vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: String,
}

impl Assistant {
    pub fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}

/// A file attached to a vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStoreFile {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

/// Per-status counts reported for a file batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCounts {
    #[serde(default)]
    pub in_progress: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub cancelled: u64,
    #[serde(default)]
    pub total: u64,
}

/// Descriptor returned by a batched attach-files-to-vector-store call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBatch {
    pub id: String,
    pub vector_store_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub file_counts: FileCounts,
}

/// Purpose tag attached to uploaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePurpose {
    Assistants,
}

impl FilePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilePurpose::Assistants => "assistants",
        }
    }
}

/// Parameters for creating an assistant bound to a vector store.
///
/// The created assistant always carries the `file_search` tool, pointed at
/// `vector_store_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantRequest {
    pub name: String,
    pub model: String,
    pub instructions: Option<String>,
    pub vector_store_id: String,
}

/// One page of a cursor-paginated remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, has_more: bool) -> Self {
        Self { data, has_more }
    }

    pub fn last(data: Vec<T>) -> Self {
        Self::new(data, false)
    }
}

impl<T: Identified> Page<T> {
    /// Cursor for the following page, or `None` when this is the last one.
    pub fn next_cursor(&self) -> Option<String> {
        if !self.has_more {
            return None;
        }
        self.data.last().map(|item| item.id().to_string())
    }
}

macro_rules! identified {
    ($($ty:ty),*) => {
        $(impl Identified for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

identified!(RemoteFile, VectorStore, Assistant, VectorStoreFile);
