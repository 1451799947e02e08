//! In-memory remote implementation for testing and offline use.
//!
//! Implements [`RemoteFileStore`], [`RemoteIndex`] and [`RemoteAssistants`]
//! over `Vec`s behind `std::sync::RwLock`. Listings are paginated with a
//! configurable page size so callers exercise the same cursor handling as
//! against the real API.
//!
//! Like the real service, deleting a file does not detach it from the
//! vector stores it was added to.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Assistant, AssistantRequest, FileBatch, FileCounts, FilePurpose, Identified, Page, RemoteFile,
    VectorStore, VectorStoreFile,
};
use crate::traits::{RemoteAssistants, RemoteFileStore, RemoteIndex};

const DEFAULT_PAGE_SIZE: usize = 20;

struct StoredFile {
    file: RemoteFile,
    purpose: FilePurpose,
    contents: Vec<u8>,
}

/// In-memory stand-in for the OpenAI files, vector store and assistant APIs.
pub struct InMemoryRemote {
    page_size: usize,
    files: RwLock<Vec<StoredFile>>,
    vector_stores: RwLock<Vec<VectorStore>>,
    vector_store_files: RwLock<HashMap<String, Vec<VectorStoreFile>>>,
    assistants: RwLock<Vec<(Assistant, AssistantRequest)>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            files: RwLock::new(Vec::new()),
            vector_stores: RwLock::new(Vec::new()),
            vector_store_files: RwLock::new(HashMap::new()),
            assistants: RwLock::new(Vec::new()),
        }
    }

    /// Uploaded contents of a file, by id.
    pub fn file_contents(&self, file_id: &str) -> Option<Vec<u8>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files
            .iter()
            .find(|f| f.file.id == file_id)
            .map(|f| f.contents.clone())
    }

    /// Number of vector stores currently held, regardless of name.
    pub fn vector_store_count(&self) -> usize {
        self.vector_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of assistants currently held, regardless of name.
    pub fn assistant_count(&self) -> usize {
        self.assistants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The request an assistant was created from.
    pub fn assistant_request(&self, assistant_id: &str) -> Option<AssistantRequest> {
        let assistants = self.assistants.read().unwrap_or_else(PoisonError::into_inner);
        assistants
            .iter()
            .find(|(a, _)| a.id == assistant_id)
            .map(|(_, req)| req.clone())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}

/// Slice `items` into the page that follows the `after` cursor.
fn paginate<T: Identified + Clone>(items: &[T], after: Option<&str>, page_size: usize) -> Page<T> {
    let start = match after {
        Some(cursor) => items
            .iter()
            .position(|item| item.id() == cursor)
            .map(|pos| pos + 1)
            .unwrap_or(items.len()),
        None => 0,
    };
    let end = (start + page_size).min(items.len());
    Page::new(items[start..end].to_vec(), end < items.len())
}

#[async_trait]
impl RemoteFileStore for InMemoryRemote {
    async fn list_files(
        &self,
        purpose: FilePurpose,
        after: Option<&str>,
    ) -> Result<Page<RemoteFile>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<RemoteFile> = files
            .iter()
            .filter(|f| f.purpose == purpose)
            .map(|f| f.file.clone())
            .collect();
        Ok(paginate(&matching, after, self.page_size))
    }

    async fn create_file(
        &self,
        filename: &str,
        contents: Vec<u8>,
        purpose: FilePurpose,
    ) -> Result<RemoteFile> {
        if filename.is_empty() {
            bail!("filename must not be empty");
        }
        let file = RemoteFile {
            id: new_id("file-"),
            filename: filename.to_string(),
            bytes: contents.len() as u64,
            created_at: chrono::Utc::now().timestamp(),
        };
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.push(StoredFile {
            file: file.clone(),
            purpose,
            contents,
        });
        Ok(file)
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.retain(|f| f.file.id != file_id);
        Ok(())
    }
}

#[async_trait]
impl RemoteIndex for InMemoryRemote {
    async fn list_vector_stores(&self, after: Option<&str>) -> Result<Page<VectorStore>> {
        let stores = self
            .vector_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(paginate(&stores, after, self.page_size))
    }

    async fn create_vector_store(&self, name: &str) -> Result<VectorStore> {
        let store = VectorStore {
            id: new_id("vs_"),
            name: Some(name.to_string()),
        };
        self.vector_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(store.clone());
        Ok(store)
    }

    async fn delete_vector_store(&self, vector_store_id: &str) -> Result<()> {
        self.vector_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|vs| vs.id != vector_store_id);
        self.vector_store_files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(vector_store_id);
        Ok(())
    }

    async fn create_file_batch(
        &self,
        vector_store_id: &str,
        file_ids: &[String],
    ) -> Result<FileBatch> {
        let store_exists = self
            .vector_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|vs| vs.id == vector_store_id);
        if !store_exists {
            bail!("No vector store found with id '{}'", vector_store_id);
        }

        {
            let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(missing) = file_ids
                .iter()
                .find(|id| !files.iter().any(|f| &f.file.id == *id))
            {
                bail!("No file found with id '{}'", missing);
            }
        }

        let mut attached = self
            .vector_store_files
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entries = attached.entry(vector_store_id.to_string()).or_default();
        for id in file_ids {
            if !entries.iter().any(|f| &f.id == id) {
                entries.push(VectorStoreFile {
                    id: id.clone(),
                    status: "completed".to_string(),
                });
            }
        }

        let total = file_ids.len() as u64;
        Ok(FileBatch {
            id: new_id("vsfb_"),
            vector_store_id: vector_store_id.to_string(),
            status: "completed".to_string(),
            file_counts: FileCounts {
                completed: total,
                total,
                ..FileCounts::default()
            },
        })
    }

    async fn list_vector_store_files(
        &self,
        vector_store_id: &str,
        after: Option<&str>,
    ) -> Result<Page<VectorStoreFile>> {
        let attached = self
            .vector_store_files
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let files = attached
            .get(vector_store_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(paginate(files, after, self.page_size))
    }
}

#[async_trait]
impl RemoteAssistants for InMemoryRemote {
    async fn list_assistants(&self, after: Option<&str>) -> Result<Page<Assistant>> {
        let assistants = self.assistants.read().unwrap_or_else(PoisonError::into_inner);
        let list: Vec<Assistant> = assistants.iter().map(|(a, _)| a.clone()).collect();
        Ok(paginate(&list, after, self.page_size))
    }

    async fn create_assistant(&self, request: &AssistantRequest) -> Result<Assistant> {
        let assistant = Assistant {
            id: new_id("asst_"),
            name: Some(request.name.clone()),
            model: request.model.clone(),
        };
        self.assistants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((assistant.clone(), request.clone()));
        Ok(assistant)
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        self.assistants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(a, _)| a.id != assistant_id);
        Ok(())
    }
}
