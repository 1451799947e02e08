//! Local document sources.
//!
//! - [`FilesystemVault`] walks a vault directory and reads every matching
//!   note.
//! - [`InMemoryVault`] holds documents in memory; handy for tests and for
//!   hosts that already have the notes loaded.
//!
//! The filesystem vault sorts by path and drops empty notes. The in-memory
//! vault returns documents exactly as added, in insertion order.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::VaultConfig;
use crate::models::LocalDocument;
use crate::traits::DocumentSource;

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/.obsidian/**",
    "**/.trash/**",
];

/// A vault rooted at a directory on disk.
#[derive(Clone)]
pub struct FilesystemVault {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl FilesystemVault {
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            root: config.root.clone(),
            include,
            exclude,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(&self) -> Result<Vec<LocalDocument>> {
        if !self.root.exists() {
            bail!("Vault root does not exist: {}", self.root.display());
        }

        let mut docs = Vec::new();

        for entry in WalkDir::new(&self.root).follow_links(self.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = vault_path(relative);

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            let contents = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable note");
                    continue;
                }
            };

            if contents.is_empty() {
                debug!(path = %rel_str, "skipping empty note");
                continue;
            }

            docs.push(LocalDocument::new(rel_str, contents));
        }

        docs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(docs)
    }
}

#[async_trait]
impl DocumentSource for FilesystemVault {
    async fn documents(&self) -> Result<Vec<LocalDocument>> {
        let vault = self.clone();
        tokio::task::spawn_blocking(move || vault.scan())
            .await
            .context("vault scan task panicked")?
    }
}

/// Vault-relative path with `/` separators on every platform.
fn vault_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// A vault held entirely in memory.
#[derive(Default)]
pub struct InMemoryVault {
    docs: RwLock<Vec<LocalDocument>>,
}

impl InMemoryVault {
    pub fn new(docs: Vec<LocalDocument>) -> Self {
        Self {
            docs: RwLock::new(docs),
        }
    }

    /// Add or replace the document at `doc.path`.
    pub fn add_file(&self, doc: LocalDocument) {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        docs.retain(|d| d.path != doc.path);
        docs.push(doc);
    }

    pub fn remove_file(&self, path: &str) -> bool {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let before = docs.len();
        docs.retain(|d| d.path != path);
        docs.len() != before
    }
}

#[async_trait]
impl DocumentSource for InMemoryVault {
    async fn documents(&self) -> Result<Vec<LocalDocument>> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.clone())
    }
}
