//! Reactions to vault change notifications.
//!
//! Hosts that watch the vault translate their notifications into
//! [`VaultEvent`]s and hand them to [`apply_event`]. Only markdown notes are
//! mirrored; everything else is ignored.
//!
//! | Event | Remote effect |
//! |-------|---------------|
//! | `Created` | upload |
//! | `Modified` | delete by path, then upload |
//! | `Deleted` | delete by path |
//! | `Renamed` | delete old path, then upload under the new path |

use anyhow::Result;
use std::path::Path;
use tracing::{debug, info};

use crate::models::LocalDocument;
use crate::sync::SyncEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Created(LocalDocument),
    Modified(LocalDocument),
    Deleted { path: String },
    Renamed {
        document: LocalDocument,
        old_path: String,
    },
}

impl VaultEvent {
    /// Current path of the note the event is about.
    pub fn path(&self) -> &str {
        match self {
            VaultEvent::Created(doc) | VaultEvent::Modified(doc) => &doc.path,
            VaultEvent::Deleted { path } => path,
            VaultEvent::Renamed { document, .. } => &document.path,
        }
    }
}

pub fn is_markdown(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
}

/// Mirror one vault change to the remote file store.
///
/// Returns `false` when the event was ignored because it is not about a
/// markdown note.
pub async fn apply_event(engine: &SyncEngine, event: VaultEvent) -> Result<bool> {
    if !is_markdown(event.path()) {
        debug!(path = event.path(), "ignoring non-markdown vault event");
        return Ok(false);
    }

    match event {
        VaultEvent::Created(doc) => {
            engine.add_remote_file(&doc).await?;
            info!(path = %doc.path, "added new file");
        }
        VaultEvent::Modified(doc) => {
            engine.delete_remote_file(&doc.path).await?;
            engine.add_remote_file(&doc).await?;
            info!(path = %doc.path, "replaced modified file");
        }
        VaultEvent::Deleted { path } => {
            engine.delete_remote_file(&path).await?;
            info!(path = %path, "remote file deleted");
        }
        VaultEvent::Renamed { document, old_path } => {
            engine.delete_remote_file(&old_path).await?;
            info!(path = %old_path, "remote file (old path) deleted");
            engine.add_remote_file(&document).await?;
            info!(path = %document.path, "added renamed file");
        }
    }

    Ok(true)
}
