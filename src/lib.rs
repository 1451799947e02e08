//! # Vault Sync
//!
//! Keeps an OpenAI vector store and file-search assistant in sync with a
//! local vault of markdown notes.
//!
//! Notes missing from the remote file store are uploaded; uploads are
//! buffered and attached to the vector store in batches by a background
//! scheduler, so the assistant can search them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │    Vault    │──▶│    SyncEngine     │──▶│ Remote files │
//! │  FS / mem   │   │ reconcile+upload │   └──────────────┘
//! └─────────────┘   └────────┬─────────┘
//!                            │ pending buffer
//!                            ▼
//!                   ┌──────────────────┐   ┌──────────────┐
//!                   │    Scheduler     │──▶│ Vector store │◀── Assistant
//!                   │  batched attach  │   └──────────────┘
//!                   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vsync sync              # upload missing notes and index them
//! vsync files             # list remote files
//! vsync status            # vector store, assistant, indexed files
//! vsync delete Note.md    # remove one note remotely
//! vsync teardown          # remove everything this tool created
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | Remote capability and document source traits |
//! | [`openai`] | OpenAI REST implementation of the remote traits |
//! | [`memory`] | In-memory remote implementation |
//! | [`vault`] | Filesystem and in-memory document sources |
//! | [`sync`] | Reconciliation, upload, resource lifecycle |
//! | [`scheduler`] | Batched vector store population |
//! | [`events`] | Vault change handlers |
//! | [`progress`] | Sync progress reporting |
//! | [`error`] | Typed engine errors |

pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod models;
pub mod openai;
pub mod progress;
pub mod scheduler;
pub mod sync;
pub mod traits;
pub mod vault;

pub use error::EngineError;
pub use scheduler::{FlushOutcome, PopulationStatus};
pub use sync::{EngineSettings, SyncEngine, SyncEngineOptions};
