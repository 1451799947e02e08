//! Typed engine errors.
//!
//! Everything else travels as [`anyhow::Error`]; these variants exist so
//! callers can tell a precondition failure apart from a remote failure via
//! `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Vector store has not been initialized")]
    VectorStoreNotInitialized,

    #[error("engine initialization failed: {0}")]
    InitFailed(String),

    #[error("engine was dropped before initialization finished")]
    InitAborted,
}
