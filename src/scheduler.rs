//! Batch population of the vector store.
//!
//! Uploaded files sit in the engine's pending buffer until a population
//! attempt attaches them to the vector store in a single file-batch call.
//!
//! ```text
//! idle ──[tick, buffer non-empty]──▶ running ──[attach resolves or fails]──▶ idle
//! ```
//!
//! The status lives in a `watch` channel: the `idle → running` transition is
//! a compare-and-swap, and [`PopulationGuard`] flips it back on drop, so a
//! failed or panicking attach still returns the status to `idle`. A tick
//! that finds the status `running` does nothing; ticks are never queued.
//!
//! Each attempt takes the whole buffer at snapshot time. Files uploaded while
//! the attach is in flight wait for the next tick. A failed batch is dropped
//! unless `requeue_failed_batches` is set.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

use crate::error::EngineError;
use crate::models::FileBatch;
use crate::sync::EngineInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationStatus {
    Idle,
    Running,
}

/// Result of one population attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another attempt was already running.
    Busy,
    /// Nothing was pending.
    Empty,
    Attached {
        batch: FileBatch,
        file_ids: Vec<String>,
    },
    Failed {
        file_ids: Vec<String>,
        error: String,
        /// Whether the files went back into the pending buffer.
        requeued: bool,
    },
}

/// Process-local `idle`/`running` flag.
pub(crate) struct PopulationFlag {
    tx: watch::Sender<PopulationStatus>,
}

impl PopulationFlag {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(PopulationStatus::Idle);
        Self { tx }
    }

    pub(crate) fn status(&self) -> PopulationStatus {
        *self.tx.borrow()
    }

    /// Move from `idle` to `running`, or return `None` if already running.
    pub(crate) fn try_begin(self: &Arc<Self>) -> Option<PopulationGuard> {
        let acquired = self.tx.send_if_modified(|status| {
            if *status == PopulationStatus::Idle {
                *status = PopulationStatus::Running;
                true
            } else {
                false
            }
        });

        acquired.then(|| PopulationGuard { flag: self.clone() })
    }

    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|status| *status == PopulationStatus::Idle).await;
    }
}

/// Holds the `running` status; resets it to `idle` when dropped.
pub(crate) struct PopulationGuard {
    flag: Arc<PopulationFlag>,
}

impl Drop for PopulationGuard {
    fn drop(&mut self) {
        self.flag.tx.send_replace(PopulationStatus::Idle);
    }
}

impl EngineInner {
    /// Attach everything pending to the vector store in one batch.
    pub(crate) async fn populate(&self, guard: PopulationGuard) -> FlushOutcome {
        let batch = std::mem::take(&mut *self.lock_pending());
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let file_ids: Vec<String> = batch.iter().map(|f| f.id.clone()).collect();

        let result = match self.current_vector_store() {
            Some(vector_store) => {
                self.remote
                    .index
                    .create_file_batch(&vector_store.id, &file_ids)
                    .await
            }
            None => Err(EngineError::VectorStoreNotInitialized.into()),
        };

        let outcome = match result {
            Ok(file_batch) => {
                info!(
                    batch = %file_batch.id,
                    files = file_ids.len(),
                    status = %file_batch.status,
                    "attached files to vector store"
                );
                FlushOutcome::Attached {
                    batch: file_batch,
                    file_ids,
                }
            }
            Err(e) => {
                let requeued = self.settings.requeue_failed_batches;
                if requeued {
                    let mut pending = self.lock_pending();
                    let newer = std::mem::replace(&mut *pending, batch);
                    pending.extend(newer);
                }
                error!(
                    files = file_ids.len(),
                    requeued,
                    error = %format!("{:#}", e),
                    "failed to attach files to vector store"
                );
                FlushOutcome::Failed {
                    file_ids,
                    error: format!("{:#}", e),
                    requeued,
                }
            }
        };

        // Broadcast while still `running` so anyone who sees `idle` has
        // already been sent this outcome. No subscribers is fine.
        let _ = self.flushes.send(outcome.clone());
        drop(guard);
        outcome
    }
}

/// Start the recurring population task.
///
/// The task holds only a weak reference to the engine and exits once the
/// engine is dropped or `shutdown` turns true. Each attempt is spawned on
/// its own task so the ticker keeps its cadence while an attach is in
/// flight; stopping the ticker never cancels an attempt already started.
pub(crate) fn spawn(
    engine: Weak<EngineInner>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if *shutdown.borrow() {
                break;
            }

            let Some(inner) = engine.upgrade() else {
                break;
            };

            let Some(guard) = inner.population.try_begin() else {
                trace!("population running, skipping tick");
                continue;
            };

            if inner.lock_pending().is_empty() {
                continue;
            }

            tokio::spawn(async move {
                inner.populate(guard).await;
            });
        }

        debug!("population scheduler stopped");
    });
}
