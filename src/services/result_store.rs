// src/services/result_store.rs
use crate::models::{Outcome, QueueState, ResultStatus};
use chrono::Utc;
use log::warn;
use tokio::sync::watch;
use uuid::Uuid;

/// Observable per-batch state. Every mutation is published as its own update.
pub struct ResultStore {
    state_tx: watch::Sender<QueueState>,
}

impl ResultStore {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(QueueState::default());
        Self { state_tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> QueueState {
        self.state_tx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state_tx.borrow().running
    }

    /// Raises the busy flag unless a batch is already running.
    pub(crate) fn try_acquire(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if state.running {
                false
            } else {
                state.running = true;
                true
            }
        })
    }

    /// Replaces the previous batch with fresh loading entries.
    pub(crate) fn reset(&self, batch_id: Uuid, prompts: &[String]) {
        self.state_tx.send_modify(|state| state.begin(batch_id, prompts));
    }

    pub(crate) fn set_current_index(&self, current_index: usize) {
        self.state_tx.send_modify(|state| state.current_index = current_index);
    }

    /// Settles entry `index`. Entries that already left `loading` are never rewritten.
    pub(crate) fn resolve(&self, index: usize, outcome: Outcome) -> bool {
        self.state_tx.send_if_modified(|state| {
            let Some(entry) = state.entries.get_mut(index) else {
                warn!("No result entry at index {}", index);
                return false;
            };
            if entry.status != ResultStatus::Loading {
                warn!("Result entry {} already settled as {:?}", index, entry.status);
                return false;
            }

            match outcome {
                Outcome::Success(images) => {
                    entry.status = ResultStatus::Success;
                    entry.images = Some(images);
                }
                Outcome::Failure(message) => {
                    entry.status = ResultStatus::Error;
                    entry.error = Some(message);
                }
            }
            true
        })
    }

    pub(crate) fn mark_completed(&self) {
        self.state_tx.send_modify(|state| state.completed += 1);
    }

    pub(crate) fn release(&self) {
        self.state_tx.send_modify(|state| {
            state.running = false;
            state.finished_at = Some(Utc::now());
        });
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}
