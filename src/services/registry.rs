//! Task registry: operation ids mapped to cancellation tokens
//!
//! The registry is shared by every operation of an orchestrator. All
//! mutations go through a single lock so that `cancel`, `mark_terminal` and
//! `sweep` are linearizable with respect to each other.

use crate::types::{OperationId, OperationKind};
use instant::Instant;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Identity plus cancellation token of one submitted operation
#[derive(Debug, Clone)]
pub struct OperationHandle {
    id: OperationId,
    kind: OperationKind,
    token: CancellationToken,
}

impl OperationHandle {
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Token observed by the coordinator and the region engine
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal cancellation directly through the handle
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[derive(Debug)]
struct RegistryEntry {
    token: CancellationToken,
    terminal: bool,
    registered_at: Instant,
}

/// Registry of in-flight operations
#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: Mutex<HashMap<OperationId, RegistryEntry>>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<OperationId, RegistryEntry>> {
        // Entries stay consistent even if a holder panicked mid-update
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a fresh id and token for a new operation
    pub fn register(&self, kind: OperationKind) -> OperationHandle {
        let handle = OperationHandle {
            id: OperationId::new(),
            kind,
            token: CancellationToken::new(),
        };
        self.entries().insert(
            handle.id,
            RegistryEntry {
                token: handle.token.clone(),
                terminal: false,
                registered_at: Instant::now(),
            },
        );
        log::debug!("Registered {} operation {}", kind, handle.id);
        handle
    }

    /// Signal cancellation for `id`.
    ///
    /// Returns `true` if a running operation was signaled. Unknown ids and
    /// operations that already reached a terminal state are left untouched,
    /// and repeated calls are harmless.
    pub fn cancel(&self, id: OperationId) -> bool {
        let entries = self.entries();
        match entries.get(&id) {
            Some(entry) if !entry.terminal => {
                entry.token.cancel();
                log::info!("Cancellation requested for operation {}", id);
                true
            },
            _ => {
                log::debug!("Ignoring cancel for unknown or finished operation {}", id);
                false
            },
        }
    }

    /// Record that `id` has delivered its terminal result
    pub fn mark_terminal(&self, id: OperationId) {
        if let Some(entry) = self.entries().get_mut(&id) {
            entry.terminal = true;
            log::debug!(
                "Operation {} terminal after {}ms",
                id,
                entry.registered_at.elapsed().as_millis()
            );
        }
    }

    /// Remove entries that were cancelled and have reached a terminal state.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| !(entry.terminal && entry.token.is_cancelled()));
        let removed = before - entries.len();
        if removed > 0 {
            log::debug!("Swept {} cancelled operation(s) from the registry", removed);
        }
        removed
    }

    /// Remove `id` once it is terminal, whether or not it was cancelled.
    ///
    /// Running operations are never removed; returns whether an entry went away.
    pub fn release(&self, id: OperationId) -> bool {
        let mut entries = self.entries();
        match entries.get(&id) {
            Some(entry) if entry.terminal => {
                entries.remove(&id);
                true
            },
            _ => false,
        }
    }

    /// Whether cancellation has been signaled for `id`
    #[must_use]
    pub fn is_cancelled(&self, id: OperationId) -> bool {
        self.entries()
            .get(&id)
            .is_some_and(|entry| entry.token.is_cancelled())
    }

    #[must_use]
    pub fn contains(&self, id: OperationId) -> bool {
        self.entries().contains_key(&id)
    }

    /// Number of entries, running or awaiting sweep
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Number of operations that have not reached a terminal state
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries().values().filter(|entry| !entry.terminal).count()
    }
}
