//! # Continuation Manager
//!
//! Lets application code suspend until a component (or any member of a group) is used.
//! Waiters are keyed by internal id and resumed at most once: by the interaction that
//! used the component, by its timeout, or by its deletion.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{ComponentId, ComponentInteraction, ComponentRecord};

/// Why a continuation ended without an interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContinuationError {
    #[error("Timed out before the component was used")]
    Timeout,
    #[error("Component was deleted before it was used")]
    Deleted,
}

pub type ContinuationResult = Result<ComponentInteraction, ContinuationError>;

struct Waiter {
    id: u64,
    sender: oneshot::Sender<ContinuationResult>,
}

#[derive(Default)]
pub struct ContinuationManager {
    waiters: DashMap<ComponentId, Vec<Waiter>>,
    next_waiter: AtomicU64,
}

/// Removes an abandoned waiter when its future is dropped or times out
struct WaiterGuard<'a> {
    manager: &'a ContinuationManager,
    component_id: ComponentId,
    waiter_id: u64,
}

impl WaiterGuard<'_> {
    /// `true` if the waiter was still registered, i.e. nobody resumed it
    fn remove(&self) -> bool {
        let mut removed = false;
        if let Some(mut waiters) = self.manager.waiters.get_mut(&self.component_id) {
            let before = waiters.len();
            waiters.retain(|waiter| waiter.id != self.waiter_id);
            removed = waiters.len() != before;
        }
        self.manager
            .waiters
            .remove_if(&self.component_id, |_, waiters| waiters.is_empty());
        removed
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.remove();
    }
}

impl ContinuationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until the component is used, times out, or is deleted
    pub async fn await_component(
        &self,
        component_id: ComponentId,
        deadline: Instant,
    ) -> ContinuationResult {
        let (sender, mut receiver) = oneshot::channel();
        let waiter_id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        self.waiters.entry(component_id).or_default().push(Waiter {
            id: waiter_id,
            sender,
        });
        let guard = WaiterGuard {
            manager: self,
            component_id,
            waiter_id,
        };

        match tokio::time::timeout_at(deadline, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ContinuationError::Deleted),
            Err(_) => {
                if guard.remove() {
                    return Err(ContinuationError::Timeout);
                }
                // Resumed concurrently with the deadline, the value is already sent
                receiver.await.unwrap_or(Err(ContinuationError::Deleted))
            }
        }
    }

    /// Resume everyone waiting on the component or on its group
    pub fn resume_coroutines(
        &self,
        component: &ComponentRecord,
        interaction: &ComponentInteraction,
    ) -> usize {
        let ids = std::iter::once(component.internal_id).chain(component.group_id());
        let mut resumed = 0;
        for id in ids {
            for waiter in self.take(id) {
                if waiter.sender.send(Ok(interaction.clone())).is_ok() {
                    resumed += 1;
                }
            }
        }

        if resumed > 0 {
            debug!(component_id = component.internal_id, resumed, "▶️ Resumed continuations");
        }
        resumed
    }

    /// Resume every waiter on `component_id` with an error, returning how many were pending
    pub fn cancel_waiters(&self, component_id: ComponentId, error: ContinuationError) -> usize {
        let waiters = self.take(component_id);
        let pending = waiters.len();
        for waiter in waiters {
            let _ = waiter.sender.send(Err(error));
        }
        pending
    }

    pub fn pending_count(&self, component_id: ComponentId) -> usize {
        self.waiters
            .get(&component_id)
            .map(|waiters| waiters.len())
            .unwrap_or_default()
    }

    /// Reset hook for tests; dropped waiters observe [`ContinuationError::Deleted`]
    pub fn clear(&self) {
        self.waiters.clear();
    }

    fn take(&self, component_id: ComponentId) -> Vec<Waiter> {
        self.waiters
            .remove(&component_id)
            .map(|(_, waiters)| waiters)
            .unwrap_or_default()
    }
}
