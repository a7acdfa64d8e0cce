//! # Component Timeout Manager
//!
//! In-memory timers for component and group expiry, backed by the durable `expires_at`
//! in the store.
//!
//! ## Timer lifecycle
//!
//! ```text
//! schedule ──► Scheduled ──► Fired
//!                  │
//!                  └───────► Cancelled
//! ```
//!
//! Each armed timer carries a generation. A sleeping task only fires if it can still
//! claim its own generation, so a timer replaced by a reset or cancelled by a delete
//! never fires late. Firing, resets and deletes of one owner are serialized by a
//! per-owner lock; firing re-reads the store and treats a vanished or extended record
//! as a no-op.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::continuation_manager::{ContinuationError, ContinuationManager};
use super::reporting::ExceptionReporter;
use crate::clock::{duration_until, Clock};
use crate::constants::operations;
use crate::error::{ComponentError, Result};
use crate::logging::log_component_operation;
use crate::models::{DeletedEntry, HandlerDescriptor, OwnerKind, TimeoutOwner};
use crate::registry::{
    EphemeralComponentHandlers, EphemeralTimeoutHandlers, PersistentHandlerRegistry,
};
use crate::store::ComponentStore;

struct ArmedTimeout {
    generation: u64,
    fires_at: DateTime<Utc>,
    abort: Option<AbortHandle>,
}

/// Collaborators shared with the component controller
#[derive(Clone)]
pub struct TimeoutDependencies {
    pub store: Arc<dyn ComponentStore>,
    pub clock: Arc<dyn Clock>,
    pub continuations: Arc<ContinuationManager>,
    pub component_handlers: Arc<EphemeralComponentHandlers>,
    pub timeout_handlers: Arc<EphemeralTimeoutHandlers>,
    pub persistent_handlers: Arc<PersistentHandlerRegistry>,
    pub reporter: Arc<dyn ExceptionReporter>,
}

#[derive(Clone)]
pub struct ComponentTimeoutManager {
    inner: Arc<TimeoutInner>,
}

struct TimeoutInner {
    deps: TimeoutDependencies,
    armed: DashMap<TimeoutOwner, ArmedTimeout>,
    owner_locks: DashMap<TimeoutOwner, Arc<tokio::sync::Mutex<()>>>,
    next_generation: AtomicU64,
}

impl ComponentTimeoutManager {
    pub fn new(deps: TimeoutDependencies) -> Self {
        Self {
            inner: Arc::new(TimeoutInner {
                deps,
                armed: DashMap::new(),
                owner_locks: DashMap::new(),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Arm a timer for `owner`, replacing any previous one.
    ///
    /// An instant already in the past fires inline before this returns.
    pub async fn schedule(&self, owner: TimeoutOwner, fires_at: DateTime<Utc>) {
        if fires_at <= self.inner.deps.clock.now() {
            self.inner.fire(owner).await;
        } else {
            self.inner.arm(owner, fires_at);
        }
    }

    /// Disarm the timer for `owner`; `false` if none was armed or it already fired
    pub fn cancel(&self, owner: TimeoutOwner) -> bool {
        self.inner.disarm(owner)
    }

    /// Push the owner's expiry forward by its reset duration and re-arm the timer.
    ///
    /// Returns the new expiry, `None` when the owner has nothing to reset.
    pub async fn reset(&self, owner: TimeoutOwner) -> Result<Option<DateTime<Utc>>> {
        let lock = self.inner.owner_lock(owner);
        let _guard = lock.lock().await;

        let now = self.inner.deps.clock.now();
        let Some(expires_at) = self.inner.deps.store.reset_expiration(owner, now).await? else {
            return Ok(None);
        };

        self.inner.disarm(owner);
        if expires_at <= now {
            self.inner.fire_locked(owner).await;
        } else {
            self.inner.arm(owner, expires_at);
        }

        log_component_operation(
            operations::RESET_TIMEOUT,
            Some(owner.id),
            None,
            "success",
            Some(&format!("expires at {expires_at}")),
        );
        Ok(Some(expires_at))
    }

    /// Re-arm every persisted timeout, firing the ones that passed while offline
    pub async fn reschedule_all(&self) -> Result<usize> {
        let pending = self
            .inner
            .deps
            .store
            .get_persistent_component_timeouts()
            .await?;
        let count = pending.len();
        for timeout in pending {
            self.schedule(timeout.owner, timeout.fires_at).await;
        }

        info!(count, "⏰ Rescheduled persisted component timeouts");
        Ok(count)
    }

    /// Drop everything tied to deleted rows: ephemeral handlers, timers, locks and waiters.
    ///
    /// Returns how many continuations were still waiting on the deleted ids.
    pub fn release(&self, deleted: &[DeletedEntry]) -> usize {
        self.inner.release(deleted)
    }

    pub fn is_armed(&self, owner: TimeoutOwner) -> bool {
        self.inner.armed.contains_key(&owner)
    }

    pub fn armed_at(&self, owner: TimeoutOwner) -> Option<DateTime<Utc>> {
        self.inner.armed.get(&owner).map(|armed| armed.fires_at)
    }

    pub fn armed_count(&self) -> usize {
        self.inner.armed.len()
    }

    /// Reset hook for tests, aborting every timer
    pub fn clear(&self) {
        for entry in self.inner.armed.iter() {
            if let Some(abort) = &entry.abort {
                abort.abort();
            }
        }
        self.inner.armed.clear();
        self.inner.owner_locks.clear();
    }
}

impl TimeoutInner {
    fn owner_lock(&self, owner: TimeoutOwner) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.owner_locks.entry(owner).or_default().value())
    }

    fn arm(self: &Arc<Self>, owner: TimeoutOwner, fires_at: DateTime<Utc>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.armed.insert(
            owner,
            ArmedTimeout {
                generation,
                fires_at,
                abort: None,
            },
        );
        if let Some(abort) = previous.and_then(|previous| previous.abort) {
            abort.abort();
        }

        let delay = duration_until(self.deps.clock.as_ref(), fires_at);
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let claimed = inner
                .armed
                .remove_if(&owner, |_, armed| armed.generation == generation)
                .is_some();
            if claimed {
                inner.fire(owner).await;
            }
        });

        match self.armed.get_mut(&owner) {
            Some(mut armed) if armed.generation == generation => {
                armed.abort = Some(task.abort_handle());
            }
            _ => {}
        }
        debug!(owner = %owner, fires_at = %fires_at, generation, "⏲️ Timeout scheduled");
    }

    fn disarm(&self, owner: TimeoutOwner) -> bool {
        match self.armed.remove(&owner) {
            Some((_, armed)) => {
                if let Some(abort) = armed.abort {
                    abort.abort();
                }
                debug!(owner = %owner, "Timeout cancelled");
                true
            }
            None => false,
        }
    }

    async fn fire(self: &Arc<Self>, owner: TimeoutOwner) {
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;
        self.fire_locked(owner).await;
    }

    /// Fire with the owner lock held
    async fn fire_locked(self: &Arc<Self>, owner: TimeoutOwner) {
        if let Err(e) = self.try_fire(owner).await {
            self.deps.reporter.report(&format!("timeout of {owner}"), &e);
        }
    }

    async fn try_fire(self: &Arc<Self>, owner: TimeoutOwner) -> Result<()> {
        let store = &self.deps.store;
        let now = self.deps.clock.now();

        let (expires_at, timeout_handler, waiting_ids) = match owner.kind {
            OwnerKind::Component => {
                let Some(record) = store.get_component(owner.id).await? else {
                    debug!(owner = %owner, "Timeout fired for a deleted component");
                    return Ok(());
                };
                (record.expires_at, record.timeout_handler, vec![owner.id])
            }
            OwnerKind::Group => {
                let Some(group) = store.get_group(owner.id).await? else {
                    debug!(owner = %owner, "Timeout fired for a deleted group");
                    return Ok(());
                };
                let mut ids = group.member_ids.clone();
                ids.push(owner.id);
                (group.expires_at, group.timeout_handler, ids)
            }
        };

        match expires_at {
            Some(expires_at) if expires_at <= now => {}
            Some(expires_at) => {
                // Extended while this timer was waiting for the lock
                if !self.armed.contains_key(&owner) {
                    self.arm(owner, expires_at);
                }
                return Ok(());
            }
            None => return Ok(()),
        }

        let timed_out: usize = waiting_ids
            .iter()
            .map(|id| {
                self.deps
                    .continuations
                    .cancel_waiters(*id, ContinuationError::Timeout)
            })
            .sum();

        if let Some(handler) = timeout_handler {
            if let Err(e) = self.run_timeout_handler(owner, handler).await {
                self.deps.reporter.report(&format!("timeout handler of {owner}"), &e);
            }
        }

        let deleted = store.delete_components_by_id(&[owner.id]).await?;
        self.release(&deleted);

        log_component_operation(
            operations::TIMEOUT_FIRED,
            (owner.kind == OwnerKind::Component).then_some(owner.id),
            (owner.kind == OwnerKind::Group).then_some(owner.id),
            "success",
            Some(&format!(
                "{} row(s) deleted, {timed_out} continuation(s) timed out",
                deleted.len()
            )),
        );
        Ok(())
    }

    async fn run_timeout_handler(
        &self,
        owner: TimeoutOwner,
        handler: HandlerDescriptor,
    ) -> Result<()> {
        let outcome = match &handler {
            HandlerDescriptor::Ephemeral { key } => {
                let Some(callback) = self.deps.timeout_handlers.remove(*key) else {
                    warn!(owner = %owner, key = %key, "Ephemeral timeout handler is gone");
                    return Ok(());
                };
                callback(owner).await
            }
            HandlerDescriptor::Persistent { name, args } => {
                let callback = self.deps.persistent_handlers.timeout_handler(name)?;
                callback.on_timeout(owner, args).await
            }
        };

        outcome.map_err(|e| ComponentError::HandlerFailed {
            handler: handler.to_string(),
            reason: format!("{e:#}"),
        })
    }

    fn release(&self, deleted: &[DeletedEntry]) -> usize {
        let mut pending = 0;
        for entry in deleted {
            if let Some(key) = entry.ephemeral_handler {
                self.deps.component_handlers.remove(key);
            }
            if let Some(key) = entry.ephemeral_timeout_handler {
                self.deps.timeout_handlers.remove(key);
            }
            self.disarm(entry.owner);
            self.owner_locks.remove(&entry.owner);
            pending += self
                .deps
                .continuations
                .cancel_waiters(entry.owner.id, ContinuationError::Deleted);
        }
        pending
    }
}
