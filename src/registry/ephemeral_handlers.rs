//! # Ephemeral Handler Registries
//!
//! Closures bound to ephemeral components. The store only knows the
//! [`EphemeralHandlerKey`]; the closure itself never leaves this process.

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::{ComponentInteraction, EphemeralHandlerKey, TimeoutOwner};

/// Closure run when an ephemeral component is used
pub type ComponentHandlerFn =
    Arc<dyn Fn(ComponentInteraction) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Closure run when an ephemeral component or group expires
pub type TimeoutHandlerFn =
    Arc<dyn Fn(TimeoutOwner) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub type EphemeralComponentHandlers = EphemeralHandlers<ComponentHandlerFn>;
pub type EphemeralTimeoutHandlers = EphemeralHandlers<TimeoutHandlerFn>;

pub struct EphemeralHandlers<H> {
    handlers: DashMap<EphemeralHandlerKey, H>,
    next_key: AtomicU64,
}

impl<H: Clone> EphemeralHandlers<H> {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            next_key: AtomicU64::new(1),
        }
    }

    /// Store a handler under a fresh key
    pub fn put(&self, handler: H) -> EphemeralHandlerKey {
        let key = EphemeralHandlerKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        self.handlers.insert(key, handler);
        key
    }

    pub fn get(&self, key: EphemeralHandlerKey) -> Option<H> {
        self.handlers.get(&key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: EphemeralHandlerKey) -> Option<H> {
        self.handlers.remove(&key).map(|(_, handler)| handler)
    }

    pub fn contains(&self, key: EphemeralHandlerKey) -> bool {
        self.handlers.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Reset hook for tests
    pub fn clear(&self) {
        self.handlers.clear();
    }
}

impl<H: Clone> Default for EphemeralHandlers<H> {
    fn default() -> Self {
        Self::new()
    }
}
