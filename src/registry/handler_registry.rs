//! # Persistent Handler Registry
//!
//! Handlers for persistent components are looked up by name, with the arguments recorded
//! at creation time. Both survive a restart; the registry is filled again by application
//! startup code before interactions are dispatched.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::error::{ComponentError, Result};
use crate::models::{ComponentInteraction, TimeoutOwner};

#[async_trait]
pub trait PersistentComponentHandler: Send + Sync {
    async fn handle(&self, interaction: &ComponentInteraction, args: &[Value]) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PersistentTimeoutHandler: Send + Sync {
    async fn on_timeout(&self, owner: TimeoutOwner, args: &[Value]) -> anyhow::Result<()>;
}

struct FnComponentHandler<F>(F);

#[async_trait]
impl<F> PersistentComponentHandler for FnComponentHandler<F>
where
    F: Fn(ComponentInteraction, Vec<Value>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync
        + 'static,
{
    async fn handle(&self, interaction: &ComponentInteraction, args: &[Value]) -> anyhow::Result<()> {
        (self.0)(interaction.clone(), args.to_vec()).await
    }
}

struct FnTimeoutHandler<F>(F);

#[async_trait]
impl<F> PersistentTimeoutHandler for FnTimeoutHandler<F>
where
    F: Fn(TimeoutOwner, Vec<Value>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync
        + 'static,
{
    async fn on_timeout(&self, owner: TimeoutOwner, args: &[Value]) -> anyhow::Result<()> {
        (self.0)(owner, args.to_vec()).await
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub component_handlers: usize,
    pub timeout_handlers: usize,
}

#[derive(Default)]
pub struct PersistentHandlerRegistry {
    component_handlers: DashMap<String, Arc<dyn PersistentComponentHandler>>,
    timeout_handlers: DashMap<String, Arc<dyn PersistentTimeoutHandler>>,
}

impl PersistentHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_component_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn PersistentComponentHandler>,
    ) -> Result<()> {
        let name = name.into();
        if self.component_handlers.contains_key(&name) {
            return Err(ComponentError::DuplicateHandler(name));
        }
        self.component_handlers.insert(name.clone(), handler);
        info!(handler = %name, "📝 Persistent component handler registered");
        Ok(())
    }

    /// Register an async closure as a component handler
    pub fn register_component_fn<F, Fut>(&self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(ComponentInteraction, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed = move |interaction: ComponentInteraction, args: Vec<Value>| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(handler(interaction, args))
        };
        self.register_component_handler(name, Arc::new(FnComponentHandler(boxed)))
    }

    pub fn register_timeout_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn PersistentTimeoutHandler>,
    ) -> Result<()> {
        let name = name.into();
        if self.timeout_handlers.contains_key(&name) {
            return Err(ComponentError::DuplicateHandler(name));
        }
        self.timeout_handlers.insert(name.clone(), handler);
        info!(handler = %name, "📝 Persistent timeout handler registered");
        Ok(())
    }

    /// Register an async closure as a timeout handler
    pub fn register_timeout_fn<F, Fut>(&self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(TimeoutOwner, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed = move |owner: TimeoutOwner, args: Vec<Value>| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(handler(owner, args))
        };
        self.register_timeout_handler(name, Arc::new(FnTimeoutHandler(boxed)))
    }

    pub fn component_handler(&self, name: &str) -> Result<Arc<dyn PersistentComponentHandler>> {
        self.component_handlers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ComponentError::HandlerNotFound(name.to_string()))
    }

    pub fn timeout_handler(&self, name: &str) -> Result<Arc<dyn PersistentTimeoutHandler>> {
        self.timeout_handlers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ComponentError::HandlerNotFound(name.to_string()))
    }

    pub fn has_component_handler(&self, name: &str) -> bool {
        self.component_handlers.contains_key(name)
    }

    pub fn has_timeout_handler(&self, name: &str) -> bool {
        self.timeout_handlers.contains_key(name)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            component_handlers: self.component_handlers.len(),
            timeout_handlers: self.timeout_handlers.len(),
        }
    }

    /// Reset hook for tests
    pub fn clear(&self) {
        self.component_handlers.clear();
        self.timeout_handlers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_invoke_by_name() {
        let registry = PersistentHandlerRegistry::new();
        registry
            .register_component_fn("vote", |_interaction, args| async move {
                anyhow::ensure!(args == vec![json!("up")], "unexpected args {args:?}");
                Ok(())
            })
            .unwrap();

        let handler = registry.component_handler("vote").unwrap();
        handler
            .handle(&ComponentInteraction::button("x", 1), &[json!("up")])
            .await
            .unwrap();
        assert_eq!(
            registry.stats(),
            RegistryStats {
                component_handlers: 1,
                timeout_handlers: 0
            }
        );
    }

    #[test]
    fn test_duplicate_and_missing_names() {
        let registry = PersistentHandlerRegistry::new();
        registry
            .register_timeout_fn("expire", |_owner, _args| async { Ok(()) })
            .unwrap();

        assert!(matches!(
            registry.register_timeout_fn("expire", |_owner, _args| async { Ok(()) }),
            Err(ComponentError::DuplicateHandler(_))
        ));
        assert!(matches!(
            registry.component_handler("missing"),
            Err(ComponentError::HandlerNotFound(_))
        ));
    }
}
