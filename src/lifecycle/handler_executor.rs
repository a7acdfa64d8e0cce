//! # Handler Executor
//!
//! Resolves the handler bound to a component into something runnable. Resolution happens
//! before a single-use component is deleted, since deletion drops its ephemeral closure.

use serde_json::Value;
use std::sync::Arc;

use crate::error::{ComponentError, Result};
use crate::models::{ComponentInteraction, ComponentRecord, HandlerDescriptor};
use crate::registry::{
    ComponentHandlerFn, EphemeralComponentHandlers, PersistentComponentHandler,
    PersistentHandlerRegistry,
};

pub enum ResolvedHandler {
    Ephemeral {
        descriptor: HandlerDescriptor,
        handler: ComponentHandlerFn,
    },
    Persistent {
        name: String,
        args: Vec<Value>,
        handler: Arc<dyn PersistentComponentHandler>,
    },
}

impl ResolvedHandler {
    pub fn name(&self) -> String {
        match self {
            Self::Ephemeral { descriptor, .. } => descriptor.to_string(),
            Self::Persistent { name, .. } => name.clone(),
        }
    }

    pub async fn run(&self, interaction: ComponentInteraction) -> Result<()> {
        let outcome = match self {
            Self::Ephemeral { handler, .. } => handler(interaction).await,
            Self::Persistent { args, handler, .. } => handler.handle(&interaction, args).await,
        };

        outcome.map_err(|e| ComponentError::HandlerFailed {
            handler: self.name(),
            reason: format!("{e:#}"),
        })
    }
}

#[derive(Clone)]
pub struct HandlerExecutor {
    component_handlers: Arc<EphemeralComponentHandlers>,
    persistent_handlers: Arc<PersistentHandlerRegistry>,
}

impl HandlerExecutor {
    pub fn new(
        component_handlers: Arc<EphemeralComponentHandlers>,
        persistent_handlers: Arc<PersistentHandlerRegistry>,
    ) -> Self {
        Self {
            component_handlers,
            persistent_handlers,
        }
    }

    /// `None` when the component has no handler and only exists to be awaited
    pub fn resolve(&self, component: &ComponentRecord) -> Result<Option<ResolvedHandler>> {
        let Some(descriptor) = &component.handler else {
            return Ok(None);
        };

        let resolved = match descriptor {
            HandlerDescriptor::Ephemeral { key } => ResolvedHandler::Ephemeral {
                descriptor: descriptor.clone(),
                handler: self
                    .component_handlers
                    .get(*key)
                    .ok_or_else(|| ComponentError::HandlerNotFound(key.to_string()))?,
            },
            HandlerDescriptor::Persistent { name, args } => ResolvedHandler::Persistent {
                name: name.clone(),
                args: args.clone(),
                handler: self.persistent_handlers.component_handler(name)?,
            },
        };
        Ok(Some(resolved))
    }

    /// Resolve and run in one step; `false` when no handler is bound
    pub async fn run_handler(
        &self,
        component: &ComponentRecord,
        interaction: ComponentInteraction,
    ) -> Result<bool> {
        match self.resolve(component)? {
            Some(handler) => handler.run(interaction).await.map(|_| true),
            None => Ok(false),
        }
    }
}
