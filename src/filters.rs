//! # Component Interaction Filters
//!
//! Named checks run before a component handler. Global filters run on every component
//! interaction, then the component's declared filters run in declaration order. The first
//! rejection stops the chain and is handed to the [`ComponentInteractionRejectionHandler`].
//!
//! Filters declared on a component must be resolvable from the [`FilterRegistry`]: only
//! their names are persisted, so an inline composite such as `all_of(a, b)` that was never
//! registered could not be found again after a restart and is refused at creation. Register
//! a composite under its own name with [`FilterRegistry::register_named`] to declare it.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::error::{ComponentError, Result};
use crate::models::ComponentInteraction;

#[async_trait]
pub trait ComponentInteractionFilter: Send + Sync {
    fn name(&self) -> &str;

    /// Global filters run on every interaction and cannot be declared explicitly
    fn global(&self) -> bool {
        false
    }

    fn is_composite(&self) -> bool {
        false
    }

    /// `None` to let the interaction through, otherwise the user-facing rejection reason
    async fn check(
        &self,
        interaction: &ComponentInteraction,
        handler_name: Option<&str>,
    ) -> Option<String>;
}

#[async_trait]
pub trait ComponentInteractionRejectionHandler: Send + Sync {
    /// Must acknowledge the interaction, usually by replying with `user_error`
    async fn handle(
        &self,
        interaction: &ComponentInteraction,
        handler_name: Option<&str>,
        user_error: &str,
    );
}

#[derive(Default)]
pub struct FilterRegistry {
    filters: DashMap<String, Arc<dyn ComponentInteractionFilter>>,
    global_filters: RwLock<Vec<Arc<dyn ComponentInteractionFilter>>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, filter: Arc<dyn ComponentInteractionFilter>) -> Result<()> {
        let name = filter.name().to_string();
        if filter.is_composite() {
            return Err(ComponentError::UnresolvableFilter(name));
        }
        if self.filters.contains_key(&name) {
            return Err(ComponentError::DuplicateFilter(name));
        }

        if filter.global() {
            self.global_filters.write().push(Arc::clone(&filter));
        }
        self.filters.insert(name.clone(), filter);
        info!(filter = %name, "🧹 Component filter registered");
        Ok(())
    }

    /// Register a filter, typically a composite, under `name` and return the declarable
    /// filter
    pub fn register_named(
        &self,
        name: impl Into<String>,
        filter: Arc<dyn ComponentInteractionFilter>,
    ) -> Result<Arc<dyn ComponentInteractionFilter>> {
        let named: Arc<dyn ComponentInteractionFilter> = Arc::new(RegisteredFilter {
            name: name.into(),
            inner: filter,
        });
        self.register(Arc::clone(&named))?;
        Ok(named)
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ComponentInteractionFilter>> {
        self.filters.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Ensure a filter can be declared on a component, returning the name to persist
    pub fn validate_declared(&self, filter: &Arc<dyn ComponentInteractionFilter>) -> Result<String> {
        let name = filter.name().to_string();
        if filter.global() {
            return Err(ComponentError::GlobalFilterDeclared(name));
        }

        let registered = self
            .resolve(&name)
            .is_some_and(|found| same_filter(&found, filter));
        if !registered {
            return Err(ComponentError::UnresolvableFilter(name));
        }
        Ok(name)
    }

    pub fn global_filters(&self) -> Vec<Arc<dyn ComponentInteractionFilter>> {
        self.global_filters.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Reset hook for tests
    pub fn clear(&self) {
        self.filters.clear();
        self.global_filters.write().clear();
    }
}

fn same_filter(
    a: &Arc<dyn ComponentInteractionFilter>,
    b: &Arc<dyn ComponentInteractionFilter>,
) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Passes only when every filter passes; reports the first rejection
pub fn all_of(filters: Vec<Arc<dyn ComponentInteractionFilter>>) -> Arc<dyn ComponentInteractionFilter> {
    Arc::new(CompositeFilter::new(CompositeMode::All, filters))
}

/// Passes when any filter passes; reports the last rejection otherwise
pub fn any_of(filters: Vec<Arc<dyn ComponentInteractionFilter>>) -> Arc<dyn ComponentInteractionFilter> {
    Arc::new(CompositeFilter::new(CompositeMode::Any, filters))
}

struct RegisteredFilter {
    name: String,
    inner: Arc<dyn ComponentInteractionFilter>,
}

#[async_trait]
impl ComponentInteractionFilter for RegisteredFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        interaction: &ComponentInteraction,
        handler_name: Option<&str>,
    ) -> Option<String> {
        self.inner.check(interaction, handler_name).await
    }
}

#[derive(Debug, Clone, Copy)]
enum CompositeMode {
    All,
    Any,
}

struct CompositeFilter {
    name: String,
    mode: CompositeMode,
    filters: Vec<Arc<dyn ComponentInteractionFilter>>,
}

impl CompositeFilter {
    fn new(mode: CompositeMode, filters: Vec<Arc<dyn ComponentInteractionFilter>>) -> Self {
        let separator = match mode {
            CompositeMode::All => " & ",
            CompositeMode::Any => " | ",
        };
        let name = format!(
            "({})",
            filters
                .iter()
                .map(|filter| filter.name())
                .collect::<Vec<_>>()
                .join(separator)
        );
        Self {
            name,
            mode,
            filters,
        }
    }
}

#[async_trait]
impl ComponentInteractionFilter for CompositeFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_composite(&self) -> bool {
        true
    }

    async fn check(
        &self,
        interaction: &ComponentInteraction,
        handler_name: Option<&str>,
    ) -> Option<String> {
        let mut last_rejection = None;
        for filter in &self.filters {
            match (self.mode, filter.check(interaction, handler_name).await) {
                (CompositeMode::All, Some(rejection)) => return Some(rejection),
                (CompositeMode::Any, None) => return None,
                (_, rejection) => last_rejection = rejection,
            }
        }
        last_rejection
    }
}
