//! # Shared Test Harness
//!
//! Builds component systems on the in-memory store with a clock that follows tokio's
//! paused time, and records every reply sent back to users.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use component_core::clock::{Clock, MonotonicClock};
use component_core::filters::{
    ComponentInteractionFilter, ComponentInteractionRejectionHandler, FilterRegistry,
};
use component_core::lifecycle::InteractionResponder;
use component_core::models::ComponentInteraction;
use component_core::store::{ComponentStore, InMemoryComponentStore};
use component_core::{ComponentSystem, ComponentSystemBuilder, ComponentsConfig};

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Collects ephemeral replies instead of sending them
#[derive(Debug, Default)]
pub struct RecordingResponder {
    replies: Mutex<Vec<(u64, String)>>,
}

impl RecordingResponder {
    pub fn replies(&self) -> Vec<String> {
        self.replies
            .lock()
            .iter()
            .map(|(_, content)| content.clone())
            .collect()
    }

    pub fn replies_to(&self, user_id: u64) -> Vec<String> {
        self.replies
            .lock()
            .iter()
            .filter(|(user, _)| *user == user_id)
            .map(|(_, content)| content.clone())
            .collect()
    }
}

#[async_trait]
impl InteractionResponder for RecordingResponder {
    async fn reply_ephemeral(
        &self,
        interaction: &ComponentInteraction,
        content: &str,
    ) -> anyhow::Result<()> {
        self.replies
            .lock()
            .push((interaction.user_id, content.to_string()));
        Ok(())
    }
}

/// Rejects every interaction from one user
pub struct BlockUserFilter {
    pub name: &'static str,
    pub user_id: u64,
    pub global: bool,
}

#[async_trait]
impl ComponentInteractionFilter for BlockUserFilter {
    fn name(&self) -> &str {
        self.name
    }

    fn global(&self) -> bool {
        self.global
    }

    async fn check(
        &self,
        interaction: &ComponentInteraction,
        _handler_name: Option<&str>,
    ) -> Option<String> {
        (interaction.user_id == self.user_id).then(|| format!("{} says no", self.name))
    }
}

pub fn block_user(
    name: &'static str,
    user_id: u64,
    global: bool,
) -> Arc<dyn ComponentInteractionFilter> {
    Arc::new(BlockUserFilter {
        name,
        user_id,
        global,
    })
}

/// Lets everything through after a delay, widening the window between lookup and use
pub struct SlowFilter {
    pub name: &'static str,
    pub delay: Duration,
}

#[async_trait]
impl ComponentInteractionFilter for SlowFilter {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(
        &self,
        _interaction: &ComponentInteraction,
        _handler_name: Option<&str>,
    ) -> Option<String> {
        tokio::time::sleep(self.delay).await;
        None
    }
}

pub fn slow_filter(name: &'static str, delay: Duration) -> Arc<dyn ComponentInteractionFilter> {
    Arc::new(SlowFilter { name, delay })
}

/// Records rejections and answers with the filter's message
#[derive(Default)]
pub struct RecordingRejectionHandler {
    pub rejections: Mutex<Vec<(Option<String>, String)>>,
}

#[async_trait]
impl ComponentInteractionRejectionHandler for RecordingRejectionHandler {
    async fn handle(
        &self,
        _interaction: &ComponentInteraction,
        handler_name: Option<&str>,
        user_error: &str,
    ) {
        self.rejections
            .lock()
            .push((handler_name.map(str::to_string), user_error.to_string()));
    }
}

pub struct TestSystem {
    pub system: ComponentSystem,
    pub responder: Arc<RecordingResponder>,
    pub store: Arc<InMemoryComponentStore>,
    pub clock: Arc<MonotonicClock>,
}

pub fn test_config() -> ComponentsConfig {
    let mut config = ComponentsConfig::default();
    config.timeouts.default_timeout_seconds = Some(5);
    config.dispatch.max_concurrent_interactions = 16;
    config
}

pub fn builder_with(
    store: Arc<InMemoryComponentStore>,
    clock: Arc<MonotonicClock>,
    responder: Arc<RecordingResponder>,
) -> ComponentSystemBuilder {
    ComponentSystemBuilder::new(test_config())
        .with_clock(clock as Arc<dyn Clock>)
        .with_store(store as Arc<dyn ComponentStore>)
        .with_responder(responder as Arc<dyn InteractionResponder>)
}

pub async fn test_system() -> Result<TestSystem, Box<dyn std::error::Error>> {
    test_system_with(|builder| builder).await
}

/// Customize the builder (filters, handlers, rate limits) before building
pub async fn test_system_with(
    customize: impl FnOnce(ComponentSystemBuilder) -> ComponentSystemBuilder,
) -> Result<TestSystem, Box<dyn std::error::Error>> {
    init_test_logging();

    let clock = Arc::new(MonotonicClock::new());
    let store = Arc::new(InMemoryComponentStore::new(clock.clone() as Arc<dyn Clock>));
    let responder = Arc::new(RecordingResponder::default());

    let builder = builder_with(store.clone(), clock.clone(), responder.clone());
    let system = customize(builder).build().await?;

    Ok(TestSystem {
        system,
        responder,
        store,
        clock,
    })
}

pub fn registry_with(filters: Vec<Arc<dyn ComponentInteractionFilter>>) -> Arc<FilterRegistry> {
    let registry = Arc::new(FilterRegistry::new());
    for filter in filters {
        registry
            .register(filter)
            .expect("test filters have unique names");
    }
    registry
}
