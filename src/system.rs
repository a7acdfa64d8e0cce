//! # Component System Bootstrap
//!
//! Wires configuration, the store, the registries, the controller and the listener into
//! one [`ComponentSystem`]. Building runs startup reconciliation when
//! `timeouts.reconcile_on_startup` is enabled, so the system is ready to dispatch as soon
//! as `build` returns.
//!
//! ```rust,no_run
//! use component_core::config::ConfigManager;
//! use component_core::lifecycle::InteractionResponder;
//! use component_core::models::ComponentInteraction;
//! use component_core::system::ComponentSystemBuilder;
//! use std::sync::Arc;
//!
//! struct Replies;
//!
//! #[async_trait::async_trait]
//! impl InteractionResponder for Replies {
//!     async fn reply_ephemeral(&self, _: &ComponentInteraction, content: &str) -> anyhow::Result<()> {
//!         println!("{content}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let system = ComponentSystemBuilder::from_manager(&manager)
//!     .with_responder(Arc::new(Replies))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::{ComponentsConfig, ConfigManager, ConfigurationError, StorageBackend};
use crate::error::Result;
use crate::filters::{ComponentInteractionRejectionHandler, FilterRegistry};
use crate::identity::ComponentIdCodec;
use crate::lifecycle::{
    ComponentController, ComponentsListener, ContinuationManager, DispatchOutcome,
    ExceptionReporter, InteractionResponder, TimeoutDependencies, TracingExceptionReporter,
};
use crate::models::ComponentInteraction;
use crate::ratelimit::RateLimitContainer;
use crate::registry::{
    EphemeralComponentHandlers, EphemeralTimeoutHandlers, PersistentHandlerRegistry,
};
use crate::store::{ComponentStore, InMemoryComponentStore};

pub struct ComponentSystemBuilder {
    config: ComponentsConfig,
    environment: String,
    store: Option<Arc<dyn ComponentStore>>,
    clock: Option<Arc<dyn Clock>>,
    filters: Arc<FilterRegistry>,
    rate_limits: Arc<RateLimitContainer>,
    persistent_handlers: Arc<PersistentHandlerRegistry>,
    responder: Option<Arc<dyn InteractionResponder>>,
    rejection_handler: Option<Arc<dyn ComponentInteractionRejectionHandler>>,
    reporter: Arc<dyn ExceptionReporter>,
}

impl ComponentSystemBuilder {
    pub fn new(config: ComponentsConfig) -> Self {
        Self {
            config,
            environment: "development".to_string(),
            store: None,
            clock: None,
            filters: Arc::new(FilterRegistry::new()),
            rate_limits: Arc::new(RateLimitContainer::new()),
            persistent_handlers: Arc::new(PersistentHandlerRegistry::new()),
            responder: None,
            rejection_handler: None,
            reporter: Arc::new(TracingExceptionReporter),
        }
    }

    pub fn from_manager(manager: &ConfigManager) -> Self {
        let mut builder = Self::new(manager.config().clone());
        builder.environment = manager.environment().to_string();
        builder
    }

    /// Use this store instead of the one selected by `storage.backend`
    pub fn with_store(mut self, store: Arc<dyn ComponentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_filters(mut self, filters: Arc<FilterRegistry>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_rate_limits(mut self, rate_limits: Arc<RateLimitContainer>) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub fn with_persistent_handlers(mut self, handlers: Arc<PersistentHandlerRegistry>) -> Self {
        self.persistent_handlers = handlers;
        self
    }

    pub fn with_responder(mut self, responder: Arc<dyn InteractionResponder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_rejection_handler(
        mut self,
        handler: Arc<dyn ComponentInteractionRejectionHandler>,
    ) -> Self {
        self.rejection_handler = Some(handler);
        self
    }

    pub fn with_exception_reporter(mut self, reporter: Arc<dyn ExceptionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Registries can be filled before or after `build`, they are shared
    pub fn filters(&self) -> &Arc<FilterRegistry> {
        &self.filters
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitContainer> {
        &self.rate_limits
    }

    pub fn persistent_handlers(&self) -> &Arc<PersistentHandlerRegistry> {
        &self.persistent_handlers
    }

    pub async fn build(self) -> Result<ComponentSystem> {
        self.config.validate()?;

        let responder = self.responder.ok_or_else(|| {
            ConfigurationError::missing_required_field("responder", "component system builder")
        })?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = match self.store {
            Some(store) => store,
            None => create_store(&self.config, Arc::clone(&clock)).await?,
        };

        let deps = TimeoutDependencies {
            store,
            clock,
            continuations: Arc::new(ContinuationManager::new()),
            component_handlers: Arc::new(EphemeralComponentHandlers::new()),
            timeout_handlers: Arc::new(EphemeralTimeoutHandlers::new()),
            persistent_handlers: self.persistent_handlers,
            reporter: Arc::clone(&self.reporter),
        };

        let controller = Arc::new(ComponentController::new(
            ComponentIdCodec::new(self.config.identity.prefix.clone()),
            deps,
            self.filters,
            self.rate_limits,
            self.config.timeouts.default_timeout(),
        ));

        let listener = Arc::new(ComponentsListener::new(
            Arc::clone(&controller),
            responder,
            self.rejection_handler,
            self.reporter,
            self.config.messages.clone(),
            self.config.dispatch.max_concurrent_interactions,
        )?);

        if self.config.timeouts.reconcile_on_startup {
            controller.initialize().await?;
        }

        info!(
            environment = %self.environment,
            backend = ?self.config.storage.backend,
            prefix = %self.config.identity.prefix,
            "🚀 Component system ready"
        );

        Ok(ComponentSystem {
            config: self.config,
            controller,
            listener,
        })
    }
}

async fn create_store(
    config: &ComponentsConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn ComponentStore>> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryComponentStore::new(clock))),
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres => {
            let database_url = config.storage.resolve_database_url().ok_or_else(|| {
                ConfigurationError::missing_required_field("storage.database_url", "postgres storage")
            })?;
            let store = crate::store::PgComponentStore::connect(
                &database_url,
                config.storage.max_connections,
                clock,
            )
            .await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StorageBackend::Postgres => Err(ConfigurationError::invalid_value(
            "storage.backend",
            "postgres",
            "this build does not include the postgres feature",
        )
        .into()),
    }
}

pub struct ComponentSystem {
    config: ComponentsConfig,
    controller: Arc<ComponentController>,
    listener: Arc<ComponentsListener>,
}

impl ComponentSystem {
    pub fn controller(&self) -> &Arc<ComponentController> {
        &self.controller
    }

    pub fn listener(&self) -> &Arc<ComponentsListener> {
        &self.listener
    }

    pub fn config(&self) -> &ComponentsConfig {
        &self.config
    }

    /// Entry point for the transport: dispatch one interaction on its own task
    pub fn dispatch(&self, interaction: ComponentInteraction) -> JoinHandle<DispatchOutcome> {
        self.listener.on_component_interaction(interaction)
    }

    /// Reset hook for tests
    pub fn clear(&self) {
        self.controller.clear();
    }
}
