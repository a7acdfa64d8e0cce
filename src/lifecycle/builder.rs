//! # Component Builders
//!
//! Describe a component or group before handing it to the
//! [`ComponentController`](super::ComponentController). Builders only collect data;
//! validation against the registries happens at creation.
//!
//! ```rust
//! use component_core::lifecycle::ComponentBuilder;
//! use component_core::models::InteractionConstraints;
//! use std::time::Duration;
//!
//! let builder = ComponentBuilder::ephemeral()
//!     .bind_to(|interaction| async move {
//!         println!("pressed by {}", interaction.user_id);
//!         Ok(())
//!     })
//!     .single_use(true)
//!     .constraints(InteractionConstraints::of_users([42]))
//!     .timeout(Duration::from_secs(60));
//! ```

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::filters::ComponentInteractionFilter;
use crate::models::{
    Component, ComponentId, ComponentInteraction, ComponentLifetime, InteractionConstraints,
    TimeoutOwner,
};
use crate::ratelimit::RateLimitReference;
use crate::registry::{ComponentHandlerFn, TimeoutHandlerFn};

pub(crate) enum BoundHandler {
    Ephemeral(ComponentHandlerFn),
    Persistent { name: String, args: Vec<Value> },
}

pub(crate) enum BoundTimeoutHandler {
    Ephemeral(TimeoutHandlerFn),
    Persistent { name: String, args: Vec<Value> },
}

impl BoundHandler {
    pub(crate) fn lifetime(&self) -> ComponentLifetime {
        match self {
            Self::Ephemeral(_) => ComponentLifetime::Ephemeral,
            Self::Persistent { .. } => ComponentLifetime::Persistent,
        }
    }
}

impl BoundTimeoutHandler {
    pub(crate) fn lifetime(&self) -> ComponentLifetime {
        match self {
            Self::Ephemeral(_) => ComponentLifetime::Ephemeral,
            Self::Persistent { .. } => ComponentLifetime::Persistent,
        }
    }
}

/// When a component or group expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSetting {
    After(Duration),
    At(DateTime<Utc>),
    /// `timeouts.default_timeout_seconds` from the configuration, if any
    Default,
}

fn component_closure<F, Fut>(handler: F) -> ComponentHandlerFn
where
    F: Fn(ComponentInteraction) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(
        move |interaction: ComponentInteraction| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(handler(interaction))
        },
    )
}

fn timeout_closure<F, Fut>(handler: F) -> TimeoutHandlerFn
where
    F: Fn(TimeoutOwner) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(
        move |owner: TimeoutOwner| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(handler(owner))
        },
    )
}

pub struct ComponentBuilder {
    pub(crate) lifetime: ComponentLifetime,
    pub(crate) handler: Option<BoundHandler>,
    pub(crate) timeout_handler: Option<BoundTimeoutHandler>,
    pub(crate) constraints: InteractionConstraints,
    pub(crate) filters: Vec<Arc<dyn ComponentInteractionFilter>>,
    pub(crate) single_use: bool,
    pub(crate) timeout: Option<TimeoutSetting>,
    pub(crate) reset_timeout_on_use: Option<Duration>,
    pub(crate) rate_limit: Option<RateLimitReference>,
    pub(crate) metadata: Option<Value>,
}

impl ComponentBuilder {
    fn new(lifetime: ComponentLifetime) -> Self {
        Self {
            lifetime,
            handler: None,
            timeout_handler: None,
            constraints: InteractionConstraints::default(),
            filters: Vec::new(),
            single_use: false,
            timeout: None,
            reset_timeout_on_use: None,
            rate_limit: None,
            metadata: None,
        }
    }

    /// Component whose handlers are in-process closures, purged on restart
    pub fn ephemeral() -> Self {
        Self::new(ComponentLifetime::Ephemeral)
    }

    /// Component whose handlers are registered names, kept across restarts
    pub fn persistent() -> Self {
        Self::new(ComponentLifetime::Persistent)
    }

    pub fn bind_to<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ComponentInteraction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handler = Some(BoundHandler::Ephemeral(component_closure(handler)));
        self
    }

    pub fn bind_to_handler(mut self, name: impl Into<String>, args: Vec<Value>) -> Self {
        self.handler = Some(BoundHandler::Persistent {
            name: name.into(),
            args,
        });
        self
    }

    pub fn single_use(mut self, single_use: bool) -> Self {
        self.single_use = single_use;
        self
    }

    pub fn constraints(mut self, constraints: InteractionConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Filters run in the order they are added
    pub fn add_filter(mut self, filter: Arc<dyn ComponentInteractionFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn rate_limit_reference(mut self, reference: RateLimitReference) -> Self {
        self.rate_limit = Some(reference);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(TimeoutSetting::After(duration));
        self
    }

    pub fn expires_at(mut self, instant: DateTime<Utc>) -> Self {
        self.timeout = Some(TimeoutSetting::At(instant));
        self
    }

    pub fn default_timeout(mut self) -> Self {
        self.timeout = Some(TimeoutSetting::Default);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Each use pushes the expiry to `now + duration`; needs a timeout to have any effect
    pub fn reset_timeout_on_use(mut self, duration: Duration) -> Self {
        self.reset_timeout_on_use = Some(duration);
        self
    }

    pub fn on_timeout<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(TimeoutOwner) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.timeout_handler = Some(BoundTimeoutHandler::Ephemeral(timeout_closure(handler)));
        self
    }

    pub fn on_timeout_handler(mut self, name: impl Into<String>, args: Vec<Value>) -> Self {
        self.timeout_handler = Some(BoundTimeoutHandler::Persistent {
            name: name.into(),
            args,
        });
        self
    }

    /// Style and label data carried back on the created [`Component`]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Group over components that were already created without their own timeout
pub struct GroupBuilder {
    pub(crate) member_ids: Vec<ComponentId>,
    pub(crate) single_use: bool,
    pub(crate) timeout: Option<TimeoutSetting>,
    pub(crate) reset_timeout_on_use: Option<Duration>,
    pub(crate) timeout_handler: Option<BoundTimeoutHandler>,
}

impl GroupBuilder {
    pub fn new<'a>(components: impl IntoIterator<Item = &'a Component>) -> Self {
        Self {
            member_ids: components
                .into_iter()
                .map(|component| component.internal_id)
                .collect(),
            single_use: false,
            timeout: None,
            reset_timeout_on_use: None,
            timeout_handler: None,
        }
    }

    pub fn single_use(mut self, single_use: bool) -> Self {
        self.single_use = single_use;
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(TimeoutSetting::After(duration));
        self
    }

    pub fn expires_at(mut self, instant: DateTime<Utc>) -> Self {
        self.timeout = Some(TimeoutSetting::At(instant));
        self
    }

    pub fn default_timeout(mut self) -> Self {
        self.timeout = Some(TimeoutSetting::Default);
        self
    }

    pub fn reset_timeout_on_use(mut self, duration: Duration) -> Self {
        self.reset_timeout_on_use = Some(duration);
        self
    }

    pub fn on_timeout<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(TimeoutOwner) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.timeout_handler = Some(BoundTimeoutHandler::Ephemeral(timeout_closure(handler)));
        self
    }

    pub fn on_timeout_handler(mut self, name: impl Into<String>, args: Vec<Value>) -> Self {
        self.timeout_handler = Some(BoundTimeoutHandler::Persistent {
            name: name.into(),
            args,
        });
        self
    }
}
