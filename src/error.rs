//! # Error Handling
//!
//! Structured errors for the component lifecycle engine.
//!
//! Only misconfiguration, store failures and handler faults are errors. An expired
//! component, a rejected interaction or a foreign identifier are ordinary dispatch
//! outcomes (see [`crate::lifecycle::DispatchOutcome`]) and never surface here.

use crate::config::ConfigurationError;
use crate::lifecycle::ContinuationError;
use crate::models::ComponentId;

#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// The backing store failed; never retried inside the engine
    #[error("Store error: {0}")]
    Store(String),

    #[error("Identifier '{0}' does not belong to this component system")]
    ForeignIdentifier(String),

    #[error("Malformed component identifier '{0}'")]
    MalformedIdentifier(String),

    #[error("Rate limit group '{0}' was not registered in the rate limit container")]
    UnknownRateLimitGroup(String),

    #[error("Rate limit group '{0}' is already registered")]
    DuplicateRateLimitGroup(String),

    #[error(
        "A component rate limit reference already exists for group '{group}' and discriminator '{discriminator}', each component must use a different discriminator"
    )]
    DuplicateRateLimitReference {
        group: String,
        discriminator: String,
    },

    #[error(
        "Filter '{0}' cannot be resolved from the filter registry, composite filters must be registered as a single filter before use"
    )]
    UnresolvableFilter(String),

    #[error("Global filter '{0}' cannot be declared on a component, it already runs on every interaction")]
    GlobalFilterDeclared(String),

    #[error("Filter '{0}' is already registered")]
    DuplicateFilter(String),

    #[error("A rejection handler must be available when component filters are registered")]
    MissingRejectionHandler,

    #[error("Handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("No handler registered under '{0}'")]
    HandlerNotFound(String),

    #[error("Handler '{handler}' failed: {reason}")]
    HandlerFailed { handler: String, reason: String },

    #[error("Component {component_id} was deleted with {pending} continuation(s) still waiting on it")]
    PendingContinuation {
        component_id: ComponentId,
        pending: usize,
    },

    #[error("Component {0} has its own timeout, components in groups cannot have timeouts")]
    GroupedComponentTimeout(ComponentId),

    #[error("Component {component_id} already belongs to group {group_id}")]
    ComponentAlreadyGrouped {
        component_id: ComponentId,
        group_id: ComponentId,
    },

    #[error("Component {0} does not exist")]
    ComponentNotFound(ComponentId),

    #[error("A component group needs at least one component")]
    EmptyGroup,

    #[error("{lifetime} components cannot be bound to a {handler} handler")]
    LifetimeMismatch { lifetime: String, handler: String },

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error(transparent)]
    Continuation(#[from] ContinuationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl ComponentError {
    /// Programming errors thrown to the registering or deleting caller
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::UnknownRateLimitGroup(_)
                | Self::DuplicateRateLimitGroup(_)
                | Self::DuplicateRateLimitReference { .. }
                | Self::UnresolvableFilter(_)
                | Self::GlobalFilterDeclared(_)
                | Self::DuplicateFilter(_)
                | Self::MissingRejectionHandler
                | Self::DuplicateHandler(_)
                | Self::PendingContinuation { .. }
                | Self::GroupedComponentTimeout(_)
                | Self::ComponentAlreadyGrouped { .. }
                | Self::EmptyGroup
                | Self::LifetimeMismatch { .. }
                | Self::Configuration(_)
        )
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for ComponentError {
    fn from(err: sqlx::Error) -> Self {
        ComponentError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for ComponentError {
    fn from(err: serde_json::Error) -> Self {
        ComponentError::Store(format!("Serialization error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ComponentError>;
