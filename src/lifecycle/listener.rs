//! # Components Listener
//!
//! Dispatches component interactions delivered by the transport.
//!
//! ```text
//! Received ─► Decoded ─► Looked-up ─► Filtered ─► Resumed ─► (Deleted | Timeout-reset) ─► Executed
//!    │            │           │            │
//!    ▼            ▼           ▼            ▼
//!  Ignored     Ignored     Expired     Rejected
//! ```
//!
//! Each interaction runs on its own task, bounded by
//! `dispatch.max_concurrent_interactions`, so a slow handler never delays delivery of
//! the next event. Checks run in a fixed order: the rate limit, then constraints, then
//! global filters followed by the component's own filters.
//!
//! Uses of components that are deleted on use are claimed after the checks pass. Only
//! the claimant resumes waiters, deletes the component and runs its handler; concurrent
//! uses of the same component are answered as expired.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::controller::{ComponentController, UseClaim};
use super::handler_executor::HandlerExecutor;
use super::reporting::ExceptionReporter;
use crate::config::MessagesConfig;
use crate::error::{ComponentError, Result};
use crate::filters::ComponentInteractionRejectionHandler;
use crate::models::{ComponentInteraction, ComponentRecord};
use crate::ratelimit::RateLimitDecision;

/// Sends replies back to the invoking user
#[async_trait]
pub trait InteractionResponder: Send + Sync {
    /// Reply visible only to the user who triggered the interaction
    async fn reply_ephemeral(
        &self,
        interaction: &ComponentInteraction,
        content: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    Constraints,
    RateLimited { retry_after: Duration },
    Filter { filter: String, reason: String },
}

/// How a single interaction was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Identifier not owned by this system, or not decodable
    Ignored,
    /// Unknown or lazily expired component
    Expired,
    Rejected(RejectionKind),
    /// Lifecycle applied and the handler, if any, completed
    Executed,
    HandlerFailed,
    /// The store failed, or a declared filter no longer resolves
    Failed,
}

pub struct ComponentsListener {
    controller: Arc<ComponentController>,
    executor: HandlerExecutor,
    responder: Arc<dyn InteractionResponder>,
    rejection_handler: Option<Arc<dyn ComponentInteractionRejectionHandler>>,
    reporter: Arc<dyn ExceptionReporter>,
    messages: MessagesConfig,
    permits: Arc<Semaphore>,
}

impl ComponentsListener {
    pub fn new(
        controller: Arc<ComponentController>,
        responder: Arc<dyn InteractionResponder>,
        rejection_handler: Option<Arc<dyn ComponentInteractionRejectionHandler>>,
        reporter: Arc<dyn ExceptionReporter>,
        messages: MessagesConfig,
        max_concurrent_interactions: usize,
    ) -> Result<Self> {
        if !controller.filters().is_empty() && rejection_handler.is_none() {
            return Err(ComponentError::MissingRejectionHandler);
        }

        let executor = HandlerExecutor::new(
            Arc::clone(controller.component_handlers()),
            Arc::clone(controller.persistent_handlers()),
        );
        Ok(Self {
            controller,
            executor,
            responder,
            rejection_handler,
            reporter,
            messages,
            permits: Arc::new(Semaphore::new(max_concurrent_interactions)),
        })
    }

    /// Dispatch on a dedicated task and return immediately
    pub fn on_component_interaction(
        self: &Arc<Self>,
        interaction: ComponentInteraction,
    ) -> JoinHandle<DispatchOutcome> {
        let listener = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = listener.permits.acquire().await.ok();
            listener.handle(interaction).await
        })
    }

    /// Run the dispatch state machine for one interaction
    pub async fn handle(&self, interaction: ComponentInteraction) -> DispatchOutcome {
        let codec = self.controller.codec();
        if !codec.is_owned(&interaction.component_id) {
            debug!(component_id = %interaction.component_id, "Ignoring foreign component identifier");
            return DispatchOutcome::Ignored;
        }
        let internal_id = match codec.decode(&interaction.component_id) {
            Ok(id) => id,
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable component identifier");
                return DispatchOutcome::Ignored;
            }
        };

        let component = match self.controller.get_active_component(internal_id).await {
            Ok(Some(component)) => component,
            Ok(None) => {
                self.reply(&interaction, &self.messages.component_expired).await;
                return DispatchOutcome::Expired;
            }
            Err(e) => {
                self.reporter.report("component lookup", &e);
                self.reply(&interaction, &self.messages.general_error).await;
                return DispatchOutcome::Failed;
            }
        };

        if let Err(outcome) = self.check(&component, &interaction).await {
            return outcome;
        }

        let _claim = if component.deletes_on_use() {
            match self.claim_use(&component, &interaction).await {
                Ok(claim) => Some(claim),
                Err(outcome) => return outcome,
            }
        } else {
            None
        };

        // Resolved before a single-use delete drops the ephemeral closure
        let handler = self.executor.resolve(&component);

        self.controller
            .continuations()
            .resume_coroutines(&component, &interaction);

        if component.deletes_on_use() {
            match self.controller.delete_component(&component, true).await {
                Ok(0) => {
                    debug!(component_id = internal_id, "Component deleted by another use");
                    self.reply(&interaction, &self.messages.component_expired)
                        .await;
                    return DispatchOutcome::Expired;
                }
                Ok(_) => {}
                Err(e) => self
                    .reporter
                    .report(&format!("lifecycle of component {internal_id}"), &e),
            }
        } else if let Err(e) = self.controller.try_reset_timeout(&component).await {
            self.reporter
                .report(&format!("lifecycle of component {internal_id}"), &e);
        }

        let outcome = match handler {
            Ok(Some(handler)) => handler.run(interaction.clone()).await,
            Ok(None) => return DispatchOutcome::Executed,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => DispatchOutcome::Executed,
            Err(e) => {
                self.reporter
                    .report(&format!("handler of component {internal_id}"), &e);
                self.reply(&interaction, &self.messages.general_error).await;
                DispatchOutcome::HandlerFailed
            }
        }
    }

    /// Take the use claim and confirm no earlier claimant consumed the component
    async fn claim_use(
        &self,
        component: &ComponentRecord,
        interaction: &ComponentInteraction,
    ) -> std::result::Result<UseClaim<'_>, DispatchOutcome> {
        let Some(claim) = self.controller.try_claim_use(component) else {
            self.reply(interaction, &self.messages.component_expired)
                .await;
            return Err(DispatchOutcome::Expired);
        };

        match self
            .controller
            .get_active_component(component.internal_id)
            .await
        {
            Ok(Some(_)) => Ok(claim),
            Ok(None) => {
                drop(claim);
                self.reply(interaction, &self.messages.component_expired)
                    .await;
                Err(DispatchOutcome::Expired)
            }
            Err(e) => {
                drop(claim);
                self.reporter.report("component lookup", &e);
                self.reply(interaction, &self.messages.general_error).await;
                Err(DispatchOutcome::Failed)
            }
        }
    }

    async fn check(
        &self,
        component: &ComponentRecord,
        interaction: &ComponentInteraction,
    ) -> std::result::Result<(), DispatchOutcome> {
        if let RateLimitDecision::Rejected { retry_after } = self
            .controller
            .rate_limits()
            .check(component, interaction)
            .await
        {
            let message = self.messages.rate_limited_message(retry_after);
            self.reply(interaction, &message).await;
            return Err(DispatchOutcome::Rejected(RejectionKind::RateLimited {
                retry_after,
            }));
        }

        if !component.constraints.is_allowed(interaction) {
            self.reply(interaction, &self.messages.component_not_allowed)
                .await;
            return Err(DispatchOutcome::Rejected(RejectionKind::Constraints));
        }

        let registry = self.controller.filters();
        let mut filters = registry.global_filters();
        for name in &component.filters {
            match registry.resolve(name) {
                Some(filter) => filters.push(filter),
                None => {
                    let e = ComponentError::UnresolvableFilter(name.clone());
                    self.reporter
                        .report(&format!("filters of component {}", component.internal_id), &e);
                    self.reply(interaction, &self.messages.component_not_allowed)
                        .await;
                    return Err(DispatchOutcome::Failed);
                }
            }
        }

        let handler_name = component.handler_name();
        for filter in filters {
            let Some(reason) = filter.check(interaction, handler_name).await else {
                continue;
            };

            debug!(
                component_id = component.internal_id,
                filter = %filter.name(),
                "🚫 Component interaction rejected by filter"
            );
            match &self.rejection_handler {
                Some(rejection_handler) => {
                    rejection_handler
                        .handle(interaction, handler_name, &reason)
                        .await
                }
                None => self.reply(interaction, &reason).await,
            }
            return Err(DispatchOutcome::Rejected(RejectionKind::Filter {
                filter: filter.name().to_string(),
                reason,
            }));
        }

        Ok(())
    }

    async fn reply(&self, interaction: &ComponentInteraction, content: &str) {
        if let Err(e) = self.responder.reply_ephemeral(interaction, content).await {
            warn!(
                interaction_id = interaction.interaction_id,
                error = %e,
                "Failed to reply to component interaction"
            );
        }
    }

    pub fn controller(&self) -> &Arc<ComponentController> {
        &self.controller
    }
}
