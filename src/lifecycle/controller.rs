//! # Component Controller
//!
//! Creates, looks up, resets and deletes components and groups, keeping the store, the
//! ephemeral handler registries and the timeout manager consistent with each other.
//!
//! Lookups apply lazy expiry: a record whose `expires_at` has passed is treated as absent
//! even if its timer has not fired yet.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::builder::{BoundHandler, BoundTimeoutHandler, ComponentBuilder, GroupBuilder, TimeoutSetting};
use super::continuation_manager::ContinuationManager;
use super::timeout_manager::{ComponentTimeoutManager, TimeoutDependencies};
use crate::clock::{after, Clock};
use crate::constants::operations;
use crate::error::{ComponentError, Result};
use crate::filters::FilterRegistry;
use crate::identity::ComponentIdCodec;
use crate::logging::log_component_operation;
use crate::models::{
    Component, ComponentGroup, ComponentId, ComponentInteraction, ComponentLifetime,
    ComponentRecord, EphemeralHandlerKey, HandlerDescriptor,
};
use crate::ratelimit::{RateLimitContainer, RateLimitReference, RateLimitReferences};
use crate::registry::{EphemeralComponentHandlers, EphemeralTimeoutHandlers, PersistentHandlerRegistry};
use crate::store::{ComponentStore, NewComponent, NewGroup};

pub struct ComponentController {
    codec: ComponentIdCodec,
    deps: TimeoutDependencies,
    timeouts: ComponentTimeoutManager,
    filters: Arc<FilterRegistry>,
    rate_limits: Arc<RateLimitContainer>,
    rate_limit_references: RateLimitReferences,
    default_timeout: Option<Duration>,
    in_use: DashSet<ComponentId>,
}

/// Exclusive right to consume a single-use component, released on drop
#[derive(Debug)]
pub struct UseClaim<'a> {
    in_use: &'a DashSet<ComponentId>,
    id: ComponentId,
}

impl Drop for UseClaim<'_> {
    fn drop(&mut self) {
        self.in_use.remove(&self.id);
    }
}

impl ComponentController {
    pub fn new(
        codec: ComponentIdCodec,
        deps: TimeoutDependencies,
        filters: Arc<FilterRegistry>,
        rate_limits: Arc<RateLimitContainer>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            codec,
            timeouts: ComponentTimeoutManager::new(deps.clone()),
            deps,
            filters,
            rate_limits,
            rate_limit_references: RateLimitReferences::new(),
            default_timeout,
            in_use: DashSet::new(),
        }
    }

    /// Startup reconciliation: purge ephemeral records, then re-arm persisted timeouts
    pub async fn initialize(&self) -> Result<()> {
        let removed = self.deps.store.remove_ephemeral_components().await?;
        log_component_operation(
            operations::PURGE_EPHEMERAL,
            None,
            None,
            "success",
            Some(&format!("{removed} ephemeral row(s) removed")),
        );

        let rescheduled = self.timeouts.reschedule_all().await?;
        info!(removed, rescheduled, "✅ Component controller initialized");
        Ok(())
    }

    pub async fn create_component(&self, builder: ComponentBuilder) -> Result<Component> {
        if let Some(reference) = &builder.rate_limit {
            if !self.rate_limits.contains(&reference.group) {
                return Err(ComponentError::UnknownRateLimitGroup(reference.group.clone()));
            }
        }

        let filters = builder
            .filters
            .iter()
            .map(|filter| self.filters.validate_declared(filter))
            .collect::<Result<Vec<_>>>()?;

        check_lifetime(builder.lifetime, builder.handler.as_ref().map(BoundHandler::lifetime))?;
        check_lifetime(
            builder.lifetime,
            builder.timeout_handler.as_ref().map(BoundTimeoutHandler::lifetime),
        )?;

        let expires_at = self.resolve_timeout(builder.timeout)?;
        if builder.reset_timeout_on_use.is_some() && expires_at.is_none() {
            warn!("Using 'reset_timeout_on_use' has no effect when no timeout is set");
        }

        let handler = builder.handler.map(|handler| self.register_handler(handler));
        let timeout_handler = builder
            .timeout_handler
            .map(|handler| self.register_timeout_handler(handler));

        let new_component = NewComponent {
            lifetime: builder.lifetime,
            handler: handler.clone(),
            timeout_handler: timeout_handler.clone(),
            constraints: builder.constraints,
            filters,
            single_use: builder.single_use,
            expires_at,
            reset_timeout_on_use_duration: builder.reset_timeout_on_use,
            rate_limit: builder.rate_limit,
        };

        let record = match self.deps.store.create_component(new_component).await {
            Ok(record) => record,
            Err(e) => {
                self.unregister(handler.as_ref(), timeout_handler.as_ref());
                return Err(e);
            }
        };

        if let Some(expires_at) = record.expires_at {
            self.timeouts.schedule(record.owner(), expires_at).await;
        }

        log_component_operation(
            operations::CREATE,
            Some(record.internal_id),
            None,
            "success",
            Some(&format!("{} component", record.lifetime)),
        );

        Ok(Component {
            internal_id: record.internal_id,
            component_id: self.codec.encode(record.internal_id),
            lifetime: record.lifetime,
            single_use: record.single_use,
            expires_at: record.expires_at,
            metadata: builder.metadata,
        })
    }

    /// The component if it exists and has not expired
    pub async fn get_active_component(&self, id: ComponentId) -> Result<Option<ComponentRecord>> {
        let now = self.deps.clock.now();
        let record = self.deps.store.get_component(id).await?;
        Ok(record.filter(|record| !record.is_expired_at(now)))
    }

    /// Claim the use of a component that is deleted on use.
    ///
    /// Grouped members are claimed through their group, since using any member deletes
    /// all of them. Returns `None` while another interaction holds the claim.
    pub fn try_claim_use(&self, component: &ComponentRecord) -> Option<UseClaim<'_>> {
        let id = component.group_id().unwrap_or(component.internal_id);
        if !self.in_use.insert(id) {
            debug!(component_id = component.internal_id, claimed = id, "Use already claimed");
            return None;
        }
        Some(UseClaim {
            in_use: &self.in_use,
            id,
        })
    }

    /// Reset the timeout of the component, or of its group when it has one
    pub async fn try_reset_timeout(&self, component: &ComponentRecord) -> Result<()> {
        let (owner, reset) = match &component.group {
            Some(group) => (group.owner(), group.reset_timeout_on_use_duration),
            None => (component.owner(), component.reset_timeout_on_use_duration),
        };
        if reset.is_none() {
            return Ok(());
        }

        if self.timeouts.reset(owner).await?.is_none() {
            debug!(owner = %owner, "No expiry to reset");
        }
        Ok(())
    }

    pub async fn delete_component(
        &self,
        component: &ComponentRecord,
        throw_on_pending_continuation: bool,
    ) -> Result<usize> {
        self.delete_components_by_id(&[component.internal_id], throw_on_pending_continuation)
            .await
    }

    /// Delete components or groups by id, cascading to whole groups, and return how many
    /// records were removed.
    ///
    /// Timers are cancelled and remaining waiters are resumed with
    /// [`ContinuationError::Deleted`](super::ContinuationError::Deleted). With
    /// `throw_on_pending_continuation`, finding such waiters is reported as an error after
    /// the deletion went through.
    pub async fn delete_components_by_id(
        &self,
        ids: &[ComponentId],
        throw_on_pending_continuation: bool,
    ) -> Result<usize> {
        let deleted = self.deps.store.delete_components_by_id(ids).await?;
        let pending = self.timeouts.release(&deleted);

        for entry in &deleted {
            let (component_id, group_id) = if entry.is_group() {
                (None, Some(entry.owner.id))
            } else {
                (Some(entry.owner.id), None)
            };
            log_component_operation(operations::DELETE, component_id, group_id, "success", None);
        }

        if throw_on_pending_continuation && pending > 0 {
            return Err(ComponentError::PendingContinuation {
                component_id: ids.first().copied().unwrap_or_default(),
                pending,
            });
        }
        Ok(deleted.len())
    }

    pub async fn delete(&self, component: &Component) -> Result<()> {
        self.delete_components_by_id(&[component.internal_id], false)
            .await
            .map(|_| ())
    }

    pub async fn delete_group(&self, group: &ComponentGroup) -> Result<()> {
        self.delete_components_by_id(&[group.internal_id], false)
            .await
            .map(|_| ())
    }

    pub async fn create_group(&self, builder: GroupBuilder) -> Result<ComponentGroup> {
        let expires_at = self.resolve_timeout(builder.timeout)?;
        if builder.reset_timeout_on_use.is_some() && expires_at.is_none() {
            warn!("Using 'reset_timeout_on_use' has no effect when no timeout is set");
        }

        let timeout_handler = builder
            .timeout_handler
            .map(|handler| self.register_timeout_handler(handler));

        let new_group = NewGroup {
            member_ids: builder.member_ids,
            single_use: builder.single_use,
            expires_at,
            reset_timeout_on_use_duration: builder.reset_timeout_on_use,
            timeout_handler: timeout_handler.clone(),
        };

        let group = match self.deps.store.insert_group(new_group).await {
            Ok(group) => group,
            Err(e) => {
                self.unregister(None, timeout_handler.as_ref());
                return Err(e);
            }
        };

        if let Some(expires_at) = group.expires_at {
            self.timeouts.schedule(group.owner(), expires_at).await;
        }

        log_component_operation(
            operations::CREATE_GROUP,
            None,
            Some(group.internal_id),
            "success",
            Some(&format!("{} member(s)", group.member_ids.len())),
        );

        Ok(ComponentGroup {
            internal_id: group.internal_id,
            member_ids: group.member_ids,
            single_use: group.single_use,
            expires_at: group.expires_at,
        })
    }

    /// Suspend until the component is used, its timeout fires, it is deleted, or `timeout`
    /// elapses, whichever comes first
    pub async fn await_component(
        &self,
        component: &Component,
        timeout: Duration,
    ) -> Result<ComponentInteraction> {
        self.await_owner(component.internal_id, timeout).await
    }

    /// Suspend until any member of the group is used
    pub async fn await_group(
        &self,
        group: &ComponentGroup,
        timeout: Duration,
    ) -> Result<ComponentInteraction> {
        self.await_owner(group.internal_id, timeout).await
    }

    async fn await_owner(&self, id: ComponentId, timeout: Duration) -> Result<ComponentInteraction> {
        let deadline = tokio::time::Instant::now() + timeout;
        Ok(self.deps.continuations.await_component(id, deadline).await?)
    }

    pub fn create_rate_limit_reference(
        &self,
        group: impl Into<String>,
        discriminator: impl Into<String>,
    ) -> Result<RateLimitReference> {
        self.rate_limit_references.create(group, discriminator)
    }

    pub fn get_rate_limit_reference(
        &self,
        group: &str,
        discriminator: &str,
    ) -> Option<RateLimitReference> {
        self.rate_limit_references.get(group, discriminator)
    }

    pub fn codec(&self) -> &ComponentIdCodec {
        &self.codec
    }

    pub fn continuations(&self) -> &Arc<ContinuationManager> {
        &self.deps.continuations
    }

    pub fn timeouts(&self) -> &ComponentTimeoutManager {
        &self.timeouts
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitContainer> {
        &self.rate_limits
    }

    pub fn filters(&self) -> &Arc<FilterRegistry> {
        &self.filters
    }

    pub fn store(&self) -> &Arc<dyn ComponentStore> {
        &self.deps.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.deps.clock
    }

    pub fn component_handlers(&self) -> &Arc<EphemeralComponentHandlers> {
        &self.deps.component_handlers
    }

    pub fn timeout_handlers(&self) -> &Arc<EphemeralTimeoutHandlers> {
        &self.deps.timeout_handlers
    }

    pub fn persistent_handlers(&self) -> &Arc<PersistentHandlerRegistry> {
        &self.deps.persistent_handlers
    }

    /// Reset hook for tests: timers, waiters, closures and rate limit references
    pub fn clear(&self) {
        self.timeouts.clear();
        self.deps.continuations.clear();
        self.deps.component_handlers.clear();
        self.deps.timeout_handlers.clear();
        self.rate_limit_references.clear();
    }

    fn resolve_timeout(&self, setting: Option<TimeoutSetting>) -> Result<Option<DateTime<Utc>>> {
        let clock = self.deps.clock.as_ref();
        match setting {
            None => Ok(None),
            Some(TimeoutSetting::At(instant)) => Ok(Some(instant)),
            Some(TimeoutSetting::After(duration)) => after(clock, duration).map(Some),
            Some(TimeoutSetting::Default) => self
                .default_timeout
                .map(|duration| after(clock, duration))
                .transpose(),
        }
    }

    fn register_handler(&self, handler: BoundHandler) -> HandlerDescriptor {
        match handler {
            BoundHandler::Ephemeral(closure) => HandlerDescriptor::Ephemeral {
                key: self.deps.component_handlers.put(closure),
            },
            BoundHandler::Persistent { name, args } => {
                if !self.deps.persistent_handlers.has_component_handler(&name) {
                    warn!(handler = %name, "Persistent component handler is not registered yet");
                }
                HandlerDescriptor::Persistent { name, args }
            }
        }
    }

    fn register_timeout_handler(&self, handler: BoundTimeoutHandler) -> HandlerDescriptor {
        match handler {
            BoundTimeoutHandler::Ephemeral(closure) => HandlerDescriptor::Ephemeral {
                key: self.deps.timeout_handlers.put(closure),
            },
            BoundTimeoutHandler::Persistent { name, args } => {
                if !self.deps.persistent_handlers.has_timeout_handler(&name) {
                    warn!(handler = %name, "Persistent timeout handler is not registered yet");
                }
                HandlerDescriptor::Persistent { name, args }
            }
        }
    }

    fn unregister(
        &self,
        handler: Option<&HandlerDescriptor>,
        timeout_handler: Option<&HandlerDescriptor>,
    ) {
        let ephemeral = |descriptor: Option<&HandlerDescriptor>| -> Option<EphemeralHandlerKey> {
            descriptor.and_then(HandlerDescriptor::ephemeral_key)
        };
        if let Some(key) = ephemeral(handler) {
            self.deps.component_handlers.remove(key);
        }
        if let Some(key) = ephemeral(timeout_handler) {
            self.deps.timeout_handlers.remove(key);
        }
    }
}

fn check_lifetime(lifetime: ComponentLifetime, handler: Option<ComponentLifetime>) -> Result<()> {
    match handler {
        Some(handler) if handler != lifetime => Err(ComponentError::LifetimeMismatch {
            lifetime: lifetime.to_string(),
            handler: handler.to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_lifetime_must_match_component() {
        assert!(check_lifetime(ComponentLifetime::Ephemeral, None).is_ok());
        assert!(check_lifetime(
            ComponentLifetime::Persistent,
            Some(ComponentLifetime::Persistent)
        )
        .is_ok());
        assert!(matches!(
            check_lifetime(
                ComponentLifetime::Persistent,
                Some(ComponentLifetime::Ephemeral)
            ),
            Err(ComponentError::LifetimeMismatch { .. })
        ));
    }
}
