//! # Component Store
//!
//! Durable record of components and groups. The store is the source of truth for
//! everything except ephemeral closures, which stay in the handler registries and are
//! referenced here only by key.
//!
//! ## Guarantees
//!
//! - Components and groups share one id sequence, so an id names exactly one owner
//! - Deleting a grouped component or a group removes the whole group with every member
//! - Group creation validates and links all members atomically
//!
//! ## Backends
//!
//! - [`InMemoryComponentStore`]: process-local tables, used in tests and single-process bots
//! - `PgComponentStore`: Postgres via sqlx, enabled by the `postgres` feature

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;
use crate::models::{
    ComponentId, ComponentLifetime, ComponentRecord, DeletedEntry, GroupRecord,
    HandlerDescriptor, InteractionConstraints, PendingTimeout, TimeoutOwner,
};
use crate::ratelimit::RateLimitReference;

pub use memory::InMemoryComponentStore;
#[cfg(feature = "postgres")]
pub use postgres::PgComponentStore;

/// Component fields supplied by the builder, before an id is assigned
#[derive(Debug, Clone, PartialEq)]
pub struct NewComponent {
    pub lifetime: ComponentLifetime,
    pub handler: Option<HandlerDescriptor>,
    pub timeout_handler: Option<HandlerDescriptor>,
    pub constraints: InteractionConstraints,
    pub filters: Vec<String>,
    pub single_use: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub reset_timeout_on_use_duration: Option<Duration>,
    pub rate_limit: Option<RateLimitReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub member_ids: Vec<ComponentId>,
    pub single_use: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub reset_timeout_on_use_duration: Option<Duration>,
    pub timeout_handler: Option<HandlerDescriptor>,
}

#[async_trait]
pub trait ComponentStore: Send + Sync {
    async fn create_component(&self, component: NewComponent) -> Result<ComponentRecord>;

    /// Component by id, with a snapshot of its group when it has one
    async fn get_component(&self, id: ComponentId) -> Result<Option<ComponentRecord>>;

    async fn get_group(&self, id: ComponentId) -> Result<Option<GroupRecord>>;

    /// Delete components and groups by id, cascading to whole groups.
    ///
    /// Returns every removed row so the caller can release timers and ephemeral handlers.
    /// Unknown ids are ignored.
    async fn delete_components_by_id(&self, ids: &[ComponentId]) -> Result<Vec<DeletedEntry>>;

    /// Push the expiry of a resettable owner to `now + reset duration`.
    ///
    /// `None` when the owner is gone, has no reset duration, or never had an expiry.
    async fn reset_expiration(
        &self,
        owner: TimeoutOwner,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Create a group over existing, ungrouped components without their own timeout
    async fn insert_group(&self, group: NewGroup) -> Result<GroupRecord>;

    /// Remove every ephemeral component and group, returning the number of rows removed
    async fn remove_ephemeral_components(&self) -> Result<u64>;

    /// Expiries of persistent ungrouped components and persistent groups
    async fn get_persistent_component_timeouts(&self) -> Result<Vec<PendingTimeout>>;

    /// Number of stored components, groups excluded
    async fn count_components(&self) -> Result<u64>;
}

/// Lifetime of a group derived from its members and timeout handler
pub(crate) fn group_lifetime(
    member_lifetimes: impl IntoIterator<Item = ComponentLifetime>,
    timeout_handler: Option<&HandlerDescriptor>,
) -> ComponentLifetime {
    let ephemeral_handler = timeout_handler
        .is_some_and(|handler| handler.lifetime() == ComponentLifetime::Ephemeral);
    let ephemeral_member = member_lifetimes
        .into_iter()
        .any(|lifetime| lifetime == ComponentLifetime::Ephemeral);

    if ephemeral_handler || ephemeral_member {
        ComponentLifetime::Ephemeral
    } else {
        ComponentLifetime::Persistent
    }
}

/// `now + duration`, failing instead of overflowing
pub(crate) fn extend(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            crate::error::ComponentError::InvalidTimeout(format!("{duration:?} overflows"))
        })
}
