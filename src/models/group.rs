use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::component::{ComponentLifetime, DeletedEntry, HandlerDescriptor};
use super::timeout::TimeoutOwner;
use super::ComponentId;

/// A set of components sharing one timeout and single-use lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub internal_id: ComponentId,
    /// Ephemeral as soon as a member or the timeout handler is ephemeral
    pub lifetime: ComponentLifetime,
    pub single_use: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub reset_timeout_on_use_duration: Option<Duration>,
    pub timeout_handler: Option<HandlerDescriptor>,
    pub member_ids: Vec<ComponentId>,
    pub created_at: DateTime<Utc>,
}

impl GroupRecord {
    pub fn owner(&self) -> TimeoutOwner {
        TimeoutOwner::group(self.internal_id)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn deleted_entry(&self) -> DeletedEntry {
        DeletedEntry {
            owner: self.owner(),
            ephemeral_handler: None,
            ephemeral_timeout_handler: self
                .timeout_handler
                .as_ref()
                .and_then(HandlerDescriptor::ephemeral_key),
        }
    }
}

/// Handle returned to application code once a group is created
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentGroup {
    pub internal_id: ComponentId,
    pub member_ids: Vec<ComponentId>,
    pub single_use: bool,
    pub expires_at: Option<DateTime<Utc>>,
}
