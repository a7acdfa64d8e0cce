use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use super::constraints::InteractionConstraints;
use super::group::GroupRecord;
use super::timeout::{OwnerKind, TimeoutOwner};
use super::ComponentId;
use crate::ratelimit::RateLimitReference;

/// Whether a component survives a process restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentLifetime {
    /// Handler lives in this process's memory only
    Ephemeral,
    /// Handler is a stable name plus serializable arguments
    Persistent,
}

impl fmt::Display for ComponentLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ephemeral => write!(f, "ephemeral"),
            Self::Persistent => write!(f, "persistent"),
        }
    }
}

impl std::str::FromStr for ComponentLifetime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeral" => Ok(Self::Ephemeral),
            "persistent" => Ok(Self::Persistent),
            _ => Err(format!("Invalid component lifetime: {s}")),
        }
    }
}

/// Token under which an in-process closure is stored in an ephemeral registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EphemeralHandlerKey(pub u64);

impl fmt::Display for EphemeralHandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ephemeral#{}", self.0)
    }
}

/// Persisted description of a handler, for interactions and timeouts alike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerDescriptor {
    Ephemeral { key: EphemeralHandlerKey },
    Persistent { name: String, args: Vec<Value> },
}

impl HandlerDescriptor {
    pub fn persistent(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Persistent {
            name: name.into(),
            args,
        }
    }

    pub fn lifetime(&self) -> ComponentLifetime {
        match self {
            Self::Ephemeral { .. } => ComponentLifetime::Ephemeral,
            Self::Persistent { .. } => ComponentLifetime::Persistent,
        }
    }

    pub fn ephemeral_key(&self) -> Option<EphemeralHandlerKey> {
        match self {
            Self::Ephemeral { key } => Some(*key),
            Self::Persistent { .. } => None,
        }
    }

    pub fn handler_name(&self) -> Option<&str> {
        match self {
            Self::Ephemeral { .. } => None,
            Self::Persistent { name, .. } => Some(name),
        }
    }
}

impl fmt::Display for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ephemeral { key } => write!(f, "{key}"),
            Self::Persistent { name, .. } => write!(f, "{name}"),
        }
    }
}

/// A component as persisted by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub internal_id: ComponentId,
    pub lifetime: ComponentLifetime,
    /// Absent when the component only exists to be awaited
    pub handler: Option<HandlerDescriptor>,
    pub timeout_handler: Option<HandlerDescriptor>,
    pub constraints: InteractionConstraints,
    /// Names of the filters run before the handler, in order
    pub filters: Vec<String>,
    pub single_use: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub reset_timeout_on_use_duration: Option<Duration>,
    pub rate_limit: Option<RateLimitReference>,
    /// Snapshot of the owning group, its timeout governs this component
    pub group: Option<GroupRecord>,
    pub created_at: DateTime<Utc>,
}

impl ComponentRecord {
    pub fn owner(&self) -> TimeoutOwner {
        TimeoutOwner::component(self.internal_id)
    }

    pub fn group_id(&self) -> Option<ComponentId> {
        self.group.as_ref().map(|group| group.internal_id)
    }

    /// Expired records must never be treated as usable, fired or not
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let own = self.expires_at.is_some_and(|expires_at| expires_at <= now);
        let group = self.group.as_ref().is_some_and(|group| group.is_expired_at(now));
        own || group
    }

    /// Single use on the component or on its group
    pub fn deletes_on_use(&self) -> bool {
        self.single_use || self.group.as_ref().is_some_and(|group| group.single_use)
    }

    pub fn handler_name(&self) -> Option<&str> {
        self.handler.as_ref().and_then(HandlerDescriptor::handler_name)
    }

    pub fn deleted_entry(&self) -> DeletedEntry {
        DeletedEntry {
            owner: self.owner(),
            ephemeral_handler: self.handler.as_ref().and_then(HandlerDescriptor::ephemeral_key),
            ephemeral_timeout_handler: self
                .timeout_handler
                .as_ref()
                .and_then(HandlerDescriptor::ephemeral_key),
        }
    }
}

/// Handle returned to application code once a component is created
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub internal_id: ComponentId,
    /// Encoded custom identifier to attach to the message component
    pub component_id: String,
    pub lifetime: ComponentLifetime,
    pub single_use: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Style/label data, opaque to the engine
    pub metadata: Option<Value>,
}

/// One row removed by a delete, with the ephemeral registry entries it referenced
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedEntry {
    pub owner: TimeoutOwner,
    pub ephemeral_handler: Option<EphemeralHandlerKey>,
    pub ephemeral_timeout_handler: Option<EphemeralHandlerKey>,
}

impl DeletedEntry {
    pub fn is_group(&self) -> bool {
        self.owner.kind == OwnerKind::Group
    }
}
