use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ComponentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Component,
    Group,
}

/// The component or group a timeout belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeoutOwner {
    pub id: ComponentId,
    pub kind: OwnerKind,
}

impl TimeoutOwner {
    pub fn component(id: ComponentId) -> Self {
        Self {
            id,
            kind: OwnerKind::Component,
        }
    }

    pub fn group(id: ComponentId) -> Self {
        Self {
            id,
            kind: OwnerKind::Group,
        }
    }
}

impl fmt::Display for TimeoutOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OwnerKind::Component => write!(f, "component {}", self.id),
            OwnerKind::Group => write!(f, "group {}", self.id),
        }
    }
}

/// Durable form of a scheduled timeout, re-armed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTimeout {
    pub owner: TimeoutOwner,
    pub fires_at: DateTime<Utc>,
}
