use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::constraints::Permissions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Button,
    StringSelect,
    EntitySelect,
}

/// Interaction event delivered by the transport when a user operates a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInteraction {
    pub interaction_id: u64,
    /// Custom identifier attached to the component, possibly foreign
    pub component_id: String,
    pub kind: ComponentKind,
    pub user_id: u64,
    pub guild_id: Option<u64>,
    pub channel_id: Option<u64>,
    pub member_roles: Vec<u64>,
    pub member_permissions: Permissions,
    /// Selected values for select menus, empty for buttons
    pub values: Vec<String>,
    pub received_at: DateTime<Utc>,
}

impl ComponentInteraction {
    /// Button press from a user outside any guild
    pub fn button(component_id: impl Into<String>, user_id: u64) -> Self {
        Self {
            interaction_id: 0,
            component_id: component_id.into(),
            kind: ComponentKind::Button,
            user_id,
            guild_id: None,
            channel_id: None,
            member_roles: Vec::new(),
            member_permissions: Permissions::NONE,
            values: Vec::new(),
            received_at: Utc::now(),
        }
    }

    pub fn string_select(
        component_id: impl Into<String>,
        user_id: u64,
        values: Vec<String>,
    ) -> Self {
        Self {
            kind: ComponentKind::StringSelect,
            values,
            ..Self::button(component_id, user_id)
        }
    }
}
