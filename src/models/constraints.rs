use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::interaction::ComponentInteraction;

/// Permission bit set, as delivered with the invoking member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions(pub u64);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self::Output {
        Permissions(self.0 | rhs.0)
    }
}

/// Restricts who may use a component
///
/// Empty constraints allow everyone. Otherwise an interaction is allowed when the user is
/// listed, holds one of the listed roles, or holds every listed permission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionConstraints {
    #[serde(default)]
    pub allowed_users: BTreeSet<u64>,
    #[serde(default)]
    pub allowed_roles: BTreeSet<u64>,
    #[serde(default)]
    pub allowed_permissions: Permissions,
}

impl InteractionConstraints {
    pub fn of_users(users: impl IntoIterator<Item = u64>) -> Self {
        Self {
            allowed_users: users.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn add_users(mut self, users: impl IntoIterator<Item = u64>) -> Self {
        self.allowed_users.extend(users);
        self
    }

    pub fn add_roles(mut self, roles: impl IntoIterator<Item = u64>) -> Self {
        self.allowed_roles.extend(roles);
        self
    }

    pub fn add_permissions(mut self, permissions: Permissions) -> Self {
        self.allowed_permissions = self.allowed_permissions | permissions;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.allowed_users.is_empty()
            && self.allowed_roles.is_empty()
            && self.allowed_permissions.is_empty()
    }

    pub fn is_allowed(&self, interaction: &ComponentInteraction) -> bool {
        if self.is_empty() || self.allowed_users.contains(&interaction.user_id) {
            return true;
        }

        // Roles and permissions only exist for members of a guild
        if interaction.guild_id.is_none() {
            return false;
        }

        let has_role = interaction
            .member_roles
            .iter()
            .any(|role| self.allowed_roles.contains(role));
        let has_permissions = !self.allowed_permissions.is_empty()
            && interaction
                .member_permissions
                .contains(self.allowed_permissions);

        has_role || has_permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user_id: u64, roles: Vec<u64>, permissions: u64) -> ComponentInteraction {
        let mut interaction = ComponentInteraction::button("any", user_id);
        interaction.guild_id = Some(1);
        interaction.member_roles = roles;
        interaction.member_permissions = Permissions(permissions);
        interaction
    }

    #[test]
    fn test_empty_constraints_allow_everyone() {
        let constraints = InteractionConstraints::default();
        assert!(constraints.is_allowed(&ComponentInteraction::button("any", 7)));
    }

    #[test]
    fn test_user_role_and_permission_paths() {
        let constraints = InteractionConstraints::of_users([10])
            .add_roles([500])
            .add_permissions(Permissions(0b110));

        assert!(constraints.is_allowed(&member(10, vec![], 0)));
        assert!(constraints.is_allowed(&member(11, vec![500], 0)));
        assert!(constraints.is_allowed(&member(12, vec![], 0b111)));
        assert!(!constraints.is_allowed(&member(13, vec![501], 0b010)));
    }

    #[test]
    fn test_roles_ignored_outside_guilds() {
        let constraints = InteractionConstraints::default().add_roles([500]);
        let mut interaction = member(11, vec![500], 0);
        interaction.guild_id = None;
        assert!(!constraints.is_allowed(&interaction));
    }
}
