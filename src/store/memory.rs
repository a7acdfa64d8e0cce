//! # In-Memory Component Store
//!
//! Process-local tables behind a single lock. Every operation is atomic with respect to
//! the others, which is all the lifecycle layer asks of a store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{extend, group_lifetime, ComponentStore, NewComponent, NewGroup};
use crate::clock::{Clock, SystemClock};
use crate::error::{ComponentError, Result};
use crate::models::{
    ComponentId, ComponentLifetime, ComponentRecord, DeletedEntry, GroupRecord, OwnerKind,
    PendingTimeout, TimeoutOwner,
};

#[derive(Debug)]
struct StoredComponent {
    /// Always stored without its group snapshot
    record: ComponentRecord,
    group_id: Option<ComponentId>,
}

#[derive(Debug, Default)]
struct Tables {
    components: BTreeMap<ComponentId, StoredComponent>,
    groups: BTreeMap<ComponentId, GroupRecord>,
}

impl Tables {
    fn with_group(&self, stored: &StoredComponent) -> ComponentRecord {
        let mut record = stored.record.clone();
        record.group = stored
            .group_id
            .and_then(|group_id| self.groups.get(&group_id).cloned());
        record
    }

    fn remove_group(&mut self, group_id: ComponentId, deleted: &mut Vec<DeletedEntry>) {
        let Some(group) = self.groups.remove(&group_id) else {
            return;
        };
        for member_id in &group.member_ids {
            if let Some(member) = self.components.remove(member_id) {
                deleted.push(member.record.deleted_entry());
            }
        }
        deleted.push(group.deleted_entry());
    }
}

#[derive(Debug)]
pub struct InMemoryComponentStore {
    tables: Mutex<Tables>,
    next_id: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl InMemoryComponentStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_id: AtomicI64::new(1),
            clock,
        }
    }

    fn next_id(&self) -> ComponentId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Reset hook for tests
    pub fn clear(&self) {
        let mut tables = self.tables.lock();
        tables.components.clear();
        tables.groups.clear();
    }
}

impl Default for InMemoryComponentStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl ComponentStore for InMemoryComponentStore {
    async fn create_component(&self, component: NewComponent) -> Result<ComponentRecord> {
        let record = ComponentRecord {
            internal_id: self.next_id(),
            lifetime: component.lifetime,
            handler: component.handler,
            timeout_handler: component.timeout_handler,
            constraints: component.constraints,
            filters: component.filters,
            single_use: component.single_use,
            expires_at: component.expires_at,
            reset_timeout_on_use_duration: component.reset_timeout_on_use_duration,
            rate_limit: component.rate_limit,
            group: None,
            created_at: self.clock.now(),
        };

        self.tables.lock().components.insert(
            record.internal_id,
            StoredComponent {
                record: record.clone(),
                group_id: None,
            },
        );
        Ok(record)
    }

    async fn get_component(&self, id: ComponentId) -> Result<Option<ComponentRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .components
            .get(&id)
            .map(|stored| tables.with_group(stored)))
    }

    async fn get_group(&self, id: ComponentId) -> Result<Option<GroupRecord>> {
        Ok(self.tables.lock().groups.get(&id).cloned())
    }

    async fn delete_components_by_id(&self, ids: &[ComponentId]) -> Result<Vec<DeletedEntry>> {
        let mut tables = self.tables.lock();

        let mut group_ids = BTreeSet::new();
        let mut component_ids = BTreeSet::new();
        for id in ids {
            if let Some(stored) = tables.components.get(id) {
                match stored.group_id {
                    Some(group_id) => group_ids.insert(group_id),
                    None => component_ids.insert(*id),
                };
            } else if tables.groups.contains_key(id) {
                group_ids.insert(*id);
            }
        }

        let mut deleted = Vec::new();
        for group_id in group_ids {
            tables.remove_group(group_id, &mut deleted);
        }
        for component_id in component_ids {
            if let Some(stored) = tables.components.remove(&component_id) {
                deleted.push(stored.record.deleted_entry());
            }
        }

        debug!(requested = ids.len(), deleted = deleted.len(), "🗑️ Deleted component rows");
        Ok(deleted)
    }

    async fn reset_expiration(
        &self,
        owner: TimeoutOwner,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut tables = self.tables.lock();
        let (expires_at, reset) = match owner.kind {
            OwnerKind::Component => match tables.components.get_mut(&owner.id) {
                Some(stored) => (
                    &mut stored.record.expires_at,
                    stored.record.reset_timeout_on_use_duration,
                ),
                None => return Ok(None),
            },
            OwnerKind::Group => match tables.groups.get_mut(&owner.id) {
                Some(group) => (&mut group.expires_at, group.reset_timeout_on_use_duration),
                None => return Ok(None),
            },
        };

        match (expires_at.as_mut(), reset) {
            (Some(expires_at), Some(reset)) => {
                *expires_at = extend(now, reset)?;
                Ok(Some(*expires_at))
            }
            _ => Ok(None),
        }
    }

    async fn insert_group(&self, group: NewGroup) -> Result<GroupRecord> {
        let mut member_ids = Vec::with_capacity(group.member_ids.len());
        for id in group.member_ids {
            if !member_ids.contains(&id) {
                member_ids.push(id);
            }
        }
        if member_ids.is_empty() {
            return Err(ComponentError::EmptyGroup);
        }

        let mut tables = self.tables.lock();
        let mut lifetimes = Vec::with_capacity(member_ids.len());
        for id in &member_ids {
            let stored = tables
                .components
                .get(id)
                .ok_or(ComponentError::ComponentNotFound(*id))?;
            if let Some(group_id) = stored.group_id {
                return Err(ComponentError::ComponentAlreadyGrouped {
                    component_id: *id,
                    group_id,
                });
            }
            if stored.record.expires_at.is_some() {
                return Err(ComponentError::GroupedComponentTimeout(*id));
            }
            lifetimes.push(stored.record.lifetime);
        }

        let record = GroupRecord {
            internal_id: self.next_id(),
            lifetime: group_lifetime(lifetimes, group.timeout_handler.as_ref()),
            single_use: group.single_use,
            expires_at: group.expires_at,
            reset_timeout_on_use_duration: group.reset_timeout_on_use_duration,
            timeout_handler: group.timeout_handler,
            member_ids,
            created_at: self.clock.now(),
        };

        for id in &record.member_ids {
            if let Some(stored) = tables.components.get_mut(id) {
                stored.group_id = Some(record.internal_id);
            }
        }
        tables.groups.insert(record.internal_id, record.clone());
        Ok(record)
    }

    async fn remove_ephemeral_components(&self) -> Result<u64> {
        let mut tables = self.tables.lock();
        let mut deleted = Vec::new();

        let ephemeral_groups: Vec<ComponentId> = tables
            .groups
            .values()
            .filter(|group| group.lifetime == ComponentLifetime::Ephemeral)
            .map(|group| group.internal_id)
            .collect();
        for group_id in ephemeral_groups {
            tables.remove_group(group_id, &mut deleted);
        }

        let before = tables.components.len();
        tables
            .components
            .retain(|_, stored| stored.record.lifetime != ComponentLifetime::Ephemeral);

        Ok((deleted.len() + before - tables.components.len()) as u64)
    }

    async fn get_persistent_component_timeouts(&self) -> Result<Vec<PendingTimeout>> {
        let tables = self.tables.lock();

        let components = tables.components.values().filter_map(|stored| {
            let record = &stored.record;
            let persistent = record.lifetime == ComponentLifetime::Persistent;
            match (persistent, stored.group_id, record.expires_at) {
                (true, None, Some(fires_at)) => Some(PendingTimeout {
                    owner: record.owner(),
                    fires_at,
                }),
                _ => None,
            }
        });
        let groups = tables.groups.values().filter_map(|group| {
            let persistent = group.lifetime == ComponentLifetime::Persistent;
            match (persistent, group.expires_at) {
                (true, Some(fires_at)) => Some(PendingTimeout {
                    owner: group.owner(),
                    fires_at,
                }),
                _ => None,
            }
        });

        Ok(components.chain(groups).collect())
    }

    async fn count_components(&self) -> Result<u64> {
        Ok(self.tables.lock().components.len() as u64)
    }
}
