//! # Postgres Component Store
//!
//! Components and groups in two tables drawing ids from one sequence. Members reference
//! their group with `ON DELETE CASCADE`, so removing a group row removes its members too.
//!
//! Queries are built at runtime; the schema is created by [`PgComponentStore::ensure_schema`]
//! under an advisory lock so concurrent processes can start against an empty database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{group_lifetime, ComponentStore, NewComponent, NewGroup};
use crate::clock::Clock;
use crate::error::{ComponentError, Result};
use crate::models::{
    ComponentId, ComponentLifetime, ComponentRecord, DeletedEntry, GroupRecord,
    HandlerDescriptor, InteractionConstraints, OwnerKind, PendingTimeout, TimeoutOwner,
};
use crate::ratelimit::RateLimitReference;

const SCHEMA_LOCK_KEY: i64 = 0x6263_636f_6d70; // "bccomp"

const SCHEMA: &str = r#"
CREATE SEQUENCE IF NOT EXISTS bc_component_id_seq;

CREATE TABLE IF NOT EXISTS bc_component_group (
    group_id BIGINT PRIMARY KEY DEFAULT nextval('bc_component_id_seq'),
    lifetime TEXT NOT NULL,
    single_use BOOLEAN NOT NULL,
    expires_at TIMESTAMPTZ,
    reset_timeout_ms BIGINT,
    timeout_handler JSONB,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS bc_component (
    component_id BIGINT PRIMARY KEY DEFAULT nextval('bc_component_id_seq'),
    lifetime TEXT NOT NULL,
    handler JSONB,
    timeout_handler JSONB,
    constraints JSONB NOT NULL,
    filters JSONB NOT NULL,
    single_use BOOLEAN NOT NULL,
    expires_at TIMESTAMPTZ,
    reset_timeout_ms BIGINT,
    rate_limit JSONB,
    group_id BIGINT REFERENCES bc_component_group (group_id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS bc_component_group_id_idx ON bc_component (group_id);
CREATE INDEX IF NOT EXISTS bc_component_lifetime_idx ON bc_component (lifetime);
"#;

const COMPONENT_COLUMNS: &str = "component_id, lifetime, handler, timeout_handler, constraints, \
    filters, single_use, expires_at, reset_timeout_ms, rate_limit, group_id, created_at";

const GROUP_SELECT: &str = r#"
SELECT g.group_id, g.lifetime, g.single_use, g.expires_at, g.reset_timeout_ms,
       g.timeout_handler, g.created_at,
       ARRAY(SELECT c.component_id FROM bc_component c
             WHERE c.group_id = g.group_id ORDER BY c.component_id) AS member_ids
FROM bc_component_group g
WHERE g.group_id = $1
"#;

#[derive(Debug, FromRow)]
struct ComponentRow {
    component_id: i64,
    lifetime: String,
    handler: Option<Json<HandlerDescriptor>>,
    timeout_handler: Option<Json<HandlerDescriptor>>,
    constraints: Json<InteractionConstraints>,
    filters: Json<Vec<String>>,
    single_use: bool,
    expires_at: Option<DateTime<Utc>>,
    reset_timeout_ms: Option<i64>,
    rate_limit: Option<Json<RateLimitReference>>,
    group_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl ComponentRow {
    fn into_record(self) -> Result<ComponentRecord> {
        Ok(ComponentRecord {
            internal_id: self.component_id,
            lifetime: parse_lifetime(&self.lifetime)?,
            handler: self.handler.map(|json| json.0),
            timeout_handler: self.timeout_handler.map(|json| json.0),
            constraints: self.constraints.0,
            filters: self.filters.0,
            single_use: self.single_use,
            expires_at: self.expires_at,
            reset_timeout_on_use_duration: from_millis(self.reset_timeout_ms)?,
            rate_limit: self.rate_limit.map(|json| json.0),
            group: None,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct GroupRow {
    group_id: i64,
    lifetime: String,
    single_use: bool,
    expires_at: Option<DateTime<Utc>>,
    reset_timeout_ms: Option<i64>,
    timeout_handler: Option<Json<HandlerDescriptor>>,
    created_at: DateTime<Utc>,
    member_ids: Vec<i64>,
}

impl GroupRow {
    fn into_record(self) -> Result<GroupRecord> {
        Ok(GroupRecord {
            internal_id: self.group_id,
            lifetime: parse_lifetime(&self.lifetime)?,
            single_use: self.single_use,
            expires_at: self.expires_at,
            reset_timeout_on_use_duration: from_millis(self.reset_timeout_ms)?,
            timeout_handler: self.timeout_handler.map(|json| json.0),
            member_ids: self.member_ids,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MemberRow {
    component_id: i64,
    lifetime: String,
    group_id: Option<i64>,
    expires_at: Option<DateTime<Utc>>,
}

fn parse_lifetime(value: &str) -> Result<ComponentLifetime> {
    value.parse().map_err(ComponentError::Store)
}

fn to_millis(duration: Option<Duration>) -> Result<Option<i64>> {
    duration
        .map(|duration| {
            i64::try_from(duration.as_millis())
                .map_err(|_| ComponentError::InvalidTimeout(format!("{duration:?} overflows")))
        })
        .transpose()
}

fn from_millis(millis: Option<i64>) -> Result<Option<Duration>> {
    millis
        .map(|millis| {
            u64::try_from(millis)
                .map(Duration::from_millis)
                .map_err(|_| ComponentError::Store(format!("negative reset timeout {millis}ms")))
        })
        .transpose()
}

#[derive(Debug, Clone)]
pub struct PgComponentStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgComponentStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "🐘 Connected component store to Postgres");
        Ok(Self::new(pool, clock))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the sequence, tables and indexes if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&mut *tx).await?;
        tx.commit().await?;

        debug!("📐 Component schema ready");
        Ok(())
    }

    async fn fetch_group(&self, id: ComponentId) -> Result<Option<GroupRecord>> {
        sqlx::query_as::<_, GroupRow>(GROUP_SELECT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(GroupRow::into_record)
            .transpose()
    }
}

#[async_trait]
impl ComponentStore for PgComponentStore {
    async fn create_component(&self, component: NewComponent) -> Result<ComponentRecord> {
        let sql = format!(
            "INSERT INTO bc_component (lifetime, handler, timeout_handler, constraints, filters, \
             single_use, expires_at, reset_timeout_ms, rate_limit, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {COMPONENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ComponentRow>(&sql)
            .bind(component.lifetime.to_string())
            .bind(component.handler.as_ref().map(Json))
            .bind(component.timeout_handler.as_ref().map(Json))
            .bind(Json(&component.constraints))
            .bind(Json(&component.filters))
            .bind(component.single_use)
            .bind(component.expires_at)
            .bind(to_millis(component.reset_timeout_on_use_duration)?)
            .bind(component.rate_limit.as_ref().map(Json))
            .bind(self.clock.now())
            .fetch_one(&self.pool)
            .await?;

        row.into_record()
    }

    async fn get_component(&self, id: ComponentId) -> Result<Option<ComponentRecord>> {
        let sql = format!("SELECT {COMPONENT_COLUMNS} FROM bc_component WHERE component_id = $1");
        let Some(row) = sqlx::query_as::<_, ComponentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let group_id = row.group_id;
        let mut record = row.into_record()?;
        if let Some(group_id) = group_id {
            record.group = self.fetch_group(group_id).await?;
        }
        Ok(Some(record))
    }

    async fn get_group(&self, id: ComponentId) -> Result<Option<GroupRecord>> {
        self.fetch_group(id).await
    }

    async fn delete_components_by_id(&self, ids: &[ComponentId]) -> Result<Vec<DeletedEntry>> {
        let mut tx = self.pool.begin().await?;

        let group_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT group_id FROM bc_component \
             WHERE component_id = ANY($1) AND group_id IS NOT NULL \
             UNION \
             SELECT group_id FROM bc_component_group WHERE group_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&mut *tx)
        .await?;

        let sql = format!(
            "DELETE FROM bc_component WHERE group_id = ANY($1) OR \
             (component_id = ANY($2) AND group_id IS NULL) RETURNING {COMPONENT_COLUMNS}"
        );
        let components = sqlx::query_as::<_, ComponentRow>(&sql)
            .bind(&group_ids)
            .bind(ids)
            .fetch_all(&mut *tx)
            .await?;

        let groups = sqlx::query_as::<_, GroupRow>(
            "DELETE FROM bc_component_group WHERE group_id = ANY($1) \
             RETURNING group_id, lifetime, single_use, expires_at, reset_timeout_ms, \
             timeout_handler, created_at, '{}'::BIGINT[] AS member_ids",
        )
        .bind(&group_ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut deleted = Vec::with_capacity(components.len() + groups.len());
        for row in components {
            deleted.push(row.into_record()?.deleted_entry());
        }
        for row in groups {
            deleted.push(row.into_record()?.deleted_entry());
        }

        debug!(requested = ids.len(), deleted = deleted.len(), "🗑️ Deleted component rows");
        Ok(deleted)
    }

    async fn reset_expiration(
        &self,
        owner: TimeoutOwner,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let sql = match owner.kind {
            OwnerKind::Component => {
                "UPDATE bc_component \
                 SET expires_at = $2 + reset_timeout_ms * INTERVAL '1 millisecond' \
                 WHERE component_id = $1 AND expires_at IS NOT NULL AND reset_timeout_ms IS NOT NULL \
                 RETURNING expires_at"
            }
            OwnerKind::Group => {
                "UPDATE bc_component_group \
                 SET expires_at = $2 + reset_timeout_ms * INTERVAL '1 millisecond' \
                 WHERE group_id = $1 AND expires_at IS NOT NULL AND reset_timeout_ms IS NOT NULL \
                 RETURNING expires_at"
            }
        };

        let expires_at = sqlx::query_scalar::<_, DateTime<Utc>>(sql)
            .bind(owner.id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(expires_at)
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

        let mut tx = self.pool.begin().await?;

        let members = sqlx::query_as::<_, MemberRow>(
            "SELECT component_id, lifetime, group_id, expires_at FROM bc_component \
             WHERE component_id = ANY($1) FOR UPDATE",
        )
        .bind(&member_ids)
        .fetch_all(&mut *tx)
        .await?;

        let mut lifetimes = Vec::with_capacity(member_ids.len());
        for id in &member_ids {
            let member = members
                .iter()
                .find(|member| member.component_id == *id)
                .ok_or(ComponentError::ComponentNotFound(*id))?;
            if let Some(group_id) = member.group_id {
                return Err(ComponentError::ComponentAlreadyGrouped {
                    component_id: *id,
                    group_id,
                });
            }
            if member.expires_at.is_some() {
                return Err(ComponentError::GroupedComponentTimeout(*id));
            }
            lifetimes.push(parse_lifetime(&member.lifetime)?);
        }

        let lifetime = group_lifetime(lifetimes, group.timeout_handler.as_ref());
        let created_at = self.clock.now();
        let group_id: i64 = sqlx::query_scalar(
            "INSERT INTO bc_component_group \
             (lifetime, single_use, expires_at, reset_timeout_ms, timeout_handler, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING group_id",
        )
        .bind(lifetime.to_string())
        .bind(group.single_use)
        .bind(group.expires_at)
        .bind(to_millis(group.reset_timeout_on_use_duration)?)
        .bind(group.timeout_handler.as_ref().map(Json))
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE bc_component SET group_id = $1 WHERE component_id = ANY($2)")
            .bind(group_id)
            .bind(&member_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(GroupRecord {
            internal_id: group_id,
            lifetime,
            single_use: group.single_use,
            expires_at: group.expires_at,
            reset_timeout_on_use_duration: group.reset_timeout_on_use_duration,
            timeout_handler: group.timeout_handler,
            member_ids,
            created_at,
        })
    }

    async fn remove_ephemeral_components(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let components = sqlx::query(
            "DELETE FROM bc_component WHERE lifetime = 'ephemeral' OR group_id IN \
             (SELECT group_id FROM bc_component_group WHERE lifetime = 'ephemeral')",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let groups = sqlx::query("DELETE FROM bc_component_group WHERE lifetime = 'ephemeral'")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(components + groups)
    }

    async fn get_persistent_component_timeouts(&self) -> Result<Vec<PendingTimeout>> {
        let rows = sqlx::query_as::<_, (i64, bool, DateTime<Utc>)>(
            "SELECT component_id, FALSE, expires_at FROM bc_component \
             WHERE lifetime = 'persistent' AND group_id IS NULL AND expires_at IS NOT NULL \
             UNION ALL \
             SELECT group_id, TRUE, expires_at FROM bc_component_group \
             WHERE lifetime = 'persistent' AND expires_at IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, is_group, fires_at)| PendingTimeout {
                owner: if is_group {
                    TimeoutOwner::group(id)
                } else {
                    TimeoutOwner::component(id)
                },
                fires_at,
            })
            .collect())
    }

    async fn count_components(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bc_component")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_duration_roundtrips_through_millis() {
        let stored = to_millis(Some(Duration::from_millis(1500))).unwrap();
        assert_eq!(stored, Some(1500));
        assert_eq!(
            from_millis(stored).unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert!(from_millis(Some(-1)).is_err());
    }

    #[test]
    fn test_lifetime_column_parsing() {
        assert_eq!(
            parse_lifetime("persistent").unwrap(),
            ComponentLifetime::Persistent
        );
        assert!(matches!(
            parse_lifetime("forever"),
            Err(ComponentError::Store(_))
        ));
    }
}
