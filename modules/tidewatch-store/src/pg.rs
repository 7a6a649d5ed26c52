//! Postgres-backed [`TrackerStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use tidewatch_common::{
    Destination, FilterSettings, NotificationRecord, Platform, SessionState, SessionStats, Target,
    TrackedResource,
};

use crate::error::{Result, StoreError};
use crate::store::TrackerStore;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// --- Rows ---

#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: Uuid,
    platform: String,
    external_id: String,
    display_name: Option<String>,
    cursor: Option<i64>,
    not_found_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ResourceRow> for TrackedResource {
    type Error = StoreError;

    fn try_from(row: ResourceRow) -> Result<Self> {
        let platform: Platform = row
            .platform
            .parse()
            .map_err(|e| StoreError::Decode(format!("tracked_resources {}: {e}", row.id)))?;
        Ok(TrackedResource {
            id: row.id,
            platform,
            external_id: row.external_id,
            display_name: row.display_name,
            cursor: row.cursor,
            not_found_at: row.not_found_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TargetRow {
    id: Uuid,
    resource_id: Uuid,
    guild_id: Option<i64>,
    channel_id: i64,
    filters: Json<FilterSettings>,
    enabled: bool,
    last_mention_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<TargetRow> for Target {
    fn from(row: TargetRow) -> Self {
        Target {
            id: row.id,
            resource_id: row.resource_id,
            destination: Destination {
                guild_id: row.guild_id,
                channel_id: row.channel_id,
            },
            filters: row.filters.0,
            enabled: row.enabled,
            last_mention_at: row.last_mention_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    target_id: Uuid,
    resource_id: Uuid,
    session_id: String,
    message_id: i64,
    state: String,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for NotificationRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self> {
        let state = SessionState::parse(&row.state).ok_or_else(|| {
            StoreError::Decode(format!("notification_records {}: state {:?}", row.id, row.state))
        })?;
        Ok(NotificationRecord {
            id: row.id,
            target_id: row.target_id,
            resource_id: row.resource_id,
            session_id: row.session_id,
            message_id: row.message_id,
            state,
            deleted: row.deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    resource_id: Uuid,
    session_id: String,
    started_at: DateTime<Utc>,
    peak_viewers: i64,
    average_viewers: i64,
    ticks: i64,
    last_title: String,
    last_category: Option<String>,
}

impl From<StatsRow> for SessionStats {
    fn from(row: StatsRow) -> Self {
        SessionStats {
            resource_id: row.resource_id,
            session_id: row.session_id,
            started_at: row.started_at,
            peak_viewers: row.peak_viewers,
            average_viewers: row.average_viewers,
            ticks: row.ticks,
            last_title: row.last_title,
            last_category: row.last_category,
        }
    }
}

fn resources(rows: Vec<ResourceRow>) -> Result<Vec<TrackedResource>> {
    rows.into_iter().map(TrackedResource::try_from).collect()
}

#[async_trait]
impl TrackerStore for PgStore {
    async fn list_resources(&self, platform: Platform) -> Result<Vec<TrackedResource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT * FROM tracked_resources
            WHERE platform = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(platform.as_str())
        .fetch_all(&self.pool)
        .await?;

        resources(rows)
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<TrackedResource>> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM tracked_resources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TrackedResource::try_from).transpose()
    }

    async fn find_resource(&self, platform: Platform, external_id: &str) -> Result<Option<TrackedResource>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM tracked_resources WHERE platform = $1 AND external_id = $2",
        )
        .bind(platform.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TrackedResource::try_from).transpose()
    }

    async fn track(&self, platform: Platform, external_id: &str) -> Result<TrackedResource> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, ResourceRow>(
            r#"
            INSERT INTO tracked_resources (id, platform, external_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (platform, external_id)
            DO UPDATE SET platform = EXCLUDED.platform
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(platform.as_str())
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tracked_resources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_flagged(&self) -> Result<Vec<TrackedResource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT * FROM tracked_resources
            WHERE not_found_at IS NOT NULL
            ORDER BY not_found_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        resources(rows)
    }

    async fn flag_not_found(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE tracked_resources SET not_found_at = COALESCE(not_found_at, $2) WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_not_found(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tracked_resources SET not_found_at = NULL WHERE id = $1 AND not_found_at IS NOT NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_display_name(&self, id: Uuid, name: &str) -> Result<()> {
        sqlx::query("UPDATE tracked_resources SET display_name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn advance_cursor(&self, id: Uuid, value: i64) -> Result<i64> {
        // GREATEST makes the write monotonic even against a concurrent writer.
        let cursor = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE tracked_resources
            SET cursor = GREATEST(COALESCE(cursor, $2), $2)
            WHERE id = $1
            RETURNING cursor
            "#,
        )
        .bind(id)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        cursor.ok_or_else(|| StoreError::Decode(format!("tracked_resources {id}: missing")))
    }

    async fn mark_seen(&self, resource_id: Uuid, item_id: &str) -> Result<bool> {
        let inserted = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO seen_items (resource_id, item_id)
            VALUES ($1, $2)
            ON CONFLICT (resource_id, item_id) DO NOTHING
            RETURNING item_id
            "#,
        )
        .bind(resource_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted.is_some())
    }

    async fn is_seen(&self, resource_id: Uuid, item_id: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (SELECT 1 FROM seen_items WHERE resource_id = $1 AND item_id = $2)
            "#,
        )
        .bind(resource_id)
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(found)
    }

    async fn list_targets(&self, resource_id: Uuid) -> Result<Vec<Target>> {
        let rows = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT * FROM targets
            WHERE resource_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Target::from).collect())
    }

    async fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
        let row = sqlx::query_as::<_, TargetRow>("SELECT * FROM targets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Target::from))
    }

    async fn add_target(&self, target: &Target) -> Result<Target> {
        let row = sqlx::query_as::<_, TargetRow>(
            r#"
            INSERT INTO targets (id, resource_id, guild_id, channel_id, filters, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, true, $6)
            ON CONFLICT (resource_id, channel_id)
            DO UPDATE SET filters = EXCLUDED.filters, guild_id = EXCLUDED.guild_id, enabled = true
            RETURNING *
            "#,
        )
        .bind(target.id)
        .bind(target.resource_id)
        .bind(target.destination.guild_id)
        .bind(target.destination.channel_id)
        .bind(Json(&target.filters))
        .bind(target.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn remove_target(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM targets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_target_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE targets SET enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn touch_mention(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE targets SET last_mention_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn active_records(&self, resource_id: Uuid) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT * FROM notification_records
            WHERE resource_id = $1 AND state = 'live' AND NOT deleted
            ORDER BY created_at ASC
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationRecord::try_from).collect()
    }

    async fn find_record(&self, target_id: Uuid, session_id: &str) -> Result<Option<NotificationRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT * FROM notification_records WHERE target_id = $1 AND session_id = $2",
        )
        .bind(target_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NotificationRecord::try_from).transpose()
    }

    async fn insert_record(&self, record: &NotificationRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_records
                (id, target_id, resource_id, session_id, message_id, state, deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (target_id, session_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.target_id)
        .bind(record.resource_id)
        .bind(&record.session_id)
        .bind(record.message_id)
        .bind(record.state.as_str())
        .bind(record.deleted)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_record_state(&self, id: Uuid, state: SessionState) -> Result<()> {
        sqlx::query("UPDATE notification_records SET state = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_record_deleted(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE notification_records SET deleted = true, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn session_stats(&self, resource_id: Uuid) -> Result<Option<SessionStats>> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT resource_id, session_id, started_at, peak_viewers, average_viewers,
                   ticks, last_title, last_category
            FROM session_stats
            WHERE resource_id = $1
            "#,
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SessionStats::from))
    }

    async fn save_session_stats(&self, stats: &SessionStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_stats
                (resource_id, session_id, started_at, peak_viewers, average_viewers,
                 ticks, last_title, last_category, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
            ON CONFLICT (resource_id) DO UPDATE SET
                session_id = EXCLUDED.session_id,
                started_at = EXCLUDED.started_at,
                peak_viewers = EXCLUDED.peak_viewers,
                average_viewers = EXCLUDED.average_viewers,
                ticks = EXCLUDED.ticks,
                last_title = EXCLUDED.last_title,
                last_category = EXCLUDED.last_category,
                updated_at = now()
            "#,
        )
        .bind(stats.resource_id)
        .bind(&stats.session_id)
        .bind(stats.started_at)
        .bind(stats.peak_viewers)
        .bind(stats.average_viewers)
        .bind(stats.ticks)
        .bind(&stats.last_title)
        .bind(&stats.last_category)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_session_stats(&self, resource_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM session_stats WHERE resource_id = $1")
            .bind(resource_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
