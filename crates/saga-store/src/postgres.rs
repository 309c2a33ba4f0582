use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Commit, CorrelationId, InstanceQuery, OutboxMessage, OutboxMessageId, Result, SagaRecord,
    ScheduledTimeout, StoreError, TimeoutChange, TimeoutToken, Version,
    store::{SagaStore, TimeoutScheduler, validate_commit},
};

const INSTANCE_COLUMNS: &str = "correlation_id, saga_type, state, data, failure_reason, \
     pending_timeout, milestones, started_at, updated_at, version";

/// PostgreSQL-backed saga store and timeout scheduler.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        let milestones_json: serde_json::Value = row.try_get("milestones")?;
        let milestones: BTreeMap<String, DateTime<Utc>> = serde_json::from_value(milestones_json)?;

        Ok(SagaRecord {
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            saga_type: row.try_get("saga_type")?,
            state: row.try_get("state")?,
            data: row.try_get("data")?,
            failure_reason: row.try_get("failure_reason")?,
            pending_timeout: row
                .try_get::<Option<Uuid>, _>("pending_timeout")?
                .map(TimeoutToken::from_uuid),
            milestones,
            started_at: row.try_get("started_at")?,
            updated_at: row.try_get("updated_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxMessage> {
        Ok(OutboxMessage {
            id: OutboxMessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            saga_type: row.try_get("saga_type")?,
            message_type: row.try_get("message_type")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_timeout(row: PgRow) -> Result<ScheduledTimeout> {
        Ok(ScheduledTimeout {
            token: TimeoutToken::from_uuid(row.try_get::<Uuid, _>("token")?),
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            saga_type: row.try_get("saga_type")?,
            due_at: row.try_get("due_at")?,
            payload: row.try_get("payload")?,
        })
    }

    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        correlation_id: CorrelationId,
    ) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM saga_instances WHERE correlation_id = $1")
                .bind(correlation_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;
        Ok(version.map(Version::new).unwrap_or(Version::initial()))
    }

    async fn write_record(
        tx: &mut Transaction<'_, Postgres>,
        commit: &Commit,
    ) -> Result<u64> {
        let record = &commit.record;
        let milestones = serde_json::to_value(&record.milestones)?;

        let result = if commit.is_insert() {
            sqlx::query(
                r#"
                INSERT INTO saga_instances (correlation_id, saga_type, state, data, failure_reason,
                    pending_timeout, milestones, started_at, updated_at, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (correlation_id) DO NOTHING
                "#,
            )
            .bind(record.correlation_id.as_uuid())
            .bind(&record.saga_type)
            .bind(&record.state)
            .bind(&record.data)
            .bind(&record.failure_reason)
            .bind(record.pending_timeout.map(|t| t.as_uuid()))
            .bind(milestones)
            .bind(record.started_at)
            .bind(record.updated_at)
            .bind(record.version.as_i64())
            .execute(&mut **tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE saga_instances
                SET state = $2, data = $3, failure_reason = $4, pending_timeout = $5,
                    milestones = $6, updated_at = $7, version = $8
                WHERE correlation_id = $1 AND version = $9
                "#,
            )
            .bind(record.correlation_id.as_uuid())
            .bind(&record.state)
            .bind(&record.data)
            .bind(&record.failure_reason)
            .bind(record.pending_timeout.map(|t| t.as_uuid()))
            .bind(milestones)
            .bind(record.updated_at)
            .bind(record.version.as_i64())
            .bind(commit.expected_version.as_i64())
            .execute(&mut **tx)
            .await?
        };

        Ok(result.rows_affected())
    }

    async fn insert_timeout<'e, E>(executor: E, timeout: &ScheduledTimeout) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO saga_timeouts (token, correlation_id, saga_type, due_at, payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token) DO NOTHING
            "#,
        )
        .bind(timeout.token.as_uuid())
        .bind(timeout.correlation_id.as_uuid())
        .bind(&timeout.saga_type)
        .bind(timeout.due_at)
        .bind(&timeout.payload)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn load(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM saga_instances WHERE correlation_id = $1"
        ))
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    #[tracing::instrument(skip(self, commit), fields(correlation_id = %commit.correlation_id()))]
    async fn commit(&self, commit: Commit) -> Result<Version> {
        validate_commit(&commit)?;

        let correlation_id = commit.correlation_id();
        let mut tx = self.pool.begin().await?;

        if Self::write_record(&mut tx, &commit).await? == 0 {
            let actual = Self::current_version(&mut tx, correlation_id).await?;
            // Dropping the transaction rolls it back.
            return Err(StoreError::ConcurrencyConflict {
                correlation_id,
                expected: commit.expected_version,
                actual,
            });
        }

        for message in &commit.outbox {
            sqlx::query(
                r#"
                INSERT INTO saga_outbox (id, correlation_id, saga_type, message_type, payload, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(message.id.as_uuid())
            .bind(message.correlation_id.as_uuid())
            .bind(&message.saga_type)
            .bind(&message.message_type)
            .bind(&message.payload)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for change in &commit.timeouts {
            match change {
                TimeoutChange::Schedule(timeout) => {
                    Self::insert_timeout(&mut *tx, timeout).await?;
                }
                TimeoutChange::Cancel(token) => {
                    sqlx::query("DELETE FROM saga_timeouts WHERE token = $1")
                        .bind(token.as_uuid())
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(commit.record.version)
    }

    async fn query_instances(&self, query: InstanceQuery) -> Result<Vec<SagaRecord>> {
        let mut sql = format!("SELECT {INSTANCE_COLUMNS} FROM saga_instances WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.saga_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND saga_type = ${param_count}"));
        }
        if query.states.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND state = ANY(${param_count})"));
        }
        if query.updated_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND updated_at < ${param_count}"));
        }

        sql.push_str(" ORDER BY updated_at ASC, correlation_id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(saga_type) = query.saga_type {
            sqlx_query = sqlx_query.bind(saga_type);
        }
        if let Some(states) = query.states {
            sqlx_query = sqlx_query.bind(states);
        }
        if let Some(before) = query.updated_before {
            sqlx_query = sqlx_query.bind(before);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, correlation_id, saga_type, message_type, payload, created_at
            FROM saga_outbox
            WHERE dispatched_at IS NULL
            ORDER BY sequence ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_dispatched(&self, id: OutboxMessageId) -> Result<()> {
        sqlx::query(
            "UPDATE saga_outbox SET dispatched_at = NOW() WHERE id = $1 AND dispatched_at IS NULL",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn prune_dispatched(&self, dispatched_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM saga_outbox WHERE dispatched_at IS NOT NULL AND dispatched_at < $1",
        )
        .bind(dispatched_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TimeoutScheduler for PostgresSagaStore {
    async fn schedule(&self, timeout: ScheduledTimeout) -> Result<TimeoutToken> {
        Self::insert_timeout(&self.pool, &timeout).await?;
        Ok(timeout.token)
    }

    async fn unschedule(&self, token: TimeoutToken) -> Result<bool> {
        let result = sqlx::query("DELETE FROM saga_timeouts WHERE token = $1")
            .bind(token.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledTimeout>> {
        let rows = sqlx::query(
            r#"
            SELECT token, correlation_id, saga_type, due_at, payload
            FROM saga_timeouts
            WHERE due_at <= $1
            ORDER BY due_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_timeout).collect()
    }

    async fn acknowledge(&self, token: TimeoutToken) -> Result<()> {
        self.unschedule(token).await?;
        Ok(())
    }
}
