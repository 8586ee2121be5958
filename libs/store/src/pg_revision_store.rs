//! PostgreSQL-backed `RevisionStore`.
//!
//! An explicit `#[derive(sqlx::FromRow)]` row type, `TryFrom<Row>` into the
//! domain type, and every mutating query wrapped in a transaction so the
//! structured `steps` column and the `source` text column never drift
//! apart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

use conductor_domain::{
    Step, WorkflowId, WorkflowRevision, WorkflowRevisionId, WorkflowRevisionWithSource,
    WorkflowSummary,
};

use crate::pagination::{Page, Pagination};
use crate::revision_store::{RevisionStore, RevisionStoreError};

pub struct PgRevisionStore {
    pool: PgPool,
}

impl PgRevisionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Called after a conditional `UPDATE ... WHERE updated_at = $expected`
    /// affected zero rows, to tell a missing row apart from a row that lost
    /// the race: locks the row `FOR UPDATE` so the distinguishing read
    /// can't itself race a concurrent writer.
    async fn lock_conflict_error(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: &WorkflowRevisionId,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<RevisionStoreError, RevisionStoreError> {
        let current_updated_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT updated_at FROM workflow_revisions WHERE namespace = $1 AND workflow_id = $2 AND version = $3 FOR UPDATE",
        )
        .bind(id.workflow_id().namespace())
        .bind(id.workflow_id().id())
        .bind(id.version() as i32)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(match current_updated_at {
            None => RevisionStoreError::NotFound(id.clone()),
            Some(actual) => RevisionStoreError::OptimisticLock {
                expected: expected_updated_at,
                actual,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct RevisionRow {
    namespace: String,
    workflow_id: String,
    version: i32,
    name: String,
    description: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    steps: Value,
    source: String,
}

impl TryFrom<RevisionRow> for WorkflowRevisionWithSource {
    type Error = sqlx::Error;

    fn try_from(row: RevisionRow) -> Result<Self, Self::Error> {
        let workflow_id = WorkflowId::new(row.namespace, row.workflow_id)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let steps: Step =
            serde_json::from_value(row.steps).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Self {
            revision: WorkflowRevision {
                workflow_id,
                version: row.version as u32,
                name: row.name,
                description: row.description,
                active: row.active,
                created_at: row.created_at,
                updated_at: row.updated_at,
                steps,
            },
            source: row.source,
        })
    }
}

#[async_trait]
impl RevisionStore for PgRevisionStore {
    async fn save_with_source(
        &self,
        revision: WorkflowRevision,
        source: String,
    ) -> Result<(), RevisionStoreError> {
        let steps_json = serde_json::to_value(&revision.steps)
            .expect("Step serializes without error");
        let result = sqlx::query(
            r"
            INSERT INTO workflow_revisions
                (namespace, workflow_id, version, name, description, active,
                 created_at, updated_at, steps, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(revision.workflow_id.namespace())
        .bind(revision.workflow_id.id())
        .bind(revision.version as i32)
        .bind(&revision.name)
        .bind(&revision.description)
        .bind(revision.active)
        .bind(revision.created_at)
        .bind(revision.updated_at)
        .bind(&steps_json)
        .bind(&source)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(db_err) = e.as_database_error() {
                    if db_err.is_unique_violation() {
                        return Err(RevisionStoreError::AlreadyExists(
                            revision.workflow_id.revision(revision.version),
                        ));
                    }
                }
                Err(RevisionStoreError::Database(e))
            }
        }
    }

    async fn update_with_source(
        &self,
        revision: WorkflowRevision,
        source: String,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), RevisionStoreError> {
        let id = revision.workflow_id.revision(revision.version);
        let steps_json = serde_json::to_value(&revision.steps)
            .expect("Step serializes without error");

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r"
            UPDATE workflow_revisions
            SET name = $1, description = $2, active = $3, updated_at = $4,
                steps = $5, source = $6
            WHERE namespace = $7 AND workflow_id = $8 AND version = $9 AND updated_at = $10
            ",
        )
        .bind(&revision.name)
        .bind(&revision.description)
        .bind(revision.active)
        .bind(revision.updated_at)
        .bind(&steps_json)
        .bind(&source)
        .bind(revision.workflow_id.namespace())
        .bind(revision.workflow_id.id())
        .bind(revision.version as i32)
        .bind(expected_updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .lock_conflict_error(&mut tx, &id, expected_updated_at)
                .await?);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id_with_source(
        &self,
        id: &WorkflowRevisionId,
    ) -> Result<Option<WorkflowRevisionWithSource>, RevisionStoreError> {
        let row = sqlx::query_as::<_, RevisionRow>(
            r"
            SELECT namespace, workflow_id, version, name, description, active,
                   created_at, updated_at, steps, source
            FROM workflow_revisions
            WHERE namespace = $1 AND workflow_id = $2 AND version = $3
            ",
        )
        .bind(id.workflow_id().namespace())
        .bind(id.workflow_id().id())
        .bind(id.version() as i32)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into)
            .transpose()
            .map_err(RevisionStoreError::Database)
    }

    async fn find_by_id(
        &self,
        id: &WorkflowRevisionId,
    ) -> Result<Option<WorkflowRevision>, RevisionStoreError> {
        Ok(self
            .find_by_id_with_source(id)
            .await?
            .map(|r| r.revision))
    }

    async fn find_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowRevision>, RevisionStoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM workflow_revisions WHERE namespace = $1 AND workflow_id = $2",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, RevisionRow>(
            r"
            SELECT namespace, workflow_id, version, name, description, active,
                   created_at, updated_at, steps, source
            FROM workflow_revisions
            WHERE namespace = $1 AND workflow_id = $2
            ORDER BY version ASC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .bind(pagination.clamped_limit())
        .bind(pagination.offset)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(|r| WorkflowRevisionWithSource::try_from(r).map(|r| r.revision))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total, pagination))
    }

    async fn find_active_revisions(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<WorkflowRevision>, RevisionStoreError> {
        let rows = sqlx::query_as::<_, RevisionRow>(
            r"
            SELECT namespace, workflow_id, version, name, description, active,
                   created_at, updated_at, steps, source
            FROM workflow_revisions
            WHERE namespace = $1 AND workflow_id = $2 AND active = TRUE
            ORDER BY version ASC
            ",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| WorkflowRevisionWithSource::try_from(r).map(|r| r.revision))
            .collect::<Result<Vec<_>, _>>()
            .map_err(RevisionStoreError::Database)
    }

    async fn find_max_version(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<u32>, RevisionStoreError> {
        let max: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(version) FROM workflow_revisions WHERE namespace = $1 AND workflow_id = $2",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .fetch_one(&self.pool)
        .await?;

        Ok(max.map(|v| v as u32))
    }

    async fn exists(&self, workflow_id: &WorkflowId) -> Result<bool, RevisionStoreError> {
        let row = sqlx::query(
            "SELECT 1 FROM workflow_revisions WHERE namespace = $1 AND workflow_id = $2 LIMIT 1",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn delete_by_id(&self, id: &WorkflowRevisionId) -> Result<(), RevisionStoreError> {
        sqlx::query(
            "DELETE FROM workflow_revisions WHERE namespace = $1 AND workflow_id = $2 AND version = $3",
        )
        .bind(id.workflow_id().namespace())
        .bind(id.workflow_id().id())
        .bind(id.version() as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64, RevisionStoreError> {
        let had_active: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM workflow_revisions WHERE namespace = $1 AND workflow_id = $2 AND active = TRUE)",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .fetch_one(&self.pool)
        .await?;
        if had_active {
            tracing::warn!(%workflow_id, "deleting all revisions of a workflow with an active revision");
        }

        let result = sqlx::query(
            "DELETE FROM workflow_revisions WHERE namespace = $1 AND workflow_id = $2",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_workflows(
        &self,
        namespace: Option<&str>,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowSummary>, RevisionStoreError> {
        let rows = sqlx::query(
            r"
            SELECT namespace, workflow_id,
                   MAX(version) AS latest_version,
                   array_agg(version ORDER BY version) FILTER (WHERE active) AS active_versions,
                   COUNT(*) AS revision_count
            FROM workflow_revisions
            WHERE $1::text IS NULL OR namespace = $1
            GROUP BY namespace, workflow_id
            ORDER BY namespace, workflow_id
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(namespace)
        .bind(pagination.clamped_limit())
        .bind(pagination.offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM (
                SELECT 1 FROM workflow_revisions
                WHERE $1::text IS NULL OR namespace = $1
                GROUP BY namespace, workflow_id
            ) t
            ",
        )
        .bind(namespace)
        .fetch_one(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(|row| -> Result<WorkflowSummary, RevisionStoreError> {
                let ns: String = row.try_get("namespace")?;
                let wid: String = row.try_get("workflow_id")?;
                let latest_version: i32 = row.try_get("latest_version")?;
                let active_versions: Option<Vec<i32>> = row.try_get("active_versions")?;
                let revision_count: i64 = row.try_get("revision_count")?;
                Ok(WorkflowSummary {
                    workflow_id: WorkflowId::new(ns, wid)
                        .map_err(|e| RevisionStoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
                    active_versions: active_versions
                        .unwrap_or_default()
                        .into_iter()
                        .map(|v| v as u32)
                        .collect(),
                    latest_version: latest_version as u32,
                    revision_count: revision_count as u32,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total, pagination))
    }

    async fn activate_with_source(
        &self,
        id: &WorkflowRevisionId,
        source: String,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<WorkflowRevision, RevisionStoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE workflow_revisions SET active = TRUE, updated_at = NOW(), source = $1 WHERE namespace = $2 AND workflow_id = $3 AND version = $4 AND updated_at = $5",
        )
        .bind(&source)
        .bind(id.workflow_id().namespace())
        .bind(id.workflow_id().id())
        .bind(id.version() as i32)
        .bind(expected_updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .lock_conflict_error(&mut tx, id, expected_updated_at)
                .await?);
        }

        let row = sqlx::query_as::<_, RevisionRow>(
            r"
            SELECT namespace, workflow_id, version, name, description, active,
                   created_at, updated_at, steps, source
            FROM workflow_revisions
            WHERE namespace = $1 AND workflow_id = $2 AND version = $3
            ",
        )
        .bind(id.workflow_id().namespace())
        .bind(id.workflow_id().id())
        .bind(id.version() as i32)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        WorkflowRevisionWithSource::try_from(row)
            .map(|r| r.revision)
            .map_err(RevisionStoreError::Database)
    }

    async fn deactivate_with_source(
        &self,
        id: &WorkflowRevisionId,
        source: String,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<WorkflowRevision, RevisionStoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE workflow_revisions SET active = FALSE, updated_at = NOW(), source = $1 WHERE namespace = $2 AND workflow_id = $3 AND version = $4 AND updated_at = $5",
        )
        .bind(&source)
        .bind(id.workflow_id().namespace())
        .bind(id.workflow_id().id())
        .bind(id.version() as i32)
        .bind(expected_updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .lock_conflict_error(&mut tx, id, expected_updated_at)
                .await?);
        }

        let row = sqlx::query_as::<_, RevisionRow>(
            r"
            SELECT namespace, workflow_id, version, name, description, active,
                   created_at, updated_at, steps, source
            FROM workflow_revisions
            WHERE namespace = $1 AND workflow_id = $2 AND version = $3
            ",
        )
        .bind(id.workflow_id().namespace())
        .bind(id.workflow_id().id())
        .bind(id.version() as i32)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        WorkflowRevisionWithSource::try_from(row)
            .map(|r| r.revision)
            .map_err(RevisionStoreError::Database)
    }
}
