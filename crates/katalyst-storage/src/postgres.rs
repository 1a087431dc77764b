//! PostgreSQL store implementations
//!
//! Production persistence over a shared `PgPool`. Timestamps are BIGINT
//! epoch milliseconds; `operation_data`/`undo_data` are JSON-encoded TEXT
//! columns the framework round-trips without inspecting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use katalyst_core::{
    NewOperation, Operation, OperationStatus, OperationType, WorkflowRecord, WorkflowStatus,
};

use super::store::{
    clamp_error_message, OperationLogStore, PublishedEventStore, StoreError, WorkflowStateStore,
};

fn db_err(context: &str, err: sqlx::Error) -> StoreError {
    error!("{context}: {err}");
    StoreError::Database(err.to_string())
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {millis}")))
}

fn opt_millis_to_datetime(millis: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    millis.map(millis_to_datetime).transpose()
}

fn json_text(value: &Option<serde_json::Value>) -> Result<Option<String>, StoreError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(|e| StoreError::Serialization(e.to_string())))
        .transpose()
}

fn text_json(text: Option<String>) -> Result<Option<serde_json::Value>, StoreError> {
    text.map(|t| serde_json::from_str(&t).map_err(|e| StoreError::Serialization(e.to_string())))
        .transpose()
}

fn operation_from_row(row: &PgRow) -> Result<Operation, StoreError> {
    let status: String = row.get("status");
    let status = OperationStatus::parse(&status)
        .ok_or_else(|| StoreError::Serialization(format!("unknown operation status: {status}")))?;

    Ok(Operation {
        workflow_id: row.get("workflow_id"),
        operation_index: row.get("operation_index"),
        operation_type: OperationType::parse(row.get::<String, _>("operation_type").as_str()),
        resource_type: row.get("resource_type"),
        resource_id: row.get("resource_id"),
        operation_data: text_json(row.get("operation_data"))?,
        undo_data: text_json(row.get("undo_data"))?,
        status,
        error_message: row.get("error_message"),
        created_at: millis_to_datetime(row.get("created_at"))?,
        committed_at: opt_millis_to_datetime(row.get("committed_at"))?,
        undone_at: opt_millis_to_datetime(row.get("undone_at"))?,
        last_error_at: opt_millis_to_datetime(row.get("last_error_at"))?,
    })
}

fn workflow_from_row(row: &PgRow) -> Result<WorkflowRecord, StoreError> {
    let status: String = row.get("status");
    let status = WorkflowStatus::parse(&status)
        .ok_or_else(|| StoreError::Serialization(format!("unknown workflow status: {status}")))?;

    Ok(WorkflowRecord {
        workflow_id: row.get("workflow_id"),
        workflow_name: row.get("workflow_name"),
        status,
        total_operations: row.get("total_operations"),
        failed_at_operation: row.get("failed_at_operation"),
        error_message: row.get("error_message"),
        created_at: millis_to_datetime(row.get("created_at"))?,
        completed_at: opt_millis_to_datetime(row.get("completed_at"))?,
    })
}

/// PostgreSQL implementation of [`OperationLogStore`]
#[derive(Clone)]
pub struct PostgresOperationLog {
    pool: PgPool,
}

impl PostgresOperationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OperationLogStore for PostgresOperationLog {
    #[instrument(skip(self, operation), fields(workflow_id = %operation.workflow_id, index = operation.operation_index))]
    async fn log_operation(&self, operation: NewOperation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO operation_log
                (workflow_id, operation_index, operation_type, resource_type,
                 resource_id, operation_data, undo_data, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', $8)
            "#,
        )
        .bind(&operation.workflow_id)
        .bind(operation.operation_index)
        .bind(operation.operation_type.as_str())
        .bind(&operation.resource_type)
        .bind(&operation.resource_id)
        .bind(json_text(&operation.operation_data)?)
        .bind(json_text(&operation.undo_data)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to log operation", e))?;

        debug!("logged operation");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_pending_operations(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<Operation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM operation_log
            WHERE workflow_id = $1 AND status = 'PENDING'
            ORDER BY operation_index ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to load pending operations", e))?;

        rows.iter().map(operation_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn get_all_operations(&self, workflow_id: &str) -> Result<Vec<Operation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM operation_log
            WHERE workflow_id = $1
            ORDER BY operation_index ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to load operations", e))?;

        rows.iter().map(operation_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn mark_as_committed(
        &self,
        workflow_id: &str,
        operation_index: i32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE operation_log
            SET status = 'COMMITTED', committed_at = $3
            WHERE workflow_id = $1 AND operation_index = $2 AND status = 'PENDING'
            "#,
        )
        .bind(workflow_id)
        .bind(operation_index)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark operation committed", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OperationNotFound {
                workflow_id: workflow_id.to_string(),
                operation_index,
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_all_as_committed(&self, workflow_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE operation_log
            SET status = 'COMMITTED', committed_at = $2
            WHERE workflow_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(workflow_id)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark workflow operations committed", e))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_as_undone(
        &self,
        workflow_id: &str,
        operation_index: i32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE operation_log
            SET status = 'UNDONE', undone_at = $3
            WHERE workflow_id = $1 AND operation_index = $2
              AND status IN ('COMMITTED', 'FAILED')
            "#,
        )
        .bind(workflow_id)
        .bind(operation_index)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark operation undone", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OperationNotFound {
                workflow_id: workflow_id.to_string(),
                operation_index,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn mark_as_failed(
        &self,
        workflow_id: &str,
        operation_index: i32,
        error: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE operation_log
            SET status = 'FAILED', error_message = $3, last_error_at = $4
            WHERE workflow_id = $1 AND operation_index = $2 AND status = 'PENDING'
            "#,
        )
        .bind(workflow_id)
        .bind(operation_index)
        .bind(clamp_error_message(error))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark operation failed", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OperationNotFound {
                workflow_id: workflow_id.to_string(),
                operation_index,
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_failed_operations(&self) -> Result<Vec<Operation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM operation_log
            WHERE status = 'FAILED'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to load failed operations", e))?;

        rows.iter().map(operation_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn delete_old_operations(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM operation_log
            WHERE created_at <= $1 AND status != 'PENDING'
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to delete old operations", e))?;

        Ok(result.rows_affected())
    }
}

/// PostgreSQL implementation of [`WorkflowStateStore`]
#[derive(Clone)]
pub struct PostgresWorkflowStateStore {
    pool: PgPool,
}

impl PostgresWorkflowStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStateStore for PostgresWorkflowStateStore {
    #[instrument(skip(self))]
    async fn start_workflow(
        &self,
        workflow_id: &str,
        workflow_name: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_state
                (workflow_id, workflow_name, status, created_at)
            VALUES ($1, $2, 'STARTED', $3)
            "#,
        )
        .bind(workflow_id)
        .bind(workflow_name)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to start workflow", e))?;

        debug!(%workflow_id, %workflow_name, "workflow started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn commit_workflow(
        &self,
        workflow_id: &str,
        total_operations: i32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_state
            SET status = 'COMMITTED', total_operations = $2, completed_at = $3
            WHERE workflow_id = $1 AND status = 'STARTED'
            "#,
        )
        .bind(workflow_id)
        .bind(total_operations)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to commit workflow", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, error_message))]
    async fn fail_workflow(
        &self,
        workflow_id: &str,
        failed_at_operation: Option<i32>,
        error_message: &str,
    ) -> Result<(), StoreError> {
        let total_operations = failed_at_operation.map(|i| i + 1).unwrap_or(0);
        let result = sqlx::query(
            r#"
            UPDATE workflow_state
            SET status = 'FAILED', failed_at_operation = $2,
                total_operations = $3, error_message = $4
            WHERE workflow_id = $1 AND status = 'STARTED'
            "#,
        )
        .bind(workflow_id)
        .bind(failed_at_operation)
        .bind(total_operations)
        .bind(clamp_error_message(error_message))
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to fail workflow", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_as_undone(&self, workflow_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_state
            SET status = 'UNDONE', failed_at_operation = NULL,
                error_message = NULL, completed_at = $2
            WHERE workflow_id = $1 AND status = 'FAILED'
            "#,
        )
        .bind(workflow_id)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark workflow undone", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn mark_undo_failed(&self, workflow_id: &str, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_state
            SET status = 'FAILED_UNDO', error_message = $2, completed_at = $3
            WHERE workflow_id = $1 AND status = 'FAILED'
            "#,
        )
        .bind(workflow_id)
        .bind(clamp_error_message(error))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark undo failure", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_workflow_state(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM workflow_state WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to load workflow state", e))?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_failed_workflows(&self) -> Result<Vec<WorkflowRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_state
            WHERE status IN ('FAILED', 'FAILED_UNDO')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("failed to load failed workflows", e))?;

        rows.iter().map(workflow_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn delete_old_workflows(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflow_state
            WHERE created_at <= $1 AND status = 'COMMITTED'
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to delete old workflows", e))?;

        Ok(result.rows_affected())
    }
}

/// PostgreSQL implementation of [`PublishedEventStore`]
///
/// `mark_as_published` uses `ON CONFLICT DO NOTHING`, so re-marking an id
/// keeps the original timestamp and never errors.
#[derive(Clone)]
pub struct PostgresPublishedEventStore {
    pool: PgPool,
}

impl PostgresPublishedEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PublishedEventStore for PostgresPublishedEventStore {
    #[instrument(skip(self))]
    async fn is_event_published(&self, event_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS present FROM published_event WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to check published event", e))?;

        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    async fn mark_as_published(
        &self,
        event_id: &str,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO published_event (event_id, published_at)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(published_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark event published", e))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM published_event WHERE published_at < $1
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to delete published events", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn published_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM published_event
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("failed to count published events", e))?;

        Ok(row.get::<i64, _>("count") as u64)
    }

    #[instrument(skip(self))]
    async fn published_count_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM published_event WHERE published_at < $1
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("failed to count published events", e))?;

        Ok(row.get::<i64, _>("count") as u64)
    }
}
