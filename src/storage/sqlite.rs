//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Timestamps are stored
//! as epoch milliseconds; parameters, steps, context and results as JSON text.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::path::Path;
use std::str::FromStr;

use super::{
    ExecutionStats, ExecutionStatus, Storage, StorageError, TaskExecution, WorkflowExecution,
    WorkflowRunStatus,
};
use crate::core::schedule::{ScheduleSpec, TaskType};
use crate::core::task::ScheduledTask;
use crate::core::types::{TaskId, WorkflowId};
use crate::core::workflow::Workflow;

const TASK_COLUMNS: &str = "id, name, description, task_type, schedule, action, parameters, \
     enabled, max_retries, retry_delay_ms, notify_on_success, notify_on_error, \
     created_at, updated_at, last_run, next_run";

const TASK_EXECUTION_COLUMNS: &str =
    "id, task_id, execution_id, started_at, completed_at, status, result, error, retry_count";

const WORKFLOW_COLUMNS: &str = "id, name, description, steps, enabled, created_at, updated_at";

const WORKFLOW_EXECUTION_COLUMNS: &str = "id, workflow_id, execution_id, started_at, \
     completed_at, status, current_step, total_steps, context, results, error";

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?
            .foreign_keys(true);

        // A second connection would open a separate empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StorageError::Serialization(format!("timestamp out of range: {}", ms)))
}

fn from_optional_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StorageError> {
    ms.map(from_millis).transpose()
}

fn parse_id<T: FromStr<Err = uuid::Error>>(s: &str) -> Result<T, StorageError> {
    s.parse()
        .map_err(|e| StorageError::Serialization(format!("invalid uuid '{}': {}", s, e)))
}

fn task_from_row(row: &SqliteRow) -> Result<ScheduledTask, StorageError> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let task_type: String = row.try_get("task_type").map_err(db_err)?;
    let schedule: String = row.try_get("schedule").map_err(db_err)?;
    let parameters: String = row.try_get("parameters").map_err(db_err)?;

    Ok(ScheduledTask {
        id: parse_id(&id)?,
        name: row.try_get("name").map_err(db_err)?,
        description: row.try_get("description").map_err(db_err)?,
        task_type: TaskType::from_str(&task_type)
            .map_err(|e| StorageError::Serialization(e.to_string()))?,
        schedule: ScheduleSpec::from_stored(&schedule),
        action: row.try_get("action").map_err(db_err)?,
        parameters: serde_json::from_str(&parameters)?,
        enabled: row.try_get("enabled").map_err(db_err)?,
        max_retries: row.try_get::<i64, _>("max_retries").map_err(db_err)? as u32,
        retry_delay_ms: row.try_get::<i64, _>("retry_delay_ms").map_err(db_err)? as u64,
        notify_on_success: row.try_get("notify_on_success").map_err(db_err)?,
        notify_on_error: row.try_get("notify_on_error").map_err(db_err)?,
        created_at: from_millis(row.try_get("created_at").map_err(db_err)?)?,
        updated_at: from_millis(row.try_get("updated_at").map_err(db_err)?)?,
        last_run: from_optional_millis(row.try_get("last_run").map_err(db_err)?)?,
        next_run: from_optional_millis(row.try_get("next_run").map_err(db_err)?)?,
    })
}

fn task_execution_from_row(row: &SqliteRow) -> Result<TaskExecution, StorageError> {
    let task_id: String = row.try_get("task_id").map_err(db_err)?;
    let execution_id: String = row.try_get("execution_id").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let result: Option<String> = row.try_get("result").map_err(db_err)?;

    Ok(TaskExecution {
        id: row.try_get("id").map_err(db_err)?,
        task_id: parse_id(&task_id)?,
        execution_id: parse_id(&execution_id)?,
        started_at: from_millis(row.try_get("started_at").map_err(db_err)?)?,
        completed_at: from_optional_millis(row.try_get("completed_at").map_err(db_err)?)?,
        status: ExecutionStatus::parse(&status)
            .ok_or_else(|| StorageError::Serialization(format!("unknown status: {}", status)))?,
        result: result
            .map(|r| serde_json::from_str::<Value>(&r))
            .transpose()?,
        error: row.try_get("error").map_err(db_err)?,
        retry_count: row.try_get::<i64, _>("retry_count").map_err(db_err)? as u32,
    })
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow, StorageError> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let steps: String = row.try_get("steps").map_err(db_err)?;

    Ok(Workflow {
        id: parse_id(&id)?,
        name: row.try_get("name").map_err(db_err)?,
        description: row.try_get("description").map_err(db_err)?,
        steps: serde_json::from_str(&steps)?,
        enabled: row.try_get("enabled").map_err(db_err)?,
        created_at: from_millis(row.try_get("created_at").map_err(db_err)?)?,
        updated_at: from_millis(row.try_get("updated_at").map_err(db_err)?)?,
    })
}

fn workflow_execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution, StorageError> {
    let workflow_id: String = row.try_get("workflow_id").map_err(db_err)?;
    let execution_id: String = row.try_get("execution_id").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let context: String = row.try_get("context").map_err(db_err)?;
    let results: String = row.try_get("results").map_err(db_err)?;

    Ok(WorkflowExecution {
        id: row.try_get("id").map_err(db_err)?,
        workflow_id: parse_id(&workflow_id)?,
        execution_id: parse_id(&execution_id)?,
        started_at: from_millis(row.try_get("started_at").map_err(db_err)?)?,
        completed_at: from_optional_millis(row.try_get("completed_at").map_err(db_err)?)?,
        status: WorkflowRunStatus::parse(&status)
            .ok_or_else(|| StorageError::Serialization(format!("unknown status: {}", status)))?,
        current_step: row.try_get::<i64, _>("current_step").map_err(db_err)? as usize,
        total_steps: row.try_get::<i64, _>("total_steps").map_err(db_err)? as usize,
        context: serde_json::from_str(&context)?,
        results: serde_json::from_str(&results)?,
        error: row.try_get("error").map_err(db_err)?,
    })
}

fn stats_from_row(row: &SqliteRow) -> Result<ExecutionStats, StorageError> {
    Ok(ExecutionStats {
        total: row.try_get::<i64, _>("total").map_err(db_err)? as u64,
        running: row.try_get::<i64, _>("running").map_err(db_err)? as u64,
        success: row.try_get::<i64, _>("success").map_err(db_err)? as u64,
        error: row.try_get::<i64, _>("error").map_err(db_err)? as u64,
        cancelled: row.try_get::<i64, _>("cancelled").map_err(db_err)? as u64,
        average_duration_ms: row.try_get("average_duration_ms").map_err(db_err)?,
    })
}

fn stats_query(table: &str) -> String {
    format!(
        r#"
        SELECT COUNT(*) AS total,
               COALESCE(SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END), 0) AS running,
               COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS success,
               COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0) AS error,
               COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0) AS cancelled,
               AVG(CASE WHEN completed_at IS NOT NULL
                        THEN CAST(completed_at - started_at AS REAL) END) AS average_duration_ms
        FROM {}
        "#,
        table
    )
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_task(&self, task: &ScheduledTask) -> Result<(), StorageError> {
        let result = sqlx::query(&format!(
            "INSERT INTO scheduled_tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TASK_COLUMNS
        ))
        .bind(task.id.to_string())
        .bind(&task.name)
        .bind(&task.description)
        .bind(task.task_type.as_str())
        .bind(task.schedule.to_string())
        .bind(&task.action)
        .bind(serde_json::to_string(&task.parameters)?)
        .bind(task.enabled)
        .bind(task.max_retries as i64)
        .bind(task.retry_delay_ms as i64)
        .bind(task.notify_on_success)
        .bind(task.notify_on_error)
        .bind(to_millis(task.created_at))
        .bind(to_millis(task.updated_at))
        .bind(task.last_run.map(to_millis))
        .bind(task.next_run.map(to_millis))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!("task: {}", task.id)))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_task(&self, id: &TaskId) -> Result<ScheduledTask, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduled_tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StorageError::NotFound(format!("task: {}", id)))?;

        task_from_row(&row)
    }

    async fn list_tasks(&self) -> Result<Vec<ScheduledTask>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM scheduled_tasks ORDER BY created_at, rowid",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(task_from_row).collect()
    }

    async fn update_task(&self, task: &ScheduledTask) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET name = ?, description = ?, task_type = ?, schedule = ?, action = ?,
                parameters = ?, enabled = ?, max_retries = ?, retry_delay_ms = ?,
                notify_on_success = ?, notify_on_error = ?, updated_at = ?,
                next_run = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.name)
        .bind(&task.description)
        .bind(task.task_type.as_str())
        .bind(task.schedule.to_string())
        .bind(&task.action)
        .bind(serde_json::to_string(&task.parameters)?)
        .bind(task.enabled)
        .bind(task.max_retries as i64)
        .bind(task.retry_delay_ms as i64)
        .bind(task.notify_on_success)
        .bind(task.notify_on_error)
        .bind(to_millis(task.updated_at))
        .bind(task.next_run.map(to_millis))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task: {}", task.id)));
        }
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task: {}", id)));
        }
        Ok(())
    }

    async fn set_last_run(&self, id: &TaskId, at: DateTime<Utc>) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE scheduled_tasks SET last_run = ? WHERE id = ?")
            .bind(to_millis(at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task: {}", id)));
        }
        Ok(())
    }

    async fn set_next_run(
        &self,
        id: &TaskId,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE scheduled_tasks SET next_run = ? WHERE id = ?")
            .bind(at.map(to_millis))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task: {}", id)));
        }
        Ok(())
    }

    async fn insert_task_execution(&self, execution: &TaskExecution) -> Result<i64, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_executions
                (task_id, execution_id, started_at, completed_at, status, result, error, retry_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.task_id.to_string())
        .bind(execution.execution_id.to_string())
        .bind(to_millis(execution.started_at))
        .bind(execution.completed_at.map(to_millis))
        .bind(execution.status.as_str())
        .bind(execution.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&execution.error)
        .bind(execution.retry_count as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StorageError::DuplicateKey(format!("execution: {}", execution.execution_id)),
            ),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => Err(
                StorageError::NotFound(format!("task: {}", execution.task_id)),
            ),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn update_task_execution(&self, execution: &TaskExecution) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE task_executions
            SET completed_at = ?, status = ?, result = ?, error = ?, retry_count = ?
            WHERE execution_id = ?
            "#,
        )
        .bind(execution.completed_at.map(to_millis))
        .bind(execution.status.as_str())
        .bind(execution.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&execution.error)
        .bind(execution.retry_count as i64)
        .bind(execution.execution_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "execution: {}",
                execution.execution_id
            )));
        }
        Ok(())
    }

    async fn list_task_executions(
        &self,
        task_id: &TaskId,
        limit: usize,
    ) -> Result<Vec<TaskExecution>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM task_executions WHERE task_id = ? ORDER BY id DESC LIMIT ?",
            TASK_EXECUTION_COLUMNS
        ))
        .bind(task_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(task_execution_from_row).collect()
    }

    async fn prune_task_executions(
        &self,
        task_id: &TaskId,
        keep: usize,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            DELETE FROM task_executions
            WHERE task_id = ?
              AND id NOT IN (
                  SELECT id FROM task_executions WHERE task_id = ? ORDER BY id DESC LIMIT ?
              )
            "#,
        )
        .bind(task_id.to_string())
        .bind(task_id.to_string())
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn get_running_task_executions(&self) -> Result<Vec<TaskExecution>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM task_executions WHERE status = 'running' ORDER BY id",
            TASK_EXECUTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(task_execution_from_row).collect()
    }

    async fn task_execution_stats(&self) -> Result<ExecutionStats, StorageError> {
        let row = sqlx::query(&stats_query("task_executions"))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        stats_from_row(&row)
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StorageError> {
        let result = sqlx::query(&format!(
            "INSERT INTO workflows ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            WORKFLOW_COLUMNS
        ))
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(serde_json::to_string(&workflow.steps)?)
        .bind(workflow.enabled)
        .bind(to_millis(workflow.created_at))
        .bind(to_millis(workflow.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StorageError::DuplicateKey(format!("workflow: {}", workflow.id)),
            ),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Workflow, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM workflows WHERE id = ?",
            WORKFLOW_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StorageError::NotFound(format!("workflow: {}", id)))?;

        workflow_from_row(&row)
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workflows ORDER BY created_at, rowid",
            WORKFLOW_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(workflow_from_row).collect()
    }

    async fn delete_workflow(&self, id: &WorkflowId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("workflow: {}", id)));
        }
        Ok(())
    }

    async fn insert_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<i64, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (workflow_id, execution_id, started_at, completed_at, status,
                 current_step, total_steps, context, results, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.workflow_id.to_string())
        .bind(execution.execution_id.to_string())
        .bind(to_millis(execution.started_at))
        .bind(execution.completed_at.map(to_millis))
        .bind(execution.status.as_str())
        .bind(execution.current_step as i64)
        .bind(execution.total_steps as i64)
        .bind(serde_json::to_string(&execution.context)?)
        .bind(serde_json::to_string(&execution.results)?)
        .bind(&execution.error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateKey(format!(
                    "workflow execution: {}",
                    execution.execution_id
                )))
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => Err(
                StorageError::NotFound(format!("workflow: {}", execution.workflow_id)),
            ),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn update_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET completed_at = ?, status = ?, current_step = ?, context = ?, results = ?, error = ?
            WHERE execution_id = ?
            "#,
        )
        .bind(execution.completed_at.map(to_millis))
        .bind(execution.status.as_str())
        .bind(execution.current_step as i64)
        .bind(serde_json::to_string(&execution.context)?)
        .bind(serde_json::to_string(&execution.results)?)
        .bind(&execution.error)
        .bind(execution.execution_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "workflow execution: {}",
                execution.execution_id
            )));
        }
        Ok(())
    }

    async fn list_workflow_executions(
        &self,
        workflow_id: &WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workflow_executions WHERE workflow_id = ? ORDER BY id DESC LIMIT ?",
            WORKFLOW_EXECUTION_COLUMNS
        ))
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(workflow_execution_from_row).collect()
    }

    async fn get_running_workflow_executions(
        &self,
    ) -> Result<Vec<WorkflowExecution>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workflow_executions WHERE status = 'running' ORDER BY id",
            WORKFLOW_EXECUTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(workflow_execution_from_row).collect()
    }

    async fn workflow_execution_stats(&self) -> Result<ExecutionStats, StorageError> {
        let row = sqlx::query(&stats_query("workflow_executions"))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        stats_from_row(&row)
    }
}
