//! `TaskStore` over PostgreSQL via `sqlx`.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::errors::CoreError;
use crate::model::{Task, TaskStatus};
use crate::ports::TaskStore;

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled migration set. Only the scheduler runs this,
    /// once, at startup — workers never touch schema.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Store(e.to_string()))?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    name: String,
    image: String,
    command: serde_json::Value,
    priority: i16,
    required_cpu: f64,
    required_memory: f64,
    status: String,
    assigned_node_id: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let command: Vec<String> = serde_json::from_value(row.command)?;
        let status = status_from_db(&row.status)?;
        Ok(Task {
            id: row.id,
            name: row.name,
            image: row.image,
            command,
            priority: row.priority as u8,
            required_cpu: row.required_cpu,
            required_memory: row.required_memory,
            status,
            assigned_node_id: row.assigned_node_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_to_db(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "PENDING",
        TaskStatus::Scheduled => "SCHEDULED",
        TaskStatus::Running => "RUNNING",
        TaskStatus::Completed => "COMPLETED",
        TaskStatus::Failed => "FAILED",
    }
}

fn status_from_db(s: &str) -> anyhow::Result<TaskStatus> {
    Ok(match s {
        "PENDING" => TaskStatus::Pending,
        "SCHEDULED" => TaskStatus::Scheduled,
        "RUNNING" => TaskStatus::Running,
        "COMPLETED" => TaskStatus::Completed,
        "FAILED" => TaskStatus::Failed,
        other => anyhow::bail!("unrecognised task status in store: {other}"),
    })
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn save(&self, task: &Task) -> anyhow::Result<bool> {
        let command = serde_json::to_value(&task.command)?;
        let result = sqlx::query(
            r#"
            INSERT INTO tasks
                (id, name, image, command, priority, required_cpu, required_memory,
                 status, assigned_node_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.image)
        .bind(command)
        .bind(task.priority as i16)
        .bind(task.required_cpu)
        .bind(task.required_memory)
        .bind(status_to_db(task.status))
        .bind(&task.assigned_node_id)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, name, image, command, priority, required_cpu, required_memory,
                   status, assigned_node_id, created_at, updated_at
            FROM tasks WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)?;

        row.map(Task::try_from).transpose()
    }

    async fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
        assigned_node_id: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE tasks SET status = $1, assigned_node_id = $2, updated_at = now() WHERE id = $3",
        )
        .bind(status_to_db(status))
        .bind(assigned_node_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(CoreError::from)?;
        Ok(())
    }

    async fn list_pending(&self) -> anyhow::Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, name, image, command, priority, required_cpu, required_memory,
                   status, assigned_node_id, created_at, updated_at
            FROM tasks
            WHERE status = 'PENDING'
            ORDER BY priority DESC, created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)?;

        rows.into_iter().map(Task::try_from).collect()
    }
}
