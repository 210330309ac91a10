use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use crate::domain::entities::Repository;
use crate::domain::value_objects::{RepositoryId, SyncStatus};
use crate::ports::repository::RepositoryPort;
use crate::shared::error::LakesyncError;
use crate::shared::result::Result;

/// SQLite 仓库记录存储实现
pub struct SqliteRepositoryRepository {
    pool: SqlitePool,
}

impl SqliteRepositoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn timestamp(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| LakesyncError::Internal(format!("Invalid timestamp in database: {}", ts)))
}

fn row_to_repository(r: &SqliteRow) -> Result<Repository> {
    let status = r
        .get::<Option<String>, _>("status")
        .map(|s| s.parse::<SyncStatus>())
        .transpose()
        .map_err(LakesyncError::Internal)?;

    Ok(Repository {
        id: RepositoryId(r.get("id")),
        ssh: r.get("ssh"),
        branch: r.get("branch"),
        status,
        created_at: timestamp(r.get("created_at"))?,
        updated_at: timestamp(r.get("updated_at"))?,
    })
}

#[async_trait]
impl RepositoryPort for SqliteRepositoryRepository {
    async fn find_by_id(&self, id: RepositoryId) -> Result<Option<Repository>> {
        let row = sqlx::query(
            r#"
            SELECT id, ssh, branch, status, created_at, updated_at
            FROM repositories
            WHERE id = ?
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_repository).transpose()
    }

    async fn find_by_ssh(&self, ssh: &str) -> Result<Option<Repository>> {
        let row = sqlx::query(
            r#"
            SELECT id, ssh, branch, status, created_at, updated_at
            FROM repositories
            WHERE ssh = ?
            "#,
        )
        .bind(ssh)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_repository).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Repository>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ssh, branch, status, created_at, updated_at
            FROM repositories
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_repository).collect()
    }

    async fn insert_or_get(&self, repo: &Repository) -> Result<RepositoryId> {
        // 并发提交同一个 ssh 时由 UNIQUE 约束兜底，始终返回同一条记录；
        // 已有记录的状态不在这里修改
        let row = sqlx::query(
            r#"
            INSERT INTO repositories (ssh, branch, status, created_at, updated_at)
            VALUES (?, ?, 'updating', ?, ?)
            ON CONFLICT(ssh) DO UPDATE SET
                branch = COALESCE(excluded.branch, repositories.branch)
            RETURNING id
            "#,
        )
        .bind(&repo.ssh)
        .bind(&repo.branch)
        .bind(repo.created_at.timestamp())
        .bind(repo.updated_at.timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(RepositoryId(row.get("id")))
    }

    async fn mark_updating(&self, id: RepositoryId, branch: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE repositories
            SET status = 'updating', branch = COALESCE(?, branch), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(branch)
        .bind(Utc::now().timestamp())
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn finish_sync(&self, id: RepositoryId, status: SyncStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Err(LakesyncError::Internal(format!(
                "{} is not a terminal sync status",
                status
            )));
        }

        // 后台任务使用独立事务，与派发请求无关
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE repositories
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = 'updating'
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(id.as_i64())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: RepositoryId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_stale_updates(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE repositories SET status = 'failed', updated_at = ? WHERE status = 'updating'",
        )
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
