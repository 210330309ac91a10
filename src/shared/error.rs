use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use crate::domain::access::Role;
use crate::domain::ssh_url::SshUrlError;

/// 统一的错误类型
#[derive(Debug, thiserror::Error)]
pub enum LakesyncError {
    /// SQLx 数据库错误
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// 数据库迁移错误
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH 地址校验失败
    #[error("Invalid SSH URL: {0}")]
    InvalidSshUrl(#[from] SshUrlError),

    /// 缺少凭证
    #[error("Missing credentials")]
    Unauthenticated,

    /// 权限不足
    #[error("Permission denied: {0} role required")]
    PermissionDenied(Role),

    /// 鉴权服务调用失败（不能当作权限不足处理）
    #[error("Authorization upstream failed: {0}")]
    AccessUpstream(String),

    /// 仓库未找到
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    /// git 子进程返回非零
    #[error("Git command failed: {0}")]
    GitCommand(String),

    /// git 子进程超时
    #[error("Git command timed out after {0}s")]
    GitTimeout(u64),

    /// 同步队列已满
    #[error("Sync queue is full")]
    QueueFull,

    /// 调度器已关闭
    #[error("Sync scheduler is shut down")]
    SchedulerClosed,

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

/// 用于 Axum 的错误响应实现
impl IntoResponse for LakesyncError {
    fn into_response(self) -> Response {
        let (status, message, kind) = match &self {
            LakesyncError::InvalidSshUrl(e) => {
                (StatusCode::BAD_REQUEST, self.to_string(), Some(e.kind().as_str()))
            }
            LakesyncError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string(), None),
            LakesyncError::PermissionDenied(_) => (StatusCode::FORBIDDEN, self.to_string(), None),
            LakesyncError::AccessUpstream(_) => (
                StatusCode::BAD_GATEWAY,
                "Authorization service unavailable".to_string(),
                None,
            ),
            LakesyncError::RepositoryNotFound(_) => (StatusCode::NOT_FOUND, self.to_string(), None),
            LakesyncError::QueueFull | LakesyncError::SchedulerClosed => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), None)
            }
            LakesyncError::Sqlx(_) | LakesyncError::Migrate(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            ),
        };

        if status.is_server_error() {
            tracing::error!("Request error: {}", self);
        } else {
            // 校验失败需要记录种类，便于安全排查
            tracing::warn!(kind = kind.unwrap_or("-"), "Request rejected: {}", self);
        }

        (status, Json(ErrorBody { error: message, kind })).into_response()
    }
}
