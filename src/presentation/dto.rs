use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::entities::Repository;
use crate::domain::value_objects::{SyncAction, SyncStatus};
use crate::services::dispatcher::SyncTicket;

/// 仓库 DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDto {
    pub id: i64,
    pub ssh: String,
    pub branch: Option<String>,
    pub status: Option<SyncStatus>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Repository> for RepositoryDto {
    fn from(repo: Repository) -> Self {
        Self {
            id: repo.id.as_i64(),
            ssh: repo.ssh,
            branch: repo.branch,
            status: repo.status,
            created_at: repo.created_at.to_rfc3339(),
            updated_at: repo.updated_at.to_rfc3339(),
        }
    }
}

/// 创建（或重新同步）仓库的请求体
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRepositoryRequest {
    pub ssh: String,
    #[serde(default)]
    pub branch: Option<String>,
}

/// 202 响应：`status` 是派发的动作（clone / pull）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAcceptedDto {
    pub id: i64,
    pub status: SyncAction,
    pub job_id: Uuid,
    pub coalesced: bool,
}

impl From<&SyncTicket> for SyncAcceptedDto {
    fn from(ticket: &SyncTicket) -> Self {
        Self {
            id: ticket.repository_id.as_i64(),
            status: ticket.action,
            job_id: ticket.job_id,
            coalesced: ticket.coalesced,
        }
    }
}
