use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{RepositoryId, SyncStatus};

/// 仓库实体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub ssh: String,
    pub branch: Option<String>,
    pub status: Option<SyncStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(ssh: String) -> Self {
        let now = Utc::now();
        Self {
            id: RepositoryId(0), // 将由数据库生成
            ssh,
            branch: None,
            status: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }
}
