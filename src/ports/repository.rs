use async_trait::async_trait;
use crate::domain::entities::Repository;
use crate::domain::value_objects::{RepositoryId, SyncStatus};
use crate::shared::result::Result;

/// 仓库记录存储接口（Repository Pattern）
#[async_trait]
pub trait RepositoryPort: Send + Sync {
    /// 根据 ID 查找仓库
    async fn find_by_id(&self, id: RepositoryId) -> Result<Option<Repository>>;

    /// 根据 SSH 地址查找仓库
    async fn find_by_ssh(&self, ssh: &str) -> Result<Option<Repository>>;

    /// 列出所有仓库
    async fn list_all(&self) -> Result<Vec<Repository>>;

    /// 插入新仓库（状态为 updating）；ssh 已存在时返回原记录 ID，不改状态
    async fn insert_or_get(&self, repo: &Repository) -> Result<RepositoryId>;

    /// 已有仓库重新进入 updating，返回记录是否存在
    async fn mark_updating(&self, id: RepositoryId, branch: Option<&str>) -> Result<bool>;

    /// 写入终态，仅当当前状态为 updating 时生效
    async fn finish_sync(&self, id: RepositoryId, status: SyncStatus) -> Result<bool>;

    /// 删除仓库，返回是否删除了记录
    async fn delete(&self, id: RepositoryId) -> Result<bool>;

    /// 把上一个进程遗留的 updating 记录置为 failed
    async fn fail_stale_updates(&self) -> Result<u64>;
}
