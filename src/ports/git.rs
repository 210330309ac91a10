use async_trait::async_trait;
use std::path::Path;
use crate::shared::result::Result;

/// Git 操作接口
///
/// 非零退出码返回 `LakesyncError::GitCommand`，内容为 stderr。
#[async_trait]
pub trait GitPort: Send + Sync {
    /// 克隆仓库到 `dest`
    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<GitOutput>;

    /// 在已有工作副本上执行 pull
    async fn pull_repository(&self, path: &Path) -> Result<GitOutput>;
}

/// git 子进程的输出
#[derive(Debug, Clone, Default)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}
