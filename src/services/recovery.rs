use std::sync::Arc;
use tracing::{info, warn};
use crate::ports::repository::RepositoryPort;
use crate::shared::result::Result;

/// 启动时恢复：上一个进程遗留的 updating 记录不会再有任务来收尾，统一置为 failed
///
/// 不清理目录。pull 中断时的工作副本和 clone 的半成品无法区分，
/// 下次提交会按目录是否存在重新决定 clone 还是 pull。
pub async fn recover_interrupted_syncs(repository_store: &Arc<dyn RepositoryPort>) -> Result<u64> {
    let recovered = repository_store.fail_stale_updates().await?;
    if recovered > 0 {
        warn!("Marked {} interrupted syncs as failed", recovered);
    } else {
        info!("No interrupted syncs to recover");
    }
    Ok(recovered)
}
