use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use uuid::Uuid;
use crate::domain::value_objects::{RepositoryId, SyncAction};

/// 正在执行的同步任务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightJob {
    pub job_id: Uuid,
    pub action: SyncAction,
    /// 即将或已经写入终态，只差释放登记
    pub settling: bool,
}

/// 按仓库 ID 串行化同步任务
///
/// 同一仓库同一时间最多一个任务。任务写终态之前先标记 `settling`，
/// 之后到达的请求等待登记释放再重新登记，而不是并入已经结束的任务。
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    entries: Mutex<HashMap<RepositoryId, InFlightJob>>,
    released: Notify,
}

impl InFlightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RepositoryId, InFlightJob>> {
        // 临界区内没有会 panic 的操作，中毒后数据仍然一致
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 登记任务；已有任务时返回 `Err(正在执行的任务)`
    pub fn try_claim(
        self: &Arc<Self>,
        repository_id: RepositoryId,
        job_id: Uuid,
        action: SyncAction,
    ) -> Result<InFlightClaim, InFlightJob> {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(&repository_id) {
            return Err(*existing);
        }

        let job = InFlightJob {
            job_id,
            action,
            settling: false,
        };
        entries.insert(repository_id, job);

        Ok(InFlightClaim {
            registry: Arc::clone(self),
            repository_id,
            job,
        })
    }

    /// 下一次释放登记时完成；须在 `try_claim` 之前取得，才不会错过释放
    pub fn released(&self) -> Notified<'_> {
        self.released.notified()
    }

    #[cfg(test)]
    pub fn get(&self, repository_id: RepositoryId) -> Option<InFlightJob> {
        self.entries().get(&repository_id).copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    fn update(&self, repository_id: RepositoryId, job_id: Uuid, apply: impl FnOnce(&mut InFlightJob)) {
        if let Some(job) = self.entries().get_mut(&repository_id) {
            if job.job_id == job_id {
                apply(job);
            }
        }
    }

    fn release(&self, repository_id: RepositoryId, job_id: Uuid) {
        {
            let mut entries = self.entries();
            if entries.get(&repository_id).map(|j| j.job_id) != Some(job_id) {
                return;
            }
            entries.remove(&repository_id);
        }
        self.released.notify_waiters();
    }
}

/// 登记凭据，drop 时释放
#[derive(Debug)]
pub struct InFlightClaim {
    registry: Arc<InFlightRegistry>,
    repository_id: RepositoryId,
    job: InFlightJob,
}

impl InFlightClaim {
    pub fn repository_id(&self) -> RepositoryId {
        self.repository_id
    }

    pub fn job_id(&self) -> Uuid {
        self.job.job_id
    }

    pub fn action(&self) -> SyncAction {
        self.job.action
    }

    /// 持有登记后重新判断出的 clone / pull
    pub fn set_action(&mut self, action: SyncAction) {
        self.job.action = action;
        self.registry
            .update(self.repository_id, self.job.job_id, |job| job.action = action);
    }

    /// 在写终态之前调用
    pub fn settle(&self) {
        self.registry
            .update(self.repository_id, self.job.job_id, |job| job.settling = true);
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.registry.release(self.repository_id, self.job.job_id);
    }
}
