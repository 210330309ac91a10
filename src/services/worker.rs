use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;
use crate::domain::value_objects::{RepositoryId, SyncAction, SyncStatus};
use crate::ports::git::{GitOutput, GitPort};
use crate::ports::repository::RepositoryPort;
use crate::services::in_flight::InFlightClaim;
use crate::shared::error::LakesyncError;
use crate::shared::result::Result;

/// 一次同步要做的事情
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTask {
    Clone { url: String, path: PathBuf },
    Pull { path: PathBuf },
}

impl SyncTask {
    pub fn action(&self) -> SyncAction {
        match self {
            SyncTask::Clone { .. } => SyncAction::Clone,
            SyncTask::Pull { .. } => SyncAction::Pull,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            SyncTask::Clone { path, .. } | SyncTask::Pull { path } => path,
        }
    }
}

/// 任务完成事件
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub job_id: Uuid,
    pub repository_id: RepositoryId,
    pub action: SyncAction,
    pub status: SyncStatus,
    /// 失败时为 git 的 stderr 或错误描述
    pub detail: Option<String>,
    pub elapsed: Duration,
}

/// 同步工作者 - 执行实际的 clone / pull
pub struct SyncWorker {
    repository_store: Arc<dyn RepositoryPort>,
    git_client: Arc<dyn GitPort>,
    timeout: Duration,
}

impl SyncWorker {
    pub fn new(
        repository_store: Arc<dyn RepositoryPort>,
        git_client: Arc<dyn GitPort>,
        timeout: Duration,
    ) -> Self {
        Self {
            repository_store,
            git_client,
            timeout,
        }
    }

    /// 执行一个任务并返回完成事件；终态写入是任务最后一个可见的步骤
    pub async fn execute(&self, claim: &InFlightClaim, task: &SyncTask) -> SyncOutcome {
        let started = Instant::now();
        let job_id = claim.job_id();
        let repository_id = claim.repository_id();
        let span = tracing::info_span!("sync", %job_id, %repository_id, action = %task.action());

        let result = async {
            match task {
                SyncTask::Clone { url, path } => self.run_clone(url, path, claim).await,
                SyncTask::Pull { path } => self.run_pull(path, claim).await,
            }
        }
        .instrument(span)
        .await;

        let (status, detail) = match result {
            Ok(()) => (SyncStatus::Success, None),
            Err(e) => (SyncStatus::Failed, Some(e.to_string())),
        };

        SyncOutcome {
            job_id,
            repository_id,
            action: task.action(),
            status,
            detail,
            elapsed: started.elapsed(),
        }
    }

    /// 任务没有跑完（服务关闭）时的收尾：记为失败，clone 清理目录
    ///
    /// 被取消的任务可能已经提交了 success，此时失败状态写不进去，目录保留。
    pub async fn abandon(&self, claim: &InFlightClaim, task: &SyncTask, reason: &str) -> SyncOutcome {
        let job_id = claim.job_id();
        let repository_id = claim.repository_id();
        warn!(%job_id, %repository_id, action = %task.action(), "Sync abandoned: {}", reason);

        let failed = self.record(claim, SyncStatus::Failed, task.path()).await;
        match task {
            SyncTask::Clone { path, .. } if failed => remove_partial_clone(path).await,
            _ => {}
        }

        SyncOutcome {
            job_id,
            repository_id,
            action: task.action(),
            status: SyncStatus::Failed,
            detail: Some(reason.to_string()),
            elapsed: Duration::ZERO,
        }
    }

    /// clone 到 `path`；失败时先尽力删除残留目录，再记为 failed
    pub async fn run_clone(&self, url: &str, path: &Path, claim: &InFlightClaim) -> Result<()> {
        info!("Cloning {} into {}", url, path.display());

        let result = match path.parent() {
            Some(parent) => match tokio::fs::create_dir_all(parent).await {
                Ok(()) => self.with_timeout(self.git_client.clone_repository(url, path)).await,
                Err(e) => Err(LakesyncError::Io(e)),
            },
            None => Err(LakesyncError::Internal(format!(
                "Working copy path {} has no parent",
                path.display()
            ))),
        };

        match result {
            Ok(output) => {
                log_output(&output);
                info!("Clone finished");
                self.record(claim, SyncStatus::Success, path).await;
                Ok(())
            }
            Err(e) => {
                error!("Clone failed: {}", e);
                remove_partial_clone(path).await;
                self.record(claim, SyncStatus::Failed, path).await;
                Err(e)
            }
        }
    }

    /// 在已有工作副本上 pull；失败时保留原有目录
    pub async fn run_pull(&self, path: &Path, claim: &InFlightClaim) -> Result<()> {
        info!("Pulling {}", path.display());

        match self.with_timeout(self.git_client.pull_repository(path)).await {
            Ok(output) => {
                log_output(&output);
                info!("Pull finished");
                self.record(claim, SyncStatus::Success, path).await;
                Ok(())
            }
            Err(e) => {
                error!("Pull failed: {}", e);
                self.record(claim, SyncStatus::Failed, path).await;
                Err(e)
            }
        }
    }

    async fn with_timeout<F>(&self, operation: F) -> Result<GitOutput>
    where
        F: std::future::Future<Output = Result<GitOutput>>,
    {
        // 超时后 future 被 drop，子进程随之被 kill
        tokio::time::timeout(self.timeout, operation)
            .await
            .unwrap_or_else(|_| Err(LakesyncError::GitTimeout(self.timeout.as_secs())))
    }

    /// 写入终态，返回是否写入；记录在同步过程中被删除时顺带清理工作副本
    async fn record(&self, claim: &InFlightClaim, status: SyncStatus, path: &Path) -> bool {
        let repository_id = claim.repository_id();
        claim.settle();

        match self.repository_store.finish_sync(repository_id, status).await {
            Ok(true) => return true,
            Ok(false) => match self.repository_store.find_by_id(repository_id).await {
                Ok(None) => {
                    warn!("Repository was deleted during sync, removing working copy");
                    if let Some(dir) = path.parent() {
                        remove_dir(dir).await;
                    }
                }
                Ok(Some(repo)) => {
                    warn!(current = ?repo.status, "Status not updated to {}: record is not updating", status);
                }
                Err(e) => error!("Failed to look up repository after sync: {}", e),
            },
            Err(e) => error!("Failed to record sync status {}: {}", status, e),
        }
        false
    }
}

fn log_output(output: &GitOutput) {
    if !output.stdout.is_empty() {
        debug!("git stdout: {}", output.stdout);
    }
    if !output.stderr.is_empty() {
        debug!("git stderr: {}", output.stderr);
    }
}

async fn remove_partial_clone(path: &Path) {
    remove_dir(path).await;
}

/// 尽力删除目录，失败只记录日志
pub(crate) async fn remove_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => info!("Removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
