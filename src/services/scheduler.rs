use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use uuid::Uuid;
use crate::domain::value_objects::{RepositoryId, SyncStatus};
use crate::services::in_flight::InFlightClaim;
use crate::services::worker::{SyncOutcome, SyncTask, SyncWorker};
use crate::shared::config::SyncConfig;
use crate::shared::error::LakesyncError;
use crate::shared::result::Result;

/// 队列中的一个同步任务
pub struct SyncJob {
    pub job_id: Uuid,
    pub repository_id: RepositoryId,
    pub task: SyncTask,
    completion: oneshot::Sender<SyncOutcome>,
    // 任务结束（或被丢弃）时释放仓库登记
    claim: InFlightClaim,
}

/// 等待任务完成的句柄，调用方可以不等
#[derive(Debug)]
pub struct SyncHandle {
    pub job_id: Uuid,
    receiver: oneshot::Receiver<SyncOutcome>,
}

impl SyncHandle {
    pub async fn wait(self) -> Result<SyncOutcome> {
        self.receiver.await.map_err(|_| LakesyncError::SchedulerClosed)
    }
}

/// 任务未能入队，登记交还给调用方，由调用方在持有登记时收尾
#[derive(Debug)]
pub struct SubmitRejected {
    pub error: LakesyncError,
    pub claim: InFlightClaim,
}

/// 同步调度器 - 有界队列 + 固定数量的工作者
pub struct SyncScheduler {
    sender: mpsc::Sender<SyncJob>,
    receiver: Arc<Mutex<mpsc::Receiver<SyncJob>>>,
    worker: Arc<SyncWorker>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    /// 启动工作者
    pub fn start(worker: Arc<SyncWorker>, config: &SyncConfig, shutdown: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let tracker = TaskTracker::new();

        for idx in 0..config.workers {
            tracker.spawn(worker_loop(
                idx,
                Arc::clone(&worker),
                Arc::clone(&receiver),
                shutdown.clone(),
            ));
        }

        info!(
            "Sync scheduler started: {} workers, queue capacity {}",
            config.workers, config.queue_capacity
        );

        Self {
            sender,
            receiver,
            worker,
            tracker,
            shutdown,
        }
    }

    /// 提交任务，不等待执行
    pub fn submit(
        &self,
        task: SyncTask,
        claim: InFlightClaim,
    ) -> std::result::Result<SyncHandle, SubmitRejected> {
        if self.shutdown.is_cancelled() {
            return Err(SubmitRejected {
                error: LakesyncError::SchedulerClosed,
                claim,
            });
        }

        let (completion, receiver) = oneshot::channel();
        let job_id = claim.job_id();
        let job = SyncJob {
            job_id,
            repository_id: claim.repository_id(),
            task,
            completion,
            claim,
        };

        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => SubmitRejected {
                error: LakesyncError::QueueFull,
                claim: job.claim,
            },
            mpsc::error::TrySendError::Closed(job) => SubmitRejected {
                error: LakesyncError::SchedulerClosed,
                claim: job.claim,
            },
        })?;

        debug!(%job_id, "Sync job queued");
        Ok(SyncHandle { job_id, receiver })
    }

    /// 停止接收新任务，终止正在执行的 git 进程，把排队中的任务记为失败
    pub async fn shutdown(&self) {
        info!("Stopping sync scheduler...");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Ok(job) = receiver.try_recv() {
            let outcome = self
                .worker
                .abandon(&job.claim, &job.task, "service shutting down before the job started")
                .await;
            finish(job.claim, job.completion, outcome);
        }
        info!("Sync scheduler stopped");
    }
}

async fn worker_loop(
    idx: usize,
    worker: Arc<SyncWorker>,
    receiver: Arc<Mutex<mpsc::Receiver<SyncJob>>>,
    shutdown: CancellationToken,
) {
    debug!("Sync worker {} started", idx);

    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        let SyncJob {
            job_id,
            repository_id,
            task,
            completion,
            claim,
        } = job;

        let outcome = tokio::select! {
            outcome = worker.execute(&claim, &task) => outcome,
            _ = shutdown.cancelled() => {
                worker
                    .abandon(&claim, &task, "service shutting down, git process killed")
                    .await
            }
        };

        if outcome.status == SyncStatus::Failed {
            error!(
                %job_id,
                %repository_id,
                action = %outcome.action,
                "Sync job failed after {:?}: {}",
                outcome.elapsed,
                outcome.detail.as_deref().unwrap_or("unknown error")
            );
        } else {
            info!(%job_id, %repository_id, action = %outcome.action, "Sync job finished in {:?}", outcome.elapsed);
        }
        finish(claim, completion, outcome);
    }

    debug!("Sync worker {} stopped", idx);
}

fn finish(claim: InFlightClaim, completion: oneshot::Sender<SyncOutcome>, outcome: SyncOutcome) {
    // 先释放登记，等待方收到结果时可以立即提交下一次同步
    drop(claim);
    // 调用方不等待时接收端已被丢弃
    let _ = completion.send(outcome);
}
