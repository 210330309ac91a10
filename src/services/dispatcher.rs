use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::domain::access::{AccessDecision, Credential, Role};
use crate::domain::entities::Repository;
use crate::domain::layout::WorkingCopyLayout;
use crate::domain::ssh_url;
use crate::domain::value_objects::{RepositoryId, SyncAction, SyncStatus};
use crate::ports::access::AccessPort;
use crate::ports::repository::RepositoryPort;
use crate::services::in_flight::InFlightRegistry;
use crate::services::scheduler::{SubmitRejected, SyncHandle, SyncScheduler};
use crate::services::worker::{remove_dir, SyncTask};
use crate::shared::error::LakesyncError;
use crate::shared::result::Result;

/// 派发结果
#[derive(Debug)]
pub struct SyncTicket {
    pub repository_id: RepositoryId,
    pub action: SyncAction,
    pub job_id: Uuid,
    /// 已有同步在进行，本次请求并入该任务
    pub coalesced: bool,
    /// 新排队的任务才有句柄
    pub handle: Option<SyncHandle>,
}

/// 同步派发器 - 鉴权、校验、登记，然后把任务交给调度器
pub struct SyncDispatcher {
    repository_store: Arc<dyn RepositoryPort>,
    access: Arc<dyn AccessPort>,
    scheduler: Arc<SyncScheduler>,
    in_flight: Arc<InFlightRegistry>,
    layout: WorkingCopyLayout,
    allowed_domains: Vec<String>,
}

impl SyncDispatcher {
    pub fn new(
        repository_store: Arc<dyn RepositoryPort>,
        access: Arc<dyn AccessPort>,
        scheduler: Arc<SyncScheduler>,
        in_flight: Arc<InFlightRegistry>,
        layout: WorkingCopyLayout,
        allowed_domains: Vec<String>,
    ) -> Self {
        Self {
            repository_store,
            access,
            scheduler,
            in_flight,
            layout,
            allowed_domains,
        }
    }

    /// 提交同步请求，不等待 git 执行
    pub async fn submit(
        &self,
        ssh: &str,
        branch: Option<String>,
        credential: Option<&Credential>,
    ) -> Result<SyncTicket> {
        self.authorize(credential, Role::Member).await?;

        let url = ssh_url::validate(ssh, &self.allowed_domains).map_err(|e| {
            warn!(kind = %e.kind(), "Rejected SSH URL: {}", e);
            e
        })?;

        let repository_id = match self.repository_store.find_by_ssh(&url.original).await? {
            Some(existing) => existing.id,
            None => {
                let repo = Repository::new(url.original.clone()).with_branch(branch.clone());
                let id = self.repository_store.insert_or_get(&repo).await?;
                info!(repository_id = %id, host = %url.host, path = %url.path, "Registered repository {}", url.original);
                id
            }
        };

        let path = self.layout.working_copy(repository_id, &url.name);
        let action = action_for(&path).await?;

        let mut claim = loop {
            let released = self.in_flight.released();
            match self.in_flight.try_claim(repository_id, Uuid::new_v4(), action) {
                Ok(claim) => break claim,
                // 上一个任务已在写终态，不能并入，等它释放
                Err(running) if running.settling => {
                    debug!(%repository_id, job_id = %running.job_id, "Previous sync settling, waiting for release");
                    released.await;
                }
                Err(running) => {
                    info!(
                        %repository_id,
                        job_id = %running.job_id,
                        action = %running.action,
                        "Sync already in flight, coalescing request"
                    );
                    return Ok(SyncTicket {
                        repository_id,
                        action: running.action,
                        job_id: running.job_id,
                        coalesced: true,
                        handle: None,
                    });
                }
            }
        };

        // 登记前上一个任务可能刚建出或删掉目录；持有登记后目录不会再被别的任务改动
        let action = action_for(&path).await?;
        if action != claim.action() {
            claim.set_action(action);
        }
        let job_id = claim.job_id();

        // 持有登记时写 updating，终态写入也只会发生在登记释放之前
        if !self
            .repository_store
            .mark_updating(repository_id, branch.as_deref())
            .await?
        {
            return Err(LakesyncError::RepositoryNotFound(repository_id.to_string()));
        }

        let task = match action {
            SyncAction::Clone => SyncTask::Clone {
                url: url.original.clone(),
                path,
            },
            SyncAction::Pull => SyncTask::Pull { path },
        };

        match self.scheduler.submit(task, claim) {
            Ok(handle) => {
                info!(%repository_id, %job_id, %action, "Sync dispatched");
                Ok(SyncTicket {
                    repository_id,
                    action,
                    job_id,
                    coalesced: false,
                    handle: Some(handle),
                })
            }
            Err(SubmitRejected { error, claim }) => {
                warn!(%repository_id, %job_id, "Sync could not be scheduled: {}", error);
                claim.settle();
                self.repository_store
                    .finish_sync(repository_id, SyncStatus::Failed)
                    .await?;
                drop(claim);
                Err(error)
            }
        }
    }

    /// 删除仓库记录和工作副本
    pub async fn delete(&self, repository_id: RepositoryId, credential: Option<&Credential>) -> Result<()> {
        self.authorize(credential, Role::Maintainer).await?;

        let repo = self
            .repository_store
            .find_by_id(repository_id)
            .await?
            .ok_or_else(|| LakesyncError::RepositoryNotFound(repository_id.to_string()))?;

        remove_dir(&self.layout.repository_dir(repo.id)).await;

        if !self.repository_store.delete(repo.id).await? {
            return Err(LakesyncError::RepositoryNotFound(repository_id.to_string()));
        }
        info!(%repository_id, "Deleted repository {}", repo.ssh);
        Ok(())
    }

    /// 缺少凭据为 401，权限不足为 403，鉴权后端出错原样返回
    pub async fn authorize(&self, credential: Option<&Credential>, role: Role) -> Result<()> {
        let credential = credential.ok_or(LakesyncError::Unauthenticated)?;

        match self.access.authorize(credential, role).await {
            Ok(AccessDecision::Granted) => Ok(()),
            Ok(AccessDecision::Denied) => Err(LakesyncError::PermissionDenied(role)),
            Err(e) => {
                error!("Authorization check failed: {}", e);
                Err(e)
            }
        }
    }
}

async fn action_for(path: &Path) -> Result<SyncAction> {
    Ok(if tokio::fs::try_exists(path).await? {
        SyncAction::Pull
    } else {
        SyncAction::Clone
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use crate::infrastructure::sqlite::repository_repo::SqliteRepositoryRepository;
    use crate::infrastructure::sqlite::test_pool;
    use crate::services::worker::SyncWorker;
    use crate::shared::config::SyncConfig;
    use crate::testing::{FakeAccess, FakeGit};

    const SSH: &str = "git@github.com:eawag/Meteostation.git";

    struct Harness {
        dir: tempfile::TempDir,
        store: Arc<SqliteRepositoryRepository>,
        git: Arc<FakeGit>,
        registry: Arc<InFlightRegistry>,
        dispatcher: SyncDispatcher,
    }

    async fn harness(git: FakeGit, access: FakeAccess) -> Harness {
        harness_with(git, access, SyncConfig::default()).await
    }

    async fn harness_with(git: FakeGit, access: FakeAccess, config: SyncConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteRepositoryRepository::new(test_pool(dir.path()).await));
        let git = Arc::new(git);
        let worker = Arc::new(SyncWorker::new(store.clone(), git.clone(), Duration::from_secs(10)));
        let scheduler = Arc::new(SyncScheduler::start(
            worker,
            &config,
            CancellationToken::new(),
        ));
        let registry = InFlightRegistry::new();
        let dispatcher = SyncDispatcher::new(
            store.clone(),
            Arc::new(access),
            scheduler,
            registry.clone(),
            WorkingCopyLayout::new(dir.path().join("git")),
            vec!["github.com".to_string()],
        );
        Harness { dir, store, git, registry, dispatcher }
    }

    fn token() -> Credential {
        Credential::new("secret")
    }

    impl Harness {
        fn path(&self, id: RepositoryId) -> PathBuf {
            self.dir.path().join("git").join(id.to_string()).join("Meteostation")
        }

        async fn status(&self, id: RepositoryId) -> Option<SyncStatus> {
            self.store.find_by_id(id).await.unwrap().unwrap().status
        }

        async fn sync(&self, ssh: &str) -> SyncTicket {
            let mut ticket = self.dispatcher.submit(ssh, None, Some(&token())).await.unwrap();
            if let Some(handle) = ticket.handle.take() {
                handle.wait().await.unwrap();
            }
            ticket
        }
    }

    #[tokio::test]
    async fn test_resubmission_reuses_record_and_pulls() {
        let h = harness(FakeGit::new(), FakeAccess::Role(Role::Member)).await;

        let first = h.sync(SSH).await;
        assert_eq!(first.action, SyncAction::Clone);
        assert!(!first.coalesced);
        assert_eq!(h.status(first.repository_id).await, Some(SyncStatus::Success));
        assert!(h.path(first.repository_id).exists());

        let second = h.sync(SSH).await;
        assert_eq!(second.repository_id, first.repository_id);
        assert_eq!(second.action, SyncAction::Pull);
        assert_eq!(h.status(second.repository_id).await, Some(SyncStatus::Success));

        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
        assert_eq!(h.git.clones(), 1);
        assert_eq!(h.git.pulls(), 1);
    }

    #[tokio::test]
    async fn test_branch_is_stored() {
        let h = harness(FakeGit::new(), FakeAccess::Role(Role::Member)).await;

        let ticket = h
            .dispatcher
            .submit(SSH, Some("develop".into()), Some(&token()))
            .await
            .unwrap();
        let repo = h.store.find_by_id(ticket.repository_id).await.unwrap().unwrap();
        assert_eq!(repo.branch.as_deref(), Some("develop"));
    }

    #[tokio::test]
    async fn test_failed_clone_leaves_no_directory() {
        let h = harness(FakeGit::new().failing_clone(), FakeAccess::Role(Role::Member)).await;

        let ticket = h.sync(SSH).await;

        assert_eq!(h.status(ticket.repository_id).await, Some(SyncStatus::Failed));
        assert!(!h.path(ticket.repository_id).exists());
    }

    #[tokio::test]
    async fn test_failed_pull_keeps_working_copy() {
        let h = harness(FakeGit::new().failing_pull(), FakeAccess::Role(Role::Member)).await;

        let first = h.sync(SSH).await;
        std::fs::write(h.path(first.repository_id).join("data.csv"), "depth,temp\n").unwrap();

        let second = h.sync(SSH).await;
        assert_eq!(second.action, SyncAction::Pull);
        assert_eq!(h.status(second.repository_id).await, Some(SyncStatus::Failed));
        assert!(h.path(second.repository_id).join("data.csv").exists());
    }

    #[tokio::test]
    async fn test_invalid_url_has_no_side_effects() {
        let h = harness(FakeGit::new(), FakeAccess::Role(Role::Member)).await;

        for url in [
            "git@github.com:org/repo.git; rm -rf /",
            "git@github.com.evil.com:org/repo.git",
            "git@gitlab.com:org/repo.git",
            "git@github.com:org//repo.git",
        ] {
            let err = h.dispatcher.submit(url, None, Some(&token())).await.unwrap_err();
            assert!(matches!(err, LakesyncError::InvalidSshUrl(_)), "{}", url);
        }

        assert!(h.store.list_all().await.unwrap().is_empty());
        assert_eq!(h.git.clones(), 0);
    }

    #[tokio::test]
    async fn test_authorization_failures_have_no_side_effects() {
        let h = harness(FakeGit::new(), FakeAccess::Role(Role::Member)).await;
        let err = h.dispatcher.submit(SSH, None, None).await.unwrap_err();
        assert!(matches!(err, LakesyncError::Unauthenticated));

        let ticket = h.sync(SSH).await;
        let err = h
            .dispatcher
            .delete(ticket.repository_id, Some(&token()))
            .await
            .unwrap_err();
        assert!(matches!(err, LakesyncError::PermissionDenied(Role::Maintainer)));
        assert!(h.path(ticket.repository_id).exists());

        let h = harness(FakeGit::new(), FakeAccess::Unreachable).await;
        let err = h.dispatcher.submit(SSH, None, Some(&token())).await.unwrap_err();
        assert!(matches!(err, LakesyncError::AccessUpstream(_)));
        assert!(h.store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let h = harness(FakeGit::new(), FakeAccess::Role(Role::Maintainer)).await;

        let err = h.dispatcher.delete(RepositoryId(42), Some(&token())).await.unwrap_err();
        assert!(matches!(err, LakesyncError::RepositoryNotFound(_)));

        let ticket = h.sync(SSH).await;
        let id = ticket.repository_id;
        assert!(h.path(id).exists());

        h.dispatcher.delete(id, Some(&token())).await.unwrap();
        assert!(h.store.find_by_id(id).await.unwrap().is_none());
        assert!(!h.dir.path().join("git").join(id.to_string()).exists());

        let err = h.dispatcher.delete(id, Some(&token())).await.unwrap_err();
        assert!(matches!(err, LakesyncError::RepositoryNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_clone_once() {
        let h = harness(
            FakeGit::new().with_delay(Duration::from_millis(200)),
            FakeAccess::Role(Role::Member),
        )
        .await;
        let credential = token();

        let tickets = join_all(
            (0..16).map(|_| h.dispatcher.submit(SSH, None, Some(&credential))),
        )
        .await;

        let mut handles = Vec::new();
        let mut ids = Vec::new();
        for ticket in tickets {
            let mut ticket = ticket.unwrap();
            ids.push(ticket.repository_id);
            handles.extend(ticket.handle.take());
        }
        for handle in handles {
            handle.wait().await.unwrap();
        }

        let id = ids[0];
        assert!(ids.iter().all(|i| *i == id));
        assert_eq!(h.store.list_all().await.unwrap().len(), 1);
        assert_eq!(h.git.clones(), 1);
        assert_eq!(h.git.max_active_on(&h.path(id)), 1);
        assert_eq!(h.status(id).await, Some(SyncStatus::Success));
    }

    #[tokio::test]
    async fn test_resubmission_after_failure_is_scheduled() {
        let h = harness(
            FakeGit::new().failing_clone().with_delay(Duration::from_millis(100)),
            FakeAccess::Role(Role::Member),
        )
        .await;

        let first = h.dispatcher.submit(SSH, None, Some(&token())).await.unwrap();
        let id = first.repository_id;
        // 只看存储里的状态，不等句柄
        for _ in 0..500 {
            if h.status(id).await == Some(SyncStatus::Failed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.status(id).await, Some(SyncStatus::Failed));

        let second = h.dispatcher.submit(SSH, None, Some(&token())).await.unwrap();
        assert!(!second.coalesced);
        assert_ne!(second.job_id, first.job_id);
        assert_eq!(second.action, SyncAction::Clone);
        assert!(second.handle.is_some());
        assert_eq!(h.status(id).await, Some(SyncStatus::Updating));

        second.handle.unwrap().wait().await.unwrap();
        assert_eq!(h.git.clones(), 2);
    }

    #[tokio::test]
    async fn test_settling_job_is_not_joined() {
        let h = harness(FakeGit::new(), FakeAccess::Role(Role::Member)).await;
        let id = h.sync(SSH).await.repository_id;
        let credential = token();

        // 仍在执行的任务：并入
        let running = h.registry.try_claim(id, Uuid::new_v4(), SyncAction::Pull).unwrap();
        let ticket = h.dispatcher.submit(SSH, None, Some(&credential)).await.unwrap();
        assert!(ticket.coalesced);
        assert_eq!(ticket.job_id, running.job_id());
        assert!(ticket.handle.is_none());

        // 已写终态、尚未释放登记的任务：等释放后重新调度
        running.settle();
        let release = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(running);
        };
        let (ticket, ()) = tokio::join!(h.dispatcher.submit(SSH, None, Some(&credential)), release);
        let ticket = ticket.unwrap();
        assert!(!ticket.coalesced);
        assert_eq!(ticket.action, SyncAction::Pull);
        ticket.handle.unwrap().wait().await.unwrap();

        assert_eq!(h.git.pulls(), 1);
        assert_eq!(h.status(id).await, Some(SyncStatus::Success));
    }

    #[tokio::test]
    async fn test_full_queue_marks_record_failed() {
        let config = SyncConfig {
            workers: 1,
            queue_capacity: 1,
            timeout_secs: 60,
        };
        let h = harness_with(
            FakeGit::new().with_delay(Duration::from_secs(30)),
            FakeAccess::Role(Role::Member),
            config,
        )
        .await;

        h.dispatcher.submit(SSH, None, Some(&token())).await.unwrap();
        for _ in 0..500 {
            if h.git.active() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.git.active(), 1);
        h.dispatcher
            .submit("git@github.com:eawag/Thetis.git", None, Some(&token()))
            .await
            .unwrap();

        let err = h
            .dispatcher
            .submit("git@github.com:eawag/Kastanienbaum.git", None, Some(&token()))
            .await
            .unwrap_err();
        assert!(matches!(err, LakesyncError::QueueFull));

        let rejected = h
            .store
            .find_by_ssh("git@github.com:eawag/Kastanienbaum.git")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejected.status, Some(SyncStatus::Failed));
    }
}
