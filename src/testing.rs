//! 测试用的内存替身

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use crate::domain::access::{AccessDecision, Credential, Role};
use crate::ports::access::AccessPort;
use crate::ports::git::{GitOutput, GitPort};
use crate::shared::error::LakesyncError;
use crate::shared::result::Result;

/// 不访问网络的 git 替身
///
/// clone 先建出目标目录（模拟半成品），等待 `delay` 后再决定成败。
#[derive(Default)]
pub struct FakeGit {
    fail_clone: bool,
    fail_pull: bool,
    delay: Duration,
    clones: AtomicUsize,
    pulls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    /// 路径 -> (当前数量, 历史最大值)
    per_path: Mutex<HashMap<PathBuf, (usize, usize)>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_clone(mut self) -> Self {
        self.fail_clone = true;
        self
    }

    pub fn failing_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn clones(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// 同一路径上同时运行的 git 操作的最大数量
    pub fn max_active_on(&self, path: &Path) -> usize {
        self.per_path
            .lock()
            .unwrap()
            .get(path)
            .map(|(_, max)| *max)
            .unwrap_or(0)
    }

    fn enter(&self, path: &Path) -> ActiveGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let mut per_path = self.per_path.lock().unwrap();
        let (current, max) = per_path.entry(path.to_path_buf()).or_default();
        *current += 1;
        *max = (*max).max(*current);

        ActiveGuard { git: self, path: path.to_path_buf() }
    }
}

struct ActiveGuard<'a> {
    git: &'a FakeGit,
    path: PathBuf,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.git.active.fetch_sub(1, Ordering::SeqCst);
        if let Some((current, _)) = self.git.per_path.lock().unwrap().get_mut(&self.path) {
            *current -= 1;
        }
    }
}

#[async_trait]
impl GitPort for FakeGit {
    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<GitOutput> {
        let _guard = self.enter(dest);

        if dest.exists() {
            return Err(LakesyncError::GitCommand(format!(
                "fatal: destination path '{}' already exists and is not an empty directory.",
                dest.display()
            )));
        }
        tokio::fs::create_dir_all(dest.join(".git")).await?;
        tokio::time::sleep(self.delay).await;
        self.clones.fetch_add(1, Ordering::SeqCst);

        if self.fail_clone {
            return Err(LakesyncError::GitCommand(format!(
                "git clone failed (exit status: 128): fatal: Could not read from remote repository {}",
                url
            )));
        }
        Ok(GitOutput::default())
    }

    async fn pull_repository(&self, path: &Path) -> Result<GitOutput> {
        let _guard = self.enter(path);

        tokio::time::sleep(self.delay).await;
        self.pulls.fetch_add(1, Ordering::SeqCst);

        if !path.exists() {
            return Err(LakesyncError::GitCommand(format!(
                "fatal: cannot change to '{}': No such file or directory",
                path.display()
            )));
        }
        if self.fail_pull {
            return Err(LakesyncError::GitCommand(
                "git pull failed (exit status: 1): fatal: Not possible to fast-forward, aborting.".to_string(),
            ));
        }
        Ok(GitOutput {
            stdout: "Already up to date.".to_string(),
            stderr: String::new(),
        })
    }
}

/// 可控的鉴权替身
pub enum FakeAccess {
    Role(Role),
    Unreachable,
}

#[async_trait]
impl AccessPort for FakeAccess {
    async fn authorize(&self, _credential: &Credential, required: Role) -> Result<AccessDecision> {
        match self {
            FakeAccess::Role(role) if role.satisfies(required) => Ok(AccessDecision::Granted),
            FakeAccess::Role(_) => Ok(AccessDecision::Denied),
            FakeAccess::Unreachable => Err(LakesyncError::AccessUpstream(
                "team membership lookup timed out".to_string(),
            )),
        }
    }
}
