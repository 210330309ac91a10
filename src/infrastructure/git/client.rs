use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use crate::ports::git::{GitOutput, GitPort};
use crate::shared::config::GitConfig;
use crate::shared::error::LakesyncError;
use crate::shared::result::Result;

/// Git 客户端实现（调用系统 git 命令）
pub struct GitCliClient {
    binary: PathBuf,
    ssh_key_path: Option<PathBuf>,
}

impl GitCliClient {
    pub fn new(config: &GitConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            ssh_key_path: config.ssh_key_path.clone(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);

        // 禁止交互式输入，否则没有凭证时子进程会一直挂起
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        let ssh_command = match &self.ssh_key_path {
            Some(key) => format!(
                "ssh -i '{}' -o IdentitiesOnly=yes -o BatchMode=yes",
                key.display()
            ),
            None => "ssh -o BatchMode=yes".to_string(),
        };
        cmd.env("GIT_SSH_COMMAND", ssh_command);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // 任务被取消（超时或关闭）时结束子进程
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(mut cmd: Command, operation: &str) -> Result<GitOutput> {
        let output = cmd.output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(LakesyncError::GitCommand(format!(
                "git {} failed ({}): {}",
                operation, output.status, stderr
            )));
        }

        debug!("git {} succeeded", operation);
        Ok(GitOutput { stdout, stderr })
    }
}

#[async_trait]
impl GitPort for GitCliClient {
    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<GitOutput> {
        let mut cmd = self.command();
        cmd.arg("clone").arg("--").arg(url).arg(dest);
        Self::run(cmd, "clone").await
    }

    async fn pull_repository(&self, path: &Path) -> Result<GitOutput> {
        let mut cmd = self.command();
        cmd.arg("-C").arg(path).arg("pull").arg("--ff-only");
        Self::run(cmd, "pull").await
    }
}
