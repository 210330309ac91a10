use std::path::{Path, PathBuf};
use crate::domain::value_objects::RepositoryId;

/// 工作副本目录布局：`<git_root>/<repository_id>/<repo_name>`
///
/// clone/pull 的判断和失败清理都依赖这个路径形状。
#[derive(Debug, Clone)]
pub struct WorkingCopyLayout {
    git_root: PathBuf,
}

impl WorkingCopyLayout {
    pub fn new(git_root: impl Into<PathBuf>) -> Self {
        Self {
            git_root: git_root.into(),
        }
    }

    pub fn git_root(&self) -> &Path {
        &self.git_root
    }

    /// 某个仓库独占的目录
    pub fn repository_dir(&self, id: RepositoryId) -> PathBuf {
        self.git_root.join(id.to_string())
    }

    pub fn working_copy(&self, id: RepositoryId, name: &str) -> PathBuf {
        self.repository_dir(id).join(name)
    }
}
