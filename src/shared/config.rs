use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use crate::domain::access::Role;
use crate::shared::error::LakesyncError;
use crate::shared::result::Result;

/// 应用配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub ssh: SshConfig,
    pub git: GitConfig,
    pub sync: SyncConfig,
    pub access: AccessConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub sqlite_path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("lakesync.db"),
            max_connections: 10,
        }
    }
}

/// 存储配置，工作副本位于 `<filesystem_root>/git/<id>/<name>`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub filesystem_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            filesystem_root: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    /// 所有工作副本的根目录
    pub fn git_root(&self) -> PathBuf {
        self.filesystem_root.join("git")
    }
}

/// SSH 地址白名单
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SshConfig {
    pub allowed_domains: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            allowed_domains: vec!["github.com".to_string()],
        }
    }
}

/// Git 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    pub binary: PathBuf,
    pub ssh_key_path: Option<PathBuf>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
            ssh_key_path: None,
        }
    }
}

/// 同步任务配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            timeout_secs: 600,
        }
    }
}

/// 访问令牌配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessConfig {
    pub tokens: Vec<TokenConfig>,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    pub name: String,
    pub token: String,
    pub role: Role,
}

// 启动时会打印整个配置，token 不能出现在日志里
impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("name", &self.name)
            .field("token", &"***")
            .field("role", &self.role)
            .finish()
    }
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| LakesyncError::Config(e.to_string()))
    }

    /// 从命令行参数和文件加载配置
    pub fn from_args_and_file(
        config_path: &Path,
        db_path: Option<PathBuf>,
        bind_address: Option<SocketAddr>,
        filesystem_root: Option<PathBuf>,
    ) -> Result<Self> {
        let mut config = if config_path.exists() {
            Self::from_file(config_path)?
        } else {
            tracing::warn!(
                "Config file {} not found, using defaults",
                config_path.display()
            );
            Config::default()
        };

        // 命令行参数覆盖配置文件
        if let Some(db_path) = db_path {
            config.database.sqlite_path = db_path;
        }
        if let Some(bind_address) = bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(root) = filesystem_root {
            config.storage.filesystem_root = root;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ssh.allowed_domains.is_empty() {
            return Err(LakesyncError::Config(
                "ssh.allowed_domains must not be empty".to_string(),
            ));
        }
        if self.sync.workers == 0 || self.sync.queue_capacity == 0 {
            return Err(LakesyncError::Config(
                "sync.workers and sync.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.sync.timeout_secs == 0 {
            return Err(LakesyncError::Config(
                "sync.timeout_secs must be positive".to_string(),
            ));
        }
        if self.access.tokens.is_empty() {
            tracing::warn!("No access tokens configured, all write requests will be rejected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            filesystem_root = "/srv/lakes"

            [ssh]
            allowed_domains = ["github.com", "gitlab.renkulab.io"]

            [[access.tokens]]
            name = "ci"
            token = "secret"
            role = "maintainer"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.git_root(), PathBuf::from("/srv/lakes/git"));
        assert_eq!(config.ssh.allowed_domains.len(), 2);
        assert_eq!(config.sync.workers, 4);
        assert_eq!(config.access.tokens[0].role, Role::Maintainer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_args_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\nsqlite_path = \"from-file.db\"\n").unwrap();

        let config = Config::from_args_and_file(
            &path,
            Some(PathBuf::from("from-args.db")),
            None,
            Some(dir.path().to_path_buf()),
        )
        .unwrap();

        assert_eq!(config.database.sqlite_path, PathBuf::from("from-args.db"));
        assert_eq!(config.storage.filesystem_root, dir.path());
    }

    #[test]
    fn test_rejects_empty_whitelist_and_zero_workers() {
        let mut config = Config::default();
        config.ssh.allowed_domains.clear();
        assert!(matches!(config.validate(), Err(LakesyncError::Config(_))));

        let mut config = Config::default();
        config.sync.workers = 0;
        assert!(matches!(config.validate(), Err(LakesyncError::Config(_))));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync\nworkers = ").unwrap();

        let result = Config::from_args_and_file(&path, None, None, None);
        assert!(matches!(result, Err(LakesyncError::Config(_))));
    }

    #[test]
    fn test_debug_hides_tokens() {
        let token = TokenConfig {
            name: "ci".into(),
            token: "secret".into(),
            role: Role::Member,
        };
        let printed = format!("{:?}", token);
        assert!(printed.contains("ci"));
        assert!(!printed.contains("secret"));
    }
}
