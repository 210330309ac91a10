//! Git SSH 地址校验
//!
//! 只接受 `git@<host>:<path>.git` 形式的地址。所有检查都是线性扫描，
//! 不使用回溯匹配，长度上限在任何解析之前检查。

use std::fmt;

pub const MAX_URL_LENGTH: usize = 500;
pub const MAX_HOST_LENGTH: usize = 253;
pub const MAX_PATH_SEGMENTS: usize = 10;
const MAX_REPEATED_RUN: usize = 50;

const FORBIDDEN_CHARS: &[char] = &[
    ';', '|', '&', '$', '`', '\n', '\r', '(', ')', '<', '>', ' ', '\t',
];

/// 校验通过的 SSH 地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    pub host: String,
    pub path: String,
    /// 最后一段路径，即工作副本目录名
    pub name: String,
    pub original: String,
}

/// 失败种类，用于日志和安全排查
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Malformed,
    Injection,
    Lookalike,
    NotWhitelisted,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::Malformed => "malformed",
            ValidationKind::Injection => "injection",
            ValidationKind::Lookalike => "lookalike",
            ValidationKind::NotWhitelisted => "not_whitelisted",
        }
    }
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SshUrlError {
    #[error("SSH URL is empty")]
    Empty,

    #[error("SSH URL is too long ({0} characters, at most {MAX_URL_LENGTH} allowed)")]
    TooLong(usize),

    #[error("SSH URL contains a long run of repeated '.', '-' or '_' characters")]
    RepeatedRun,

    #[error("SSH URL contains forbidden character {0:?}")]
    ForbiddenCharacter(char),

    #[error("SSH URL contains a path traversal sequence")]
    PathTraversal,

    #[error("SSH URL contains a null byte")]
    NullByte,

    #[error("SSH URL must have the form git@<host>:<path>.git using ASCII letters, digits, '.', '-' and '/'")]
    Malformed,

    #[error("SSH host is too long ({0} characters, at most {MAX_HOST_LENGTH} allowed)")]
    HostTooLong(usize),

    #[error("SSH host {host} imitates allowed domain {allowed}")]
    LookalikeDomain { host: String, allowed: String },

    #[error("SSH host {0} is not an allowed domain")]
    DomainNotAllowed(String),

    #[error("SSH repository path is invalid: {0}")]
    InvalidPath(&'static str),
}

impl SshUrlError {
    pub fn kind(&self) -> ValidationKind {
        match self {
            SshUrlError::ForbiddenCharacter(_)
            | SshUrlError::PathTraversal
            | SshUrlError::NullByte => ValidationKind::Injection,
            SshUrlError::LookalikeDomain { .. } => ValidationKind::Lookalike,
            SshUrlError::DomainNotAllowed(_) => ValidationKind::NotWhitelisted,
            SshUrlError::Empty
            | SshUrlError::TooLong(_)
            | SshUrlError::RepeatedRun
            | SshUrlError::Malformed
            | SshUrlError::HostTooLong(_)
            | SshUrlError::InvalidPath(_) => ValidationKind::Malformed,
        }
    }
}

/// 校验 SSH 地址并拆出 host / path / name
pub fn validate(url: &str, allowed_domains: &[String]) -> Result<ValidatedUrl, SshUrlError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(SshUrlError::Empty);
    }

    let length = url.chars().count();
    if length > MAX_URL_LENGTH {
        return Err(SshUrlError::TooLong(length));
    }

    if has_repeated_run(url) {
        return Err(SshUrlError::RepeatedRun);
    }

    if let Some(c) = url.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(SshUrlError::ForbiddenCharacter(c));
    }

    if url.contains("../") || url.contains("/..") {
        return Err(SshUrlError::PathTraversal);
    }

    if url.contains('\0') {
        return Err(SshUrlError::NullByte);
    }

    let (host, path) = split_shape(url).ok_or(SshUrlError::Malformed)?;

    if host.len() > MAX_HOST_LENGTH {
        return Err(SshUrlError::HostTooLong(host.len()));
    }

    // 仿冒检查针对每个允许的域名，先于白名单匹配
    if let Some(allowed) = allowed_domains.iter().find(|allowed| imitates(host, allowed)) {
        return Err(SshUrlError::LookalikeDomain {
            host: host.to_string(),
            allowed: allowed.clone(),
        });
    }
    if !allowed_domains.iter().any(|allowed| allowed == host) {
        return Err(SshUrlError::DomainNotAllowed(host.to_string()));
    }

    let name = check_path(path)?;

    Ok(ValidatedUrl {
        host: host.to_string(),
        path: path.to_string(),
        name: name.to_string(),
        original: url.to_string(),
    })
}

fn has_repeated_run(url: &str) -> bool {
    let mut run = 0usize;
    for c in url.chars() {
        if matches!(c, '.' | '-' | '_') {
            run += 1;
            if run >= MAX_REPEATED_RUN {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// `git@<host>:<path>.git`，host 只允许 `[A-Za-z0-9.-]`，path 只允许 `[A-Za-z0-9./-]`
fn split_shape(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("git@")?;
    let (host, tail) = rest.split_once(':')?;
    let path = tail.strip_suffix(".git")?;

    let host_ok = !host.is_empty()
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-');
    let path_ok = !path.is_empty()
        && path
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'/');

    if host_ok && path_ok {
        Some((host, path))
    } else {
        None
    }
}

/// host 与白名单域名相似但不相等
fn imitates(host: &str, allowed: &str) -> bool {
    if host == allowed {
        return false;
    }

    host.ends_with(&format!(".{}", allowed))
        || host.ends_with(&format!("-{}", allowed))
        || host.ends_with(&format!("{}.", allowed))
        || host.starts_with(&format!("{}-", allowed))
        || host.starts_with(&format!("{}.", allowed))
        || host == allowed.replace('.', "-")
}

/// 校验仓库路径并返回最后一段
fn check_path(path: &str) -> Result<&str, SshUrlError> {
    if path.is_empty() {
        return Err(SshUrlError::InvalidPath("path is empty"));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(SshUrlError::InvalidPath("path must not start or end with '/'"));
    }
    if path.contains("//") {
        return Err(SshUrlError::InvalidPath("path must not contain '//'"));
    }

    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() > MAX_PATH_SEGMENTS {
        return Err(SshUrlError::InvalidPath("path has too many segments"));
    }
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(SshUrlError::InvalidPath("path segments must not be '.' or '..'"));
    }

    segments
        .last()
        .copied()
        .ok_or(SshUrlError::InvalidPath("path is empty"))
}
