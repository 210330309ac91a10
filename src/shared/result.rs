use crate::shared::error::LakesyncError;

/// 统一的 Result 类型别名
pub type Result<T> = std::result::Result<T, LakesyncError>;
