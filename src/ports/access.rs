use async_trait::async_trait;
use crate::domain::access::{AccessDecision, Credential, Role};
use crate::shared::result::Result;

/// 鉴权接口
///
/// `Ok(Denied)` 表示明确拒绝；上游服务不可用时返回
/// `LakesyncError::AccessUpstream`，不能混为拒绝。
#[async_trait]
pub trait AccessPort: Send + Sync {
    async fn authorize(&self, credential: &Credential, required: Role) -> Result<AccessDecision>;
}
