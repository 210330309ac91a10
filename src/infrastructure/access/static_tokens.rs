use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;
use crate::domain::access::{AccessDecision, Credential, Role};
use crate::ports::access::AccessPort;
use crate::shared::config::TokenConfig;
use crate::shared::result::Result;

/// 基于配置文件中静态 token 的鉴权实现
pub struct StaticTokenAccess {
    tokens: HashMap<String, (String, Role)>,
}

impl StaticTokenAccess {
    pub fn new(tokens: &[TokenConfig]) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|t| (t.token.clone(), (t.name.clone(), t.role)))
                .collect(),
        }
    }
}

#[async_trait]
impl AccessPort for StaticTokenAccess {
    async fn authorize(&self, credential: &Credential, required: Role) -> Result<AccessDecision> {
        let Some((name, role)) = self.tokens.get(credential.as_str()) else {
            debug!("Unknown access token");
            return Ok(AccessDecision::Denied);
        };

        if role.satisfies(required) {
            debug!(caller = %name, %role, %required, "Access granted");
            Ok(AccessDecision::Granted)
        } else {
            debug!(caller = %name, %role, %required, "Access denied");
            Ok(AccessDecision::Denied)
        }
    }
}
