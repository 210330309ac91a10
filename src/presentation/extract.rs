use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::convert::Infallible;
use crate::domain::access::Credential;

/// `Authorization: Bearer <token>` 中的令牌，缺失或格式不对时为 `None`
///
/// 缺少凭证交给派发器处理（返回 401），这里不直接拒绝。
#[derive(Debug)]
pub struct BearerToken(pub Option<Credential>);

impl BearerToken {
    pub fn credential(&self) -> Option<&Credential> {
        self.0.as_ref()
    }
}

fn parse(value: &str) -> Option<Credential> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| Credential::new(token))
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let credential = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse);
        Ok(BearerToken(credential))
    }
}
