use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use crate::domain::access::Role;
use crate::domain::value_objects::RepositoryId;
use crate::presentation::dto::{CreateRepositoryRequest, RepositoryDto, SyncAcceptedDto};
use crate::presentation::extract::BearerToken;
use crate::presentation::routes::AppContext;
use crate::shared::error::LakesyncError;
use crate::shared::result::Result;

/// 列出所有仓库
pub async fn list_repositories(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<Vec<RepositoryDto>>> {
    let repos = ctx.repository_store.list_all().await?;
    let dtos: Vec<RepositoryDto> = repos.into_iter().map(Into::into).collect();

    Ok(Json(dtos))
}

pub async fn get_repository(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Json<RepositoryDto>> {
    let repo = ctx.repository_store
        .find_by_id(RepositoryId(id))
        .await?
        .ok_or_else(|| LakesyncError::RepositoryNotFound(id.to_string()))?;

    Ok(Json(repo.into()))
}

/// 登记仓库并派发 clone / pull，立即返回 202
///
/// 请求体无法解析时先鉴权，未认证的请求总是得到 401。
pub async fn create_repository(
    State(ctx): State<Arc<AppContext>>,
    token: BearerToken,
    payload: std::result::Result<Json<CreateRepositoryRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            ctx.dispatcher.authorize(token.credential(), Role::Member).await?;
            return Ok(rejection.into_response());
        }
    };

    let ticket = ctx
        .dispatcher
        .submit(&req.ssh, req.branch, token.credential())
        .await?;

    Ok((StatusCode::ACCEPTED, Json(SyncAcceptedDto::from(&ticket))).into_response())
}

pub async fn delete_repository(
    State(ctx): State<Arc<AppContext>>,
    token: BearerToken,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    ctx.dispatcher.delete(RepositoryId(id), token.credential()).await?;
    Ok(StatusCode::NO_CONTENT)
}
