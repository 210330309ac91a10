use axum::{Router, routing::get};
use std::sync::Arc;
use crate::ports::repository::RepositoryPort;
use crate::presentation::handlers;
use crate::services::dispatcher::SyncDispatcher;

/// 应用状态
pub struct AppContext {
    pub repository_store: Arc<dyn RepositoryPort>,
    pub dispatcher: Arc<SyncDispatcher>,
}

/// 创建应用路由
pub fn create_app_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route(
            "/repositories",
            get(handlers::repository::list_repositories).post(handlers::repository::create_repository),
        )
        .route(
            "/repositories/",
            get(handlers::repository::list_repositories).post(handlers::repository::create_repository),
        )
        .route(
            "/repositories/{id}",
            get(handlers::repository::get_repository).delete(handlers::repository::delete_repository),
        )
        .with_state(ctx)
}
