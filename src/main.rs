use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod shared;
mod domain;
mod ports;
mod infrastructure;
mod services;
mod presentation;
#[cfg(test)]
mod testing;

use domain::layout::WorkingCopyLayout;
use infrastructure::access::StaticTokenAccess;
use infrastructure::git::GitCliClient;
use infrastructure::sqlite::repository_repo::SqliteRepositoryRepository;
use ports::repository::RepositoryPort;
use presentation::routes::AppContext;
use services::dispatcher::SyncDispatcher;
use services::in_flight::InFlightRegistry;
use services::scheduler::SyncScheduler;
use services::worker::SyncWorker;
use shared::config::Config;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[clap(name = "lakesync")]
#[clap(version)]
#[clap(about = "Keeps server-side clones of lake monitoring data repositories in sync")]
pub struct Args {
    /// Configuration file (TOML); defaults are used when it does not exist
    #[clap(short, long, value_parser, default_value = "config.toml")]
    config: PathBuf,

    /// SQLite database path
    #[clap(short, long, value_parser)]
    db_path: Option<PathBuf>,

    /// Server bind address
    #[clap(short, long)]
    bind_address: Option<SocketAddr>,

    /// Filesystem root; working copies live under <root>/git
    #[clap(short = 'f', long = "filesystem", value_parser, value_name = "PATH")]
    filesystem_root: Option<PathBuf>,

    /// Log output format
    #[clap(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志，RUST_LOG 优先
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).pretty().init(),
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
    }

    // 加载配置
    let config = Config::from_args_and_file(
        &args.config,
        args.db_path.clone(),
        args.bind_address,
        args.filesystem_root.clone(),
    )
    .context("Failed to load configuration")?;

    info!("Starting lakesync...");
    info!("Configuration loaded: {:?}", config);

    // 初始化 SQLite 数据库
    let sqlite_pool = infrastructure::sqlite::create_pool(
        &config.database.sqlite_path,
        config.database.max_connections,
    )
    .await
    .with_context(|| format!("Failed to open {}", config.database.sqlite_path.display()))?;

    // 运行数据库迁移
    info!("Running database migrations...");
    infrastructure::sqlite::run_migrations(&sqlite_pool)
        .await
        .context("Database migration failed")?;
    info!("Database migrations completed");

    let repository_store: Arc<dyn RepositoryPort> =
        Arc::new(SqliteRepositoryRepository::new(sqlite_pool.clone()));
    services::recovery::recover_interrupted_syncs(&repository_store)
        .await
        .context("Failed to recover interrupted syncs")?;

    let layout = WorkingCopyLayout::new(config.storage.git_root());
    tokio::fs::create_dir_all(layout.git_root())
        .await
        .with_context(|| format!("Failed to create {}", layout.git_root().display()))?;

    // 启动同步工作者
    let worker = Arc::new(SyncWorker::new(
        repository_store.clone(),
        Arc::new(GitCliClient::new(&config.git)),
        Duration::from_secs(config.sync.timeout_secs),
    ));
    let scheduler = Arc::new(SyncScheduler::start(
        worker,
        &config.sync,
        CancellationToken::new(),
    ));

    let dispatcher = Arc::new(SyncDispatcher::new(
        repository_store.clone(),
        Arc::new(StaticTokenAccess::new(&config.access.tokens)),
        scheduler.clone(),
        InFlightRegistry::new(),
        layout,
        config.ssh.allowed_domains.clone(),
    ));

    let app_context = Arc::new(AppContext {
        repository_store,
        dispatcher,
    });

    let origins = config
        .server
        .cors_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid CORS origin in server.cors_origins")?;

    let app = presentation::routes::create_app_router(app_context)
        .layer(CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;

    info!("Server listening on {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    scheduler.shutdown().await;
    sqlite_pool.close().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server...");
}
