use std::net::SocketAddr;
use std::sync::Arc;

use attendance::api::{AppState, middleware::log_request, routes};
use attendance::gateway::DbPersistenceGateway;
use attendance::roster::DbRosterProvider;
use attendance::store::DbSessionStateStore;
use attendance::{CoordinatorConfig, SessionDeps, SessionRegistry};
use axum::middleware::from_fn;
use migration::Migrator;
use sea_orm_migration::MigratorTrait;
use tower_http::cors::CorsLayer;
use tracing_appender::rolling;
use util::config::AppConfig;
use util::ws::WebSocketManager;

#[tokio::main]
async fn main() {
    let cfg = AppConfig::global().clone();
    let _log_guard = init_logging(&cfg);

    let db = db::connect(&cfg.database_path)
        .await
        .expect("Failed to connect to database");
    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    let deps = SessionDeps {
        gateway: Arc::new(DbPersistenceGateway::new(db.clone())),
        roster: Arc::new(DbRosterProvider::new(db.clone())),
        store: Arc::new(DbSessionStateStore::new(db.clone())),
    };
    let registry = SessionRegistry::new(CoordinatorConfig::from(&cfg), deps);
    let app_state = AppState::new(registry, WebSocketManager::new());

    match app_state.registry().recover_all().await {
        Ok(courses) if !courses.is_empty() => {
            tracing::info!("Recovered sessions for courses {:?}", courses)
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Session recovery failed: {}", e),
    }

    let app = routes(app_state)
        .layer(from_fn(log_request))
        .layer(CorsLayer::very_permissive());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .expect("Invalid address");

    println!("Starting {} on http://{}", cfg.project_name, addr);
    tracing::info!("Listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server crashed");
}

fn init_logging(cfg: &AppConfig) -> tracing_appender::non_blocking::WorkerGuard {
    use std::fs;
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    fs::create_dir_all("logs").ok();

    let file_appender = rolling::daily("logs", &cfg.log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(true);

    let env_filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone()));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if cfg.log_to_stdout {
        registry.with(stdout_layer).init();
    } else {
        registry.init();
    }

    guard
}
