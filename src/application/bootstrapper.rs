//! Application bootstrapper
//!
//! Handles all initialization and setup for the Elder service.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::HeaderValue, middleware, Router};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::CONFIG;
use crate::db::{self, DbConn};
use crate::endpoints;
use crate::middleware::security_headers;
use crate::models::identity::{self, AuthProvider, IdentityType};
use crate::models::prelude::*;
use crate::services::{scheduler, security};
use crate::state::AppState;

/// Bootstrap and run the application
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Elder v{}", env!("CARGO_PKG_VERSION"));

    let conn = db::connect().await?;
    ensure_admin(&conn).await?;

    scheduler::start_scheduler(Arc::new(conn.clone()));

    let app = create_app(AppState::new(conn));

    serve(app).await
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("elder={},tower_http=info", CONFIG.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_ansi(false))
        .init();
}

/// Create the configured superuser on first start
///
/// Does nothing unless both `ELDER_ADMIN_USERNAME` and `ELDER_ADMIN_PASSWORD`
/// are set, or when the username already exists.
pub async fn ensure_admin(db: &DbConn) -> crate::error::Result<()> {
    let (Some(username), Some(password)) = (
        CONFIG.auth.admin_username.as_deref(),
        CONFIG.auth.admin_password.as_deref(),
    ) else {
        return Ok(());
    };

    let existing = Identity::find()
        .filter(identity::Column::Username.eq(username))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let now = Utc::now();
    identity::ActiveModel {
        identity_type: Set(IdentityType::Human),
        username: Set(username.to_string()),
        email: Set(CONFIG.auth.admin_email.clone()),
        full_name: Set(Some("Administrator".to_string())),
        hashed_password: Set(Some(security::hash_password(password)?)),
        auth_provider: Set(AuthProvider::Local),
        external_id: Set(None),
        is_active: Set(true),
        is_superuser: Set(true),
        last_login_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    tracing::info!(username, "Created bootstrap administrator");
    Ok(())
}

fn cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = CONFIG
        .server
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

/// Create the main application router
pub fn create_app(state: AppState) -> Router {
    endpoints::create_router(state)
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// Start the HTTP server
async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", CONFIG.server.host, CONFIG.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_until(listener, app, shutdown_signal()).await
}

/// Serve until `shutdown` resolves, then let in-flight requests finish
async fn serve_until(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
