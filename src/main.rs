mod auth;
mod calendar;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod n8n;
mod navigation;
mod patients;
mod payments;
mod permissions;
mod reporting;
mod routes;
mod scheduling;
mod sessions;

use std::sync::Arc;
use std::time::Duration;

use crate::{config::Config, models::AppState, n8n::{N8nClient, WorkflowDirectory}};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;
    db::migrate(&pool).await?;

    if let Some((email, password)) = &cfg.bootstrap_superadmin {
        db::bootstrap_superadmin(&pool, email, password).await?;
    }

    let workflows: Option<Arc<dyn WorkflowDirectory>> = match (&cfg.n8n_base_url, &cfg.n8n_api_key) {
        (Some(url), Some(key)) => Some(Arc::new(N8nClient::new(url, key))),
        _ => {
            tracing::info!("n8n not configured, workflow listing disabled");
            None
        }
    };

    sessions::spawn_sweeper(pool.clone(), Duration::from_secs(cfg.session_sweep_interval_secs));

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        max_active_sessions: cfg.max_active_sessions,
        workflows,
    };

    // The panel is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
