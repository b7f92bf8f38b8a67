use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    pool::ConnectionPool,
    proxy::HttpProxy,
    stream_service::{ServiceSettings, StreamService},
    upstream::{HttpUpstream, UpstreamClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-relay with config: {:?}", cfg);

    // --- Upstream connections ---
    let mut clients: Vec<Arc<dyn UpstreamClient>> = Vec::with_capacity(cfg.upstreams.len());
    for (index, base) in cfg.upstreams.iter().enumerate() {
        clients.push(Arc::new(HttpUpstream::new(base)?));
        tracing::info!(connection = index, %base, "upstream connection ready");
    }
    let pool = ConnectionPool::new(clients);
    anyhow::ensure!(!pool.is_empty(), "no upstream connections configured");

    // --- Reverse-proxy fallback ---
    let fallback = HttpProxy::new(cfg.proxy_origin.as_deref())?;
    match cfg.proxy_origin.as_deref() {
        Some(origin) => tracing::info!("Unrecognised paths are proxied to {}", origin),
        None => tracing::warn!("No proxy origin configured; unrecognised paths return 404"),
    }

    // --- Initialize core service ---
    let service = StreamService::new(
        pool,
        Arc::new(fallback),
        ServiceSettings {
            resolve_timeout: cfg.resolve_timeout,
            chunk_timeout: cfg.chunk_timeout,
            public_url: cfg.public_url.clone(),
        },
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
