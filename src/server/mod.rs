//! HTTP/WebSocket server.
//!
//! One route matters: `/ws`, the signalling socket. Static browser assets
//! are served from `web_dir` as a plain fallback. HTTPS is a toggle that
//! loads a provided cert/key pair — `getUserMedia` requires a secure
//! context on anything but localhost.

pub mod ice;
pub mod signalling;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;

/// Shared server state.
#[derive(Clone)]
pub struct ServerState {
    pub cfg: Arc<Config>,
}

/// Start the gateway. Returns only on fatal startup failure (bind or
/// cert load) via the error path.
pub async fn start(
    host: &str,
    port: u16,
    https: bool,
    cert: Option<String>,
    key: Option<String>,
) -> Result<()> {
    let cfg = Arc::new(Config::from_env());
    let state = ServerState { cfg: cfg.clone() };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(signalling::ws_handler))
        .fallback_service(ServeDir::new(&cfg.web_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("invalid listen address")?;

    if https {
        let cert = cert.context("HTTPS enabled but no certificate path given")?;
        let key = key.context("HTTPS enabled but no key path given")?;
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
            .await
            .context("failed to load TLS certificate/key")?;
        info!("serving on https://{addr}");
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await
            .context("server error")?;
    } else {
        info!("serving on http://{addr}");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        axum::serve(listener, app).await.context("server error")?;
    }

    Ok(())
}
