use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{FromRef, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use yam_core::BuildConfig;

use crate::asset_log::AssetLog;
use crate::error::ServerError;
use crate::livereload::{DEFAULT_WINDOW, RELOAD_PATH, ReloadCoalescer, websocket_handler};
use crate::resolver::{RequestResolver, Resolved, decode_request_path};
use crate::watch::SourceWatcher;

/// Ports tried, counting the requested one.
pub const PORT_ATTEMPTS: u16 = 3;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// Open the site in the default browser once bound.
    pub open: bool,
    /// Report public assets nobody requested when the server stops.
    pub asset_logger: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            open: false,
            asset_logger: false,
        }
    }
}

#[derive(Clone)]
struct AppState {
    reload: ReloadCoalescer,
    resolver: Arc<RequestResolver>,
    asset_log: Option<Arc<AssetLog>>,
}

impl FromRef<AppState> for ReloadCoalescer {
    fn from_ref(state: &AppState) -> Self {
        state.reload.clone()
    }
}

pub struct DevServer {
    config: Arc<BuildConfig>,
    options: ServerOptions,
}

impl DevServer {
    pub fn new(config: Arc<BuildConfig>, options: ServerOptions) -> Self {
        Self { config, options }
    }

    /// Watch, serve and live-reload until Ctrl-C.
    pub async fn run(self) -> Result<(), ServerError> {
        let reload = ReloadCoalescer::new(DEFAULT_WINDOW);
        let watcher_reload = reload.clone();
        let _watcher = SourceWatcher::start(self.config.clone(), move || watcher_reload.notify())?;

        let (listener, addr) = bind(&self.options.host, self.options.port).await?;
        let asset_log = self.options.asset_logger.then(|| Arc::new(AssetLog::new()));

        let state = AppState {
            reload,
            resolver: Arc::new(RequestResolver::new(self.config.clone())),
            asset_log: asset_log.clone(),
        };
        let app = Router::new()
            .route(RELOAD_PATH, get(websocket_handler))
            .fallback(resolve_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let url = format!("http://{}:{}", self.options.host, addr.port());
        info!(%url, mode = self.config.mode.as_str(), "serving");

        if self.options.open
            && let Err(e) = open::that(&url)
        {
            warn!("failed to open browser: {e}");
        }

        tokio::select! {
            result = axum::serve(listener, app).into_future() => result?,
            _ = tokio::signal::ctrl_c() => info!("stopping"),
        }

        if let Some(log) = asset_log {
            log.report(&self.config.paths.public);
        }
        Ok(())
    }
}

/// Bind `port`, moving up one port at a time when it is taken.
pub async fn bind(host: &str, port: u16) -> Result<(TcpListener, SocketAddr), ServerError> {
    let mut last_error = None;

    for offset in 0..PORT_ATTEMPTS {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                let addr = listener.local_addr()?;
                if offset > 0 {
                    warn!(requested = port, port = candidate, "port in use, using the next one");
                }
                return Ok((listener, addr));
            }
            Err(e) => {
                debug!(port = candidate, "bind failed: {e}");
                last_error = Some(e);
            }
        }
    }

    Err(ServerError::Bind {
        host: host.to_string(),
        first: port,
        last: port.saturating_add(PORT_ATTEMPTS - 1),
        source: last_error.unwrap_or_else(|| std::io::ErrorKind::AddrInUse.into()),
    })
}

async fn resolve_handler(State(state): State<AppState>, uri: Uri) -> Response {
    let path = decode_request_path(uri.path());
    if let Some(log) = &state.asset_log {
        log.record(&path);
    }

    let resolver = state.resolver.clone();
    match tokio::task::spawn_blocking(move || resolver.resolve(&path)).await {
        Ok(resolved) => resolved.into_response(),
        Err(e) => {
            error!(uri = %uri, "request task failed: {e}");
            Resolved::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_moves_past_a_taken_port() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let (_listener, addr) = bind("127.0.0.1", port).await.unwrap();
        let offset = u32::from(addr.port()) - u32::from(port);
        assert!((1..u32::from(PORT_ATTEMPTS)).contains(&offset));
    }

    #[tokio::test]
    async fn test_bind_error_names_the_range() {
        let err = bind("256.0.0.1", 4000).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { first: 4000, last: 4002, .. }));
    }
}
