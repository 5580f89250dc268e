pub mod error;
pub mod router;
pub mod shutdown;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};

use crate::config::ConfigStore;
use crate::server::router::build_router;
use crate::server::shutdown::ShutdownManager;
use crate::session::{SessionRegistry, SessionSettings};

pub use error::ApiError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address '{addr}': {source}")]
    InvalidBindAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("try_bind() must be called before run()")]
    NotBound,

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: ConfigStore,
}

pub struct Server {
    pub addr: SocketAddr,
    /// The bound listener. Populated by try_bind(), consumed by run().
    listener: Option<TcpListener>,
    bind_addr: String,
    state: AppState,
    shutdown: Arc<ShutdownManager>,
    reap_interval: Duration,
    shutdown_timeout: Duration,
}

impl Server {
    pub fn new(store: &ConfigStore) -> Self {
        let config = store.get();
        let registry = Arc::new(SessionRegistry::new(SessionSettings::from(&config.sessions)));
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)), // Determined at bind time
            listener: None,
            bind_addr: config.server.bind_addr.clone(),
            state: AppState {
                registry,
                config: store.clone(),
            },
            shutdown: Arc::new(ShutdownManager::new()),
            reap_interval: Duration::from_millis(config.sessions.reap_interval_ms),
            shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout_seconds),
        }
    }

    /// Bind the configured address. Port 0 picks a free port.
    pub async fn try_bind(&mut self) -> Result<SocketAddr, ServerError> {
        let addr: SocketAddr =
            self.bind_addr
                .parse()
                .map_err(|source| ServerError::InvalidBindAddr {
                    addr: self.bind_addr.clone(),
                    source,
                })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.addr = listener.local_addr()?;
        self.listener = Some(listener);
        tracing::info!("Server bound to {}", self.addr);
        Ok(self.addr)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.registry)
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), Arc::clone(&self.shutdown))
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Serve until Ctrl-C, SIGTERM or [`ServerHandle::shutdown`], then
    /// kill every session. SIGHUP reloads the config file.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.listener.ok_or(ServerError::NotBound)?;
        tracing::info!("Starting runbox server on {}", self.addr);

        let registry = Arc::clone(&self.state.registry);
        let reaper = {
            let shutdown = Arc::clone(&self.shutdown);
            registry.spawn_reaper(self.reap_interval, async move { shutdown.signaled().await })
        };
        let reloader = tokio::spawn(reload_on_hangup(
            self.state.config.clone(),
            Arc::clone(&self.shutdown),
        ));

        let app = build_router(self.state.clone(), Arc::clone(&self.shutdown));
        let shutdown = Arc::clone(&self.shutdown);
        let sessions = Arc::clone(&registry);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(err) = shutdown.wait_for_shutdown().await {
                    tracing::warn!("Signal handlers unavailable: {err}");
                    shutdown.signaled().await;
                }
                sessions.shutdown();
            })
            .await?;

        self.shutdown.wait_for_requests(self.shutdown_timeout).await;
        if let Err(err) = reaper.await {
            tracing::warn!("Session reaper failed: {err}");
        }
        if let Err(err) = reloader.await {
            tracing::warn!("Config reloader failed: {err}");
        }
        tracing::info!("Shut down gracefully");

        Ok(())
    }
}

/// Re-read the config file on every SIGHUP until shutdown. Session limits
/// and the bind address are fixed at startup; `[toolchain]` changes apply
/// to the next `/run` request.
async fn reload_on_hangup(store: ConfigStore, shutdown: Arc<ShutdownManager>) {
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(err) => {
            tracing::warn!("SIGHUP handler unavailable, config reload disabled: {err}");
            return;
        }
    };
    loop {
        tokio::select! {
            _ = shutdown.signaled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                match store.reload() {
                    Ok(()) => tracing::info!(path = %store.path().display(), "Config reloaded"),
                    Err(err) => tracing::warn!("Config reload failed, keeping previous config: {err}"),
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<ShutdownManager>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shutdown.signal_shutdown();
    }
}
