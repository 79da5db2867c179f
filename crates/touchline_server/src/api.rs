//! API server

use crate::handler;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use touchline_core::MAX_LINE_BYTES;
use touchline_ingest::{MemoryStore, RedbStore, StateReducer, StateStore, StoreError};

/// Largest accepted request body: a maximal capture line plus room for
/// header fields the producer adds when re-encoding it.
pub const MAX_BODY_BYTES: usize = MAX_LINE_BYTES + 64 * 1024;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub host: IpAddr,
    /// Listen port
    pub port: u16,
    /// redb file for durable state; in-memory when unset
    pub store_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            store_path: None,
        }
    }
}

impl ServerConfig {
    /// Set the listen port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the listen address
    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Persist state to a redb file
    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Socket address to bind
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Open the configured store
    ///
    /// # Errors
    ///
    /// Returns error if the durable store cannot be opened
    pub fn open_store(&self) -> Result<Arc<dyn StateStore>, StoreError> {
        match &self.store_path {
            Some(path) => Ok(Arc::new(RedbStore::open(path)?)),
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// State store could not be opened
    #[error("failed to open state store: {0}")]
    Store(#[from] StoreError),

    /// Listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        source: std::io::Error,
    },

    /// Server loop failed
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    reducer: Arc<StateReducer>,
}

impl AppState {
    /// Build state around a store
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_reducer(StateReducer::new(store))
    }

    /// Build state around a configured reducer
    #[must_use]
    pub fn with_reducer(reducer: StateReducer) -> Self {
        Self {
            reducer: Arc::new(reducer),
        }
    }

    /// Reducer applied to incoming messages
    #[must_use]
    pub fn reducer(&self) -> &StateReducer {
        &self.reducer
    }
}

/// Ingestion router: `/heartbeat` and `/process-msg`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/heartbeat", post(handler::heartbeat))
        .route("/process-msg", post(handler::process_message))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Ingestion server
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Open the configured store and build the server
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store = config.open_store()?;
        Ok(Self::with_store(config, store))
    }

    /// Build the server over an existing store
    #[must_use]
    pub fn with_store(config: ServerConfig, store: Arc<dyn StateStore>) -> Self {
        let reducer = StateReducer::new(store).with_span(tracing::info_span!("ingest"));
        Self {
            config,
            state: AppState::with_reducer(reducer),
        }
    }

    /// Server configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound or the server fails
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        tracing::info!(
            %addr,
            durable = self.config.store_path.is_some(),
            "ingestion server listening"
        );

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        tracing::info!("ingestion server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
