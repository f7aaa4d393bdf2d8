//! Listener lifecycle: port selection, start, graceful stop.
//!
//! ```text
//! Stopped --start--> Starting --bind ok--> Listening --stop--> Stopping --drained--> Stopped
//!                        '--bind failed--> Stopped
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::events::EventBus;
use crate::routes::{self, AppState, UiAssets};
use crate::sessions::SessionRegistry;
use crate::spec::{PathMappingResolver, SpecRouter, UnmountedSpecRouter, WorkspacePathResolver};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// Tried first; any free port is used if it cannot be bound.
    pub preferred_port: u16,
    /// Resources directory holding `react/index.html`.
    pub resource_root: PathBuf,
    pub jwt_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&cliconf::CliConfig::default())
    }
}

impl ServerConfig {
    /// Loopback on an ephemeral port, for tests and embedders that only care
    /// about the API.
    pub fn loopback(resource_root: impl Into<PathBuf>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            preferred_port: 0,
            resource_root: resource_root.into(),
            jwt_secret: None,
        }
    }
}

impl From<&cliconf::CliConfig> for ServerConfig {
    fn from(config: &cliconf::CliConfig) -> Self {
        Self {
            host: config.bind.host,
            preferred_port: config.bind.preferred_port,
            resource_root: config.paths.resource_root.clone(),
            jwt_secret: config.admin.jwt_secret.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

/// Returned by a successful [`CliServer::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedServer {
    pub port: u16,
}

struct Listener {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

/// Owns the session registry, the event bus and at most one listening socket.
pub struct CliServer {
    config: ServerConfig,
    sessions: Arc<SessionRegistry>,
    events: EventBus,
    spec_router: Arc<dyn SpecRouter>,
    path_resolver: Arc<dyn PathMappingResolver>,
    state: ServerState,
    listener: Option<Listener>,
}

impl CliServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(SessionRegistry::new()),
            events: EventBus::new(),
            spec_router: Arc::new(UnmountedSpecRouter),
            path_resolver: Arc::new(WorkspacePathResolver),
            state: ServerState::Stopped,
            listener: None,
        }
    }

    /// Mount the delegate for `/api/specs/{specId}`.
    pub fn with_spec_router(mut self, spec_router: Arc<dyn SpecRouter>) -> Self {
        self.spec_router = spec_router;
        self
    }

    pub fn with_path_resolver(mut self, path_resolver: Arc<dyn PathMappingResolver>) -> Self {
        self.path_resolver = path_resolver;
        self
    }

    /// Share an existing bus, e.g. one a test harness already subscribed to.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Read access to the registry; it can only grow through the HTTP API.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Address of the current listener, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|listener| listener.addr)
    }

    /// Build the application, bind, and start serving.
    ///
    /// Returns once the socket is accepting connections. If the ephemeral
    /// fallback cannot be bound either, the error is returned and the server
    /// goes back to `Stopped`.
    pub async fn start(&mut self) -> Result<StartedServer, ServerError> {
        if self.state != ServerState::Stopped {
            return Err(ServerError::AlreadyRunning(self.state));
        }
        self.state = ServerState::Starting;

        let app = routes::router(
            AppState {
                sessions: Arc::clone(&self.sessions),
                events: self.events.clone(),
                spec_router: Arc::clone(&self.spec_router),
                path_resolver: Arc::clone(&self.path_resolver),
            },
            &UiAssets::new(&self.config.resource_root),
        );

        let listener = match bind(self.config.host, self.config.preferred_port).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state = ServerState::Stopped;
                return Err(e);
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                self.state = ServerState::Stopped;
                return Err(ServerError::Bind {
                    addr: SocketAddr::new(self.config.host, self.config.preferred_port),
                    source,
                });
            }
        };

        let shutdown = CancellationToken::new();
        let shutdown_srv = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_srv.cancelled().await;
                    debug!("listener shutdown signal received");
                })
                .await
        });

        self.listener = Some(Listener {
            addr,
            shutdown,
            task,
        });
        self.state = ServerState::Listening;

        info!(%addr, "cli server listening");
        Ok(StartedServer { port: addr.port() })
    }

    /// Close the listener and wait for in-flight connections to drain.
    ///
    /// A no-op when not listening. Errors while closing are logged and
    /// swallowed so shutdown always completes.
    pub async fn stop(&mut self) {
        let Some(listener) = self.listener.take() else {
            debug!("stop requested while not listening");
            return;
        };
        self.state = ServerState::Stopping;

        listener.shutdown.cancel();
        match listener.task.await {
            Ok(Ok(())) => info!(addr = %listener.addr, "cli server stopped"),
            Ok(Err(e)) => error!(addr = %listener.addr, error = %e, "error while closing listener"),
            Err(e) => error!(addr = %listener.addr, error = %e, "listener task failed"),
        }

        self.state = ServerState::Stopped;
    }
}

impl Drop for CliServer {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.shutdown.cancel();
        }
    }
}

/// Bind `preferred` on `host`, or any free port if that fails.
async fn bind(host: IpAddr, preferred: u16) -> Result<TcpListener, ServerError> {
    if preferred != 0 {
        match TcpListener::bind((host, preferred)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(
                    port = preferred,
                    error = %e,
                    "preferred port unavailable, using an ephemeral port"
                );
            }
        }
    }

    TcpListener::bind((host, 0))
        .await
        .map_err(|source| ServerError::Bind {
            addr: SocketAddr::new(host, 0),
            source,
        })
}
