//! In-process event bus for server-level signals.
//!
//! The admin endpoint only *reports* that a shutdown was requested. Whoever
//! embeds the server decides what that means, either by registering a
//! synchronous handler with [`EventBus::subscribe`] or by awaiting
//! [`EventBus::shutdown_requested`].

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Name of the shutdown event, stable for anything matching on names.
pub const SHUTDOWN_REQUESTED: &str = "cli-server:shutdown-requested";

/// Events the server can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    ShutdownRequested,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ShutdownRequested => SHUTDOWN_REQUESTED,
        }
    }
}

impl std::fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

type Handler = Arc<dyn Fn(ServerEvent) + Send + Sync>;

struct Inner {
    handlers: RwLock<Vec<(ServerEvent, Handler)>>,
    tx: broadcast::Sender<ServerEvent>,
}

/// Cheaply cloneable publish point shared by the router and the embedder.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(Vec::new()),
                tx,
            }),
        }
    }

    /// Register `handler` for `event`. Handlers run synchronously, in
    /// registration order, on the task that emits.
    pub fn subscribe<F>(&self, event: ServerEvent, handler: F)
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event, Arc::new(handler)));
    }

    /// Receive every event emitted from now on.
    pub fn watch(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.tx.subscribe()
    }

    /// Resolves on the next shutdown request after this call.
    ///
    /// The subscription is taken eagerly, so a request that arrives before the
    /// future is first polled is not lost.
    pub fn shutdown_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.watch();
        async move {
            loop {
                match rx.recv().await {
                    Ok(ServerEvent::ShutdownRequested) => return,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "event watcher lagged");
                    }
                    // Unreachable while the bus is alive: Inner owns the sender.
                    Err(broadcast::error::RecvError::Closed) => {
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }

    /// Publish `event`. Returns how many synchronous handlers ran.
    ///
    /// With nobody listening the event is dropped.
    pub fn emit(&self, event: ServerEvent) -> usize {
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(registered, _)| *registered == event)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in &handlers {
            handler(event);
        }

        let watchers = self.inner.tx.send(event).unwrap_or(0);
        debug!(event = %event, handlers = handlers.len(), watchers, "emitted event");

        handlers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self
            .inner
            .handlers
            .read()
            .map(|h| h.len())
            .unwrap_or_default();
        f.debug_struct("EventBus")
            .field("handlers", &handlers)
            .field("watchers", &self.inner.tx.receiver_count())
            .finish()
    }
}
