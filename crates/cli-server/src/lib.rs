//! cli-server - local development server
//!
//! This library provides:
//! - `sessions`: path-keyed session registry
//! - `events`: in-process event bus (admin shutdown requests)
//! - `routes`: the HTTP surface and the static UI fallback
//! - `spec`: contract for the router mounted at `/api/specs/{specId}`
//! - `server`: listener lifecycle (port selection, start, graceful stop)
//! - `telemetry`: tracing subscriber and optional OTLP export

pub mod error;
pub mod events;
pub mod routes;
pub mod server;
pub mod sessions;
pub mod spec;
pub mod telemetry;

pub use error::{ApiError, ServerError};
pub use events::{EventBus, ServerEvent, SHUTDOWN_REQUESTED};
pub use server::{CliServer, ServerConfig, ServerState, StartedServer};
pub use sessions::{Registration, Session, SessionRegistry};
pub use spec::{
    CapturesHelpers, ExampleRequestsHelpers, PathMapping, PathMappingResolver, SpecContext,
    SpecRouter, UnmountedSpecRouter, WorkspacePathResolver,
};
