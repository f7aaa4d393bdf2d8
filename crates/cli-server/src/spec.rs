//! Contract with the per-spec API router mounted at `/api/specs/{specId}`.
//!
//! The server resolves the session behind `specId`, derives its path mapping
//! and helper objects, and hands them to the delegate as an explicit
//! [`SpecContext`] together with the request.

use async_trait::async_trait;
use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

use crate::sessions::Session;

/// Well-known locations derived from a session's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathMapping {
    pub cwd: PathBuf,
    pub config_path: PathBuf,
    pub base_path: PathBuf,
    pub captures_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub spec_store_path: PathBuf,
    pub example_requests_path: PathBuf,
}

impl PathMapping {
    /// The `.optic` workspace layout rooted at `cwd`.
    pub fn for_workspace(cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        let base_path = cwd.join(".optic");
        Self {
            config_path: cwd.join("optic.yml"),
            captures_path: base_path.join("captures"),
            gitignore_path: base_path.join(".gitignore"),
            spec_store_path: base_path.join("api").join("specification.json"),
            example_requests_path: base_path.join("api").join("example-requests"),
            base_path,
            cwd,
        }
    }
}

/// Access to recorded captures under [`PathMapping::captures_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturesHelpers {
    captures_path: PathBuf,
}

impl CapturesHelpers {
    pub fn new(captures_path: impl Into<PathBuf>) -> Self {
        Self {
            captures_path: captures_path.into(),
        }
    }

    pub fn captures_path(&self) -> &Path {
        &self.captures_path
    }

    pub fn capture_dir(&self, capture_id: &str) -> PathBuf {
        self.captures_path.join(capture_id)
    }

    /// Ids of all captures on disk, sorted. A missing directory means none.
    pub async fn list_captures(&self) -> io::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.captures_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Access to saved example requests under [`PathMapping::example_requests_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleRequestsHelpers {
    example_requests_path: PathBuf,
}

impl ExampleRequestsHelpers {
    pub fn new(example_requests_path: impl Into<PathBuf>) -> Self {
        Self {
            example_requests_path: example_requests_path.into(),
        }
    }

    pub fn example_requests_path(&self) -> &Path {
        &self.example_requests_path
    }

    pub fn example_file(&self, request_id: &str) -> PathBuf {
        self.example_requests_path.join(format!("{request_id}.json"))
    }

    /// Examples saved for `request_id`. A missing file means none.
    pub async fn get_examples(&self, request_id: &str) -> io::Result<Vec<serde_json::Value>> {
        let bytes = match tokio::fs::read(self.example_file(request_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Everything a delegate needs to serve one spec-scoped request.
#[derive(Debug, Clone)]
pub struct SpecContext {
    pub spec_id: String,
    pub session: Session,
    pub paths: PathMapping,
    pub captures: CapturesHelpers,
    pub example_requests: ExampleRequestsHelpers,
}

impl SpecContext {
    pub fn new(session: Session, paths: PathMapping) -> Self {
        Self {
            spec_id: session.id.clone(),
            captures: CapturesHelpers::new(&paths.captures_path),
            example_requests: ExampleRequestsHelpers::new(&paths.example_requests_path),
            session,
            paths,
        }
    }
}

/// Derives a [`PathMapping`] for a session.
#[async_trait]
pub trait PathMappingResolver: Send + Sync + 'static {
    async fn resolve(&self, session: &Session) -> io::Result<PathMapping>;
}

/// Treats the session path as the workspace root.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspacePathResolver;

#[async_trait]
impl PathMappingResolver for WorkspacePathResolver {
    async fn resolve(&self, session: &Session) -> io::Result<PathMapping> {
        Ok(PathMapping::for_workspace(&session.path))
    }
}

/// The delegate mounted at `/api/specs/{specId}`.
///
/// `request` has the mount prefix stripped: a call to
/// `/api/specs/3/captures?limit=1` arrives as `/captures?limit=1`.
#[async_trait]
pub trait SpecRouter: Send + Sync + 'static {
    async fn handle(&self, ctx: SpecContext, request: Request) -> Response;
}

/// Placeholder delegate for a server started without a spec router.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnmountedSpecRouter;

#[async_trait]
impl SpecRouter for UnmountedSpecRouter {
    async fn handle(&self, ctx: SpecContext, _request: Request) -> Response {
        (
            StatusCode::NOT_IMPLEMENTED,
            Json(serde_json::json!({
                "error": format!("no spec router is mounted for spec {}", ctx.spec_id),
            })),
        )
            .into_response()
    }
}
