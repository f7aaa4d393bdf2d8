//! HTTP surface of the server.
//!
//! - `GET  /api/sessions` - list registered sessions
//! - `POST /api/sessions` - register a session for a path
//! - `POST /admin-api/commands` - out-of-band control (`shutdown`)
//! - `*    /api/specs/{specId}/...` - forwarded to the mounted [`SpecRouter`]
//! - anything else - the UI, falling back to its entry point

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Request, State},
    http::{uri::PathAndQuery, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::events::{EventBus, ServerEvent};
use crate::sessions::{Registration, Session, SessionRegistry};
use crate::spec::{PathMappingResolver, SpecContext, SpecRouter};

/// Upper bound on the body of every mutating endpoint.
pub const BODY_LIMIT: usize = 1024;

const SPEC_MOUNT: &str = "/api/specs";

/// Location of the bundled single-page UI.
#[derive(Debug, Clone)]
pub struct UiAssets {
    root: PathBuf,
}

impl UiAssets {
    /// `resource_root` is the resources directory; the UI lives in `react/`.
    pub fn new(resource_root: impl AsRef<FsPath>) -> Self {
        Self {
            root: resource_root.as_ref().join("react"),
        }
    }

    pub fn entry_point(&self) -> PathBuf {
        self.root.join("index.html")
    }

    /// Serves files under the UI root; unmatched paths get the entry point so
    /// the client-side router can take over.
    fn service(&self) -> ServeDir<ServeFile> {
        ServeDir::new(&self.root)
            .call_fallback_on_method_not_allowed(true)
            .fallback(ServeFile::new(self.entry_point()))
    }
}

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub events: EventBus,
    pub spec_router: Arc<dyn SpecRouter>,
    pub path_resolver: Arc<dyn PathMappingResolver>,
}

/// Build the application: API routes first, the UI as the fallback.
pub fn router(state: AppState, assets: &UiAssets) -> Router {
    Router::new()
        .route(
            "/api/sessions",
            get(list_sessions)
                .post(register_session)
                .layer(DefaultBodyLimit::max(BODY_LIMIT)),
        )
        .route(
            "/admin-api/commands",
            post(admin_command).layer(DefaultBodyLimit::max(BODY_LIMIT)),
        )
        .route("/api/specs/{spec_id}", any(forward_spec))
        .route("/api/specs/{spec_id}/", any(forward_spec))
        .route("/api/specs/{spec_id}/{*rest}", any(forward_spec))
        .with_state(state)
        .fallback_service(assets.service())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
struct SessionList {
    sessions: Vec<Session>,
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionList> {
    Json(SessionList {
        sessions: state.sessions.list(),
    })
}

#[derive(Debug, Deserialize)]
struct RegisterSession {
    path: String,
}

/// Body of `POST /api/sessions`. `path` is only echoed back for sessions that
/// already existed; clients depend on that shape.
#[derive(Debug, Serialize)]
struct SessionEnvelope {
    session: SessionView,
}

#[derive(Debug, Serialize)]
struct SessionView {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

impl From<Registration> for SessionView {
    fn from(registration: Registration) -> Self {
        match registration {
            Registration::Existing(session) => SessionView {
                id: session.id,
                path: Some(session.path),
            },
            Registration::Created(session) => SessionView {
                id: session.id,
                path: None,
            },
        }
    }
}

async fn register_session(
    State(state): State<AppState>,
    body: Result<Json<RegisterSession>, JsonRejection>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::from_rejection(rejection, BODY_LIMIT))?;
    let registration = state.sessions.get_or_create(&request.path);

    Ok(Json(SessionEnvelope {
        session: registration.into(),
    }))
}

#[derive(Debug, Deserialize)]
struct AdminCommand {
    #[serde(rename = "type", default)]
    command_type: Option<String>,
}

/// The shutdown event fires after the 204 is produced; the response is still
/// flushed because stopping the server drains in-flight connections.
async fn admin_command(
    State(state): State<AppState>,
    body: Result<Json<AdminCommand>, JsonRejection>,
) -> Response {
    let command = match body {
        Ok(Json(command)) => command,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return ApiError::from_rejection(rejection, BODY_LIMIT).into_response();
        }
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed admin command");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match command.command_type.as_deref() {
        Some("shutdown") => {
            info!("shutdown requested via admin api");
            let response = StatusCode::NO_CONTENT.into_response();
            state.events.emit(ServerEvent::ShutdownRequested);
            response
        }
        other => {
            warn!(command = ?other, "unrecognized admin command");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

async fn forward_spec(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Response {
    let Some(spec_id) = params.get("spec_id").cloned() else {
        return ApiError::BadRequest("missing spec id".to_string()).into_response();
    };

    let Some(session) = state.sessions.get(&spec_id) else {
        return ApiError::UnknownSpec(spec_id).into_response();
    };

    let paths = match state.path_resolver.resolve(&session).await {
        Ok(paths) => paths,
        Err(source) => return ApiError::PathResolution { spec_id, source }.into_response(),
    };

    let request = match strip_mount(request) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    debug!(spec_id = %spec_id, uri = %request.uri(), "forwarding to spec router");
    state
        .spec_router
        .handle(SpecContext::new(session, paths), request)
        .await
}

/// Rewrite the URI so the delegate sees paths relative to its mount point.
///
/// Works on the raw path so percent-encoding reaches the delegate untouched.
fn strip_mount(mut request: Request) -> Result<Request, ApiError> {
    let remainder = request
        .uri()
        .path()
        .strip_prefix(SPEC_MOUNT)
        .and_then(|p| p.strip_prefix('/'))
        .map(|p| p.find('/').map_or("/", |slash| &p[slash..]))
        .ok_or_else(|| ApiError::BadRequest(format!("path is not under {SPEC_MOUNT}")))?;

    let path_and_query = match request.uri().query() {
        Some(query) => format!("{remainder}?{query}"),
        None => remainder.to_string(),
    };

    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|e| ApiError::BadRequest(format!("invalid spec path: {e}")))?,
    );
    *request.uri_mut() = Uri::from_parts(parts)
        .map_err(|e| ApiError::BadRequest(format!("invalid spec path: {e}")))?;

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::WorkspacePathResolver;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const INDEX_HTML: &str = "<!doctype html><div id=\"root\"></div>";

    /// Reports what it was handed instead of serving anything real.
    struct EchoSpecRouter;

    #[async_trait]
    impl SpecRouter for EchoSpecRouter {
        async fn handle(&self, ctx: SpecContext, request: axum::extract::Request) -> Response {
            Json(serde_json::json!({
                "spec_id": ctx.spec_id,
                "cwd": ctx.paths.cwd,
                "captures": ctx.captures.captures_path(),
                "examples": ctx.example_requests.example_requests_path(),
                "method": request.method().as_str(),
                "uri": request.uri().to_string(),
            }))
            .into_response()
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl PathMappingResolver for FailingResolver {
        async fn resolve(&self, _session: &Session) -> std::io::Result<crate::spec::PathMapping> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    struct TestApp {
        router: Router,
        sessions: Arc<SessionRegistry>,
        events: EventBus,
        _resources: TempDir,
    }

    fn ui_resources() -> TempDir {
        let resources = TempDir::new().unwrap();
        let react = resources.path().join("react");
        std::fs::create_dir_all(react.join("static")).unwrap();
        std::fs::write(react.join("index.html"), INDEX_HTML).unwrap();
        std::fs::write(react.join("static").join("app.js"), "console.log(1);").unwrap();
        resources
    }

    fn setup_with_resolver(path_resolver: Arc<dyn PathMappingResolver>) -> TestApp {
        let resources = ui_resources();
        let sessions = Arc::new(SessionRegistry::new());
        let events = EventBus::new();
        let state = AppState {
            sessions: Arc::clone(&sessions),
            events: events.clone(),
            spec_router: Arc::new(EchoSpecRouter),
            path_resolver,
        };
        let router = router(state, &UiAssets::new(resources.path()));

        TestApp {
            router,
            sessions,
            events,
            _resources: resources,
        }
    }

    fn setup() -> TestApp {
        setup_with_resolver(Arc::new(WorkspacePathResolver))
    }

    fn json_post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, body) = send(router, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn count_shutdowns(events: &EventBus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        events.subscribe(ServerEvent::ShutdownRequested, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[tokio::test]
    async fn test_register_new_session_omits_path() {
        let app = setup();

        let (status, json) = send_json(
            &app.router,
            json_post("/api/sessions", r#"{"path": "/work/api"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({ "session": { "id": "1" } }));
    }

    #[tokio::test]
    async fn test_register_existing_session_includes_path() {
        let app = setup();
        send(&app.router, json_post("/api/sessions", r#"{"path": "/work/api"}"#)).await;

        for _ in 0..3 {
            let (status, json) = send_json(
                &app.router,
                json_post("/api/sessions", r#"{"path": "/work/api"}"#),
            )
            .await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(
                json,
                serde_json::json!({ "session": { "id": "1", "path": "/work/api" } })
            );
        }
        assert_eq!(app.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_list_sessions_in_creation_order() {
        let app = setup();
        for path in ["/a", "/b", "/c"] {
            let body = serde_json::json!({ "path": path }).to_string();
            send(&app.router, json_post("/api/sessions", body)).await;
        }

        let (status, json) = send_json(&app.router, get_request("/api/sessions")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            serde_json::json!({
                "sessions": [
                    { "id": "1", "path": "/a" },
                    { "id": "2", "path": "/b" },
                    { "id": "3", "path": "/c" },
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_list_sessions_empty() {
        let app = setup();
        let (status, json) = send_json(&app.router, get_request("/api/sessions")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({ "sessions": [] }));
    }

    #[tokio::test]
    async fn test_register_rejects_oversized_body() {
        let app = setup();
        let body = serde_json::json!({ "path": "x".repeat(2 * BODY_LIMIT) }).to_string();

        let (status, _) = send(&app.router, json_post("/api/sessions", body)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_body() {
        let app = setup();

        let (status, json) =
            send_json(&app.router, json_post("/api/sessions", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());

        let (status, _) = send(&app.router, json_post("/api/sessions", r#"{"cwd": "/a"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(app.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_command() {
        let app = setup();
        let shutdowns = count_shutdowns(&app.events);

        let (status, body) = send(
            &app.router,
            json_post("/admin-api/commands", r#"{"type": "shutdown"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_command_is_rejected() {
        let app = setup();
        let shutdowns = count_shutdowns(&app.events);

        for body in [r#"{"type": "reboot"}"#, r#"{"type": 5}"#, r#"{}"#, "garbage"] {
            let (status, response) =
                send(&app.router, json_post("/admin-api/commands", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
            assert!(response.is_empty());
        }

        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_command_fires_nothing() {
        let app = setup();
        let shutdowns = count_shutdowns(&app.events);
        let body = format!(
            r#"{{"type": "shutdown", "padding": "{}"}}"#,
            "x".repeat(2 * BODY_LIMIT)
        );

        let (status, _) = send(&app.router, json_post("/admin-api/commands", body)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmatched_path_serves_entry_point() {
        let app = setup();

        for uri in ["/", "/apis/1/dashboard", "/some/deep/client/route"] {
            let response = app.router.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "uri: {uri}");
            assert_eq!(
                response.headers().get(header::CONTENT_TYPE).unwrap(),
                "text/html"
            );
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], INDEX_HTML.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_static_asset_is_served() {
        let app = setup();

        let (status, body) = send(&app.router, get_request("/static/app.js")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"console.log(1);");
    }

    #[tokio::test]
    async fn test_spec_request_reaches_delegate_with_context() {
        let app = setup();
        app.sessions.get_or_create("/work/api");

        let (status, json) =
            send_json(&app.router, get_request("/api/specs/1/captures/abc?limit=2")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["spec_id"], "1");
        assert_eq!(json["cwd"], "/work/api");
        assert_eq!(json["captures"], "/work/api/.optic/captures");
        assert_eq!(json["examples"], "/work/api/.optic/api/example-requests");
        assert_eq!(json["method"], "GET");
        assert_eq!(json["uri"], "/captures/abc?limit=2");
    }

    #[tokio::test]
    async fn test_spec_root_is_forwarded() {
        let app = setup();
        app.sessions.get_or_create("/work/api");

        let request = Request::builder()
            .method(Method::PATCH)
            .uri("/api/specs/1")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send_json(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["method"], "PATCH");
        assert_eq!(json["uri"], "/");
    }

    #[tokio::test]
    async fn test_spec_root_with_trailing_slash_is_forwarded() {
        let app = setup();
        app.sessions.get_or_create("/work/api");

        let (status, json) = send_json(&app.router, get_request("/api/specs/1/?full=true")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["spec_id"], "1");
        assert_eq!(json["uri"], "/?full=true");
    }

    #[tokio::test]
    async fn test_unknown_spec_with_trailing_slash_is_not_found() {
        let app = setup();

        let (status, json) = send_json(&app.router, get_request("/api/specs/42/")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "unknown spec: 42");
    }

    #[tokio::test]
    async fn test_unknown_spec_is_not_found() {
        let app = setup();

        let (status, json) = send_json(&app.router, get_request("/api/specs/42/events")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "unknown spec: 42");
    }

    #[tokio::test]
    async fn test_path_resolution_failure() {
        let app = setup_with_resolver(Arc::new(FailingResolver));
        app.sessions.get_or_create("/work/api");

        let (status, json) = send_json(&app.router, get_request("/api/specs/1/events")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("denied"));
    }
}
