//! Main mock server implementation.
//!
//! Owns the listener, resolves requests through the [`RouteTable`], applies
//! simulated latency and renders the default response of the matched
//! endpoint.

use crate::config::{
    Configuration, EndpointDefinition, EndpointSummary, ResponseDefinition, ServerSettings,
};
use crate::delay::DelayEngine;
use crate::error::MockError;
use crate::loader::{ConfigLoader, ConfigSource};
use crate::request::MockRequest;
use crate::routes::RouteTable;
use crate::template::{TemplateContext, TemplateEngine};
use crate::watcher::ConfigWatcher;
use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http_body_util::LengthLimitError;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`MockServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerStatus {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl ServerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerStatus::Starting,
            2 => ServerStatus::Running,
            3 => ServerStatus::Stopping,
            _ => ServerStatus::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
        }
    }
}

/// A reply ready to be written, independent of the HTTP stack.
#[derive(Debug, Clone, PartialEq)]
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockReply {
    fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![(
                header::CONTENT_TYPE.as_str().to_string(),
                "application/json".to_string(),
            )],
            body: value.to_string(),
        }
    }

    fn error(err: &MockError) -> Self {
        Self::json(err.status(), &json!({ "error": err.message() }))
    }

    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl IntoResponse for MockReply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = Response::builder().status(status);

        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => {
                    let err =
                        MockError::ResponseWrite(format!("invalid header {}: {}", name, value));
                    warn!(error = %err, "Skipping response header");
                }
            }
        }

        match builder.body(Body::from(self.body)) {
            Ok(response) => response,
            Err(e) => {
                let err = MockError::ResponseWrite(e.to_string());
                error!(error = %err, "Failed to assemble response");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, "application/json")],
                    json!({ "error": err.to_string() }).to_string(),
                )
                    .into_response()
            }
        }
    }
}

/// State shared by every request handler.
struct ServerState {
    settings: ServerSettings,
    base_path: String,
    status: AtomicU8,
    table: Arc<ArcSwap<RouteTable>>,
    delay: DelayEngine,
    templates: TemplateEngine,
}

impl ServerState {
    fn status(&self) -> ServerStatus {
        ServerStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Strip the base path; `None` when the path lies outside it.
    fn strip_base_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.base_path.is_empty() {
            return Some(path);
        }
        let rest = path.strip_prefix(self.base_path.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    async fn dispatch(&self, request: MockRequest) -> MockReply {
        let table = self.table.load_full();

        let is_get = request.method == "GET";
        let local_path = self.strip_base_path(&request.path);
        if is_get && (request.path == "/" || local_path == Some("/")) {
            return self.root_summary(&table);
        }

        let not_found = || MockError::RouteNotFound {
            method: request.method.clone(),
            path: request.path.clone(),
        };

        let route = match local_path.and_then(|path| table.resolve(&request.method, path)) {
            Some(route) => route,
            None => return self.unmatched(not_found()),
        };
        let endpoint = route.endpoint;

        if endpoint.responses.is_empty() {
            return self.unmatched(not_found());
        }

        if let Some(matchers) = &endpoint.matchers {
            if !matchers.matches(&request) {
                return self.unmatched(MockError::PredicateMismatch);
            }
        }

        let Some(response) = endpoint.default_response() else {
            warn!(
                method = %endpoint.method,
                path = %endpoint.path,
                "No default response configured"
            );
            return MockReply::error(&MockError::NoDefaultResponse);
        };

        if self.settings.log_matches {
            info!(
                method = %request.method,
                path = %request.path,
                endpoint = %endpoint.path,
                response_id = %response.id,
                "Request matched endpoint"
            );
        }

        self.delay
            .apply(response, &request, &route.path_variables)
            .await;

        match self.render_body(response, &request, &route.path_variables) {
            Ok(body) => MockReply {
                status: response.status,
                headers: self.response_headers(response),
                body,
            },
            Err(e) => {
                error!(response_id = %response.id, error = %e, "Failed to generate body");
                MockReply::error(&e)
            }
        }
    }

    fn unmatched(&self, err: MockError) -> MockReply {
        if self.settings.log_unmatched {
            warn!(error = %err, "Request not served");
        }
        MockReply::error(&err)
    }

    fn response_headers(&self, response: &ResponseDefinition) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = response
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let has_content_type = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()));
        if !has_content_type {
            headers.push((
                header::CONTENT_TYPE.as_str().to_string(),
                self.settings.default_content_type.clone(),
            ));
        }
        headers
    }

    /// Literal body, then body template, then `{}`.
    fn render_body(
        &self,
        response: &ResponseDefinition,
        request: &MockRequest,
        path_variables: &HashMap<String, String>,
    ) -> Result<String, MockError> {
        if let Some(body) = &response.body {
            return match body {
                serde_json::Value::String(text) => Ok(text.clone()),
                other => serde_json::to_string(other).map_err(|e| MockError::Render(e.to_string())),
            };
        }

        if let Some(template) = &response.body_template {
            let ctx = TemplateContext::new(request, path_variables);
            return Ok(self
                .templates
                .render(response.body_template_engine, template, &ctx));
        }

        Ok("{}".to_string())
    }

    fn root_summary(&self, table: &RouteTable) -> MockReply {
        MockReply::json(
            200,
            &json!({
                "name": self.settings.name,
                "version": env!("CARGO_PKG_VERSION"),
                "status": self.status().as_str(),
                "endpoints": table.config().list_endpoints(),
            }),
        )
    }
}

async fn handle_request(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let limit = state.settings.max_body_bytes;
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            let over_limit = std::error::Error::source(&e)
                .is_some_and(|source| source.is::<LengthLimitError>());
            let err = if over_limit {
                MockError::BodyTooLarge { limit }
            } else {
                MockError::BodyRead(e.to_string())
            };
            warn!(method = %parts.method, uri = %parts.uri, error = %err, "Rejecting request");
            return MockReply::error(&err).into_response();
        }
    };

    let request = MockRequest::from_parts(&parts, body);
    debug!(method = %request.method, uri = %request.uri, "Handling request");
    state.dispatch(request).await.into_response()
}

struct RunningServer {
    address: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Configuration-driven mock HTTP server.
///
/// Dropping a running server closes the listener.
pub struct MockServer {
    state: Arc<ServerState>,
    source: Option<ConfigSource>,
    loader: ConfigLoader,
    watcher: Option<ConfigWatcher>,
    running: Mutex<Option<RunningServer>>,
}

impl MockServer {
    /// Create a server from a configuration source.
    ///
    /// An unreadable or invalid source yields a server without endpoints.
    pub fn new(settings: ServerSettings, source: ConfigSource, loader: ConfigLoader) -> Self {
        let (config, modified) = loader.load_or_empty(&source);
        Self::build(settings, config, modified, Some(source), loader)
    }

    /// Create a server from an already parsed configuration.
    ///
    /// Methods are normalized and the configuration is validated the same way
    /// a loaded document is.
    pub fn from_config(
        settings: ServerSettings,
        config: Configuration,
    ) -> Result<Self, MockError> {
        let loader = ConfigLoader::default();
        let config = loader.prepare(config)?;
        Ok(Self::build(settings, config, None, None, loader))
    }

    fn build(
        settings: ServerSettings,
        config: Configuration,
        modified: Option<std::time::SystemTime>,
        source: Option<ConfigSource>,
        loader: ConfigLoader,
    ) -> Self {
        let table = Arc::new(ArcSwap::from_pointee(RouteTable::new(config, modified)));

        let watcher = match source.as_ref().and_then(ConfigSource::path) {
            Some(path) if settings.auto_reload => Some(ConfigWatcher::new(
                path,
                Duration::from_millis(settings.reload_interval_ms.max(1)),
                loader.clone(),
                table.clone(),
            )),
            _ => None,
        };

        info!(
            endpoints = table.load().len(),
            auto_reload = watcher.is_some(),
            "Mock server initialized"
        );

        let state = ServerState {
            base_path: settings.normalized_base_path(),
            delay: DelayEngine::new(settings.default_delay_ms),
            templates: TemplateEngine::new(),
            status: AtomicU8::new(ServerStatus::Stopped as u8),
            table,
            settings,
        };

        Self {
            state: Arc::new(state),
            source,
            loader,
            watcher,
            running: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.state.status()
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.state.settings
    }

    fn transition(&self, from: ServerStatus, to: ServerStatus) -> Result<(), ServerStatus> {
        self.state
            .status
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ServerStatus::from_u8)
    }

    /// Bind the listener and start serving. Returns the bound address.
    ///
    /// Calling `start` on a running server returns its current address.
    pub async fn start(&self) -> Result<SocketAddr, MockError> {
        let mut running = self.running.lock().await;
        if let Err(current) = self.transition(ServerStatus::Stopped, ServerStatus::Starting) {
            return match (current, running.as_ref()) {
                (ServerStatus::Running, Some(server)) => Ok(server.address),
                (other, _) => Err(MockError::Busy(other.as_str())),
            };
        }

        let addr = format!("{}:{}", self.state.settings.host, self.state.settings.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state
                    .status
                    .store(ServerStatus::Stopped as u8, Ordering::SeqCst);
                return Err(MockError::Bind { addr, source });
            }
        };
        let address = listener.local_addr().map_err(|source| {
            self.state
                .status
                .store(ServerStatus::Stopped as u8, Ordering::SeqCst);
            MockError::Bind {
                addr: addr.clone(),
                source,
            }
        })?;

        let app = Router::new()
            .fallback(handle_request)
            .with_state(self.state.clone());
        let (shutdown, shutdown_signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                // Resolves on an explicit stop or when the sender is dropped
                let _ = shutdown_signal.await;
            });
            if let Err(e) = server.await {
                error!(error = %e, "Mock server listener failed");
            }
        });

        if let Some(watcher) = &self.watcher {
            watcher.start().await;
        }

        *running = Some(RunningServer {
            address,
            shutdown,
            handle,
        });
        self.state
            .status
            .store(ServerStatus::Running as u8, Ordering::SeqCst);
        info!(
            address = %address,
            base_path = %self.state.base_path,
            "Mock server started"
        );
        Ok(address)
    }

    /// Stop serving and wait for in-flight requests. Does nothing if stopped.
    pub async fn stop(&self) -> Result<(), MockError> {
        let mut running = self.running.lock().await;
        if let Err(current) = self.transition(ServerStatus::Running, ServerStatus::Stopping) {
            return match current {
                ServerStatus::Stopped => Ok(()),
                other => Err(MockError::Busy(other.as_str())),
            };
        }

        if let Some(watcher) = &self.watcher {
            watcher.stop().await;
        }

        if let Some(server) = running.take() {
            let _ = server.shutdown.send(());
            if let Err(e) = server.handle.await {
                error!(error = %e, "Mock server task ended abnormally");
            }
        }

        self.state
            .status
            .store(ServerStatus::Stopped as u8, Ordering::SeqCst);
        info!("Mock server stopped");
        Ok(())
    }

    /// Address of the listener while running.
    pub async fn address(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|s| s.address)
    }

    /// Base URI of the running server, e.g. `http://127.0.0.1:4372/base`.
    pub async fn uri(&self) -> Option<String> {
        let address = self.address().await?;
        Some(format!("http://{}{}", address, self.state.base_path))
    }

    /// Serve one request in-process, without going through the listener.
    pub async fn dispatch(&self, request: MockRequest) -> MockReply {
        self.state.dispatch(request).await
    }

    /// Re-read the configuration source and swap it in.
    ///
    /// On failure the current configuration stays active.
    pub async fn reload(&self) -> Result<(), MockError> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        let (config, modified) = self.loader.load_async(source).await?;
        self.state
            .table
            .store(Arc::new(RouteTable::new(config, modified)));
        info!("Configuration reloaded on request");
        Ok(())
    }

    /// Poll the watched file once; returns whether a new configuration was loaded.
    pub async fn check_for_changes(&self) -> Result<bool, MockError> {
        match &self.watcher {
            Some(watcher) => Ok(watcher.check_now().await?),
            None => Ok(false),
        }
    }

    /// The active configuration.
    pub fn configuration(&self) -> Arc<Configuration> {
        self.state.table.load().config().clone()
    }

    /// Registered `METHOD:path` keys of the active route index.
    pub fn route_keys(&self) -> Vec<String> {
        self.state.table.load().keys().map(String::from).collect()
    }

    /// Summaries of every configured endpoint.
    pub fn list_endpoints(&self) -> Vec<EndpointSummary> {
        self.configuration().list_endpoints()
    }

    /// Detail of one endpoint.
    pub fn endpoint(&self, method: &str, path: &str) -> Option<EndpointDefinition> {
        self.configuration().endpoint(method, path).cloned()
    }

    /// Detail of one response of an endpoint.
    pub fn response(&self, method: &str, path: &str, id: &str) -> Option<ResponseDefinition> {
        self.configuration().response(method, path, id).cloned()
    }
}
