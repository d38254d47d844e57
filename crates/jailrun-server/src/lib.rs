//! HTTP front end for the jailrun execution pipeline
//!
//! Exposes a single `POST /execute` endpoint that hands the submitted script
//! to a [`CodeExecutor`] and maps the classified outcome onto an HTTP status,
//! plus a `GET /health` probe. The server holds no per-request state; all
//! isolation and cleanup happens inside the executor.

pub mod error;
pub mod request;

pub use error::{Result, ServerError};
pub use request::parse_execute_request;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use jailrun_core::executor::SCRIPT_TOO_LARGE_MESSAGE;
use jailrun_core::{CodeExecutor, ExecutionOutcome, JailConfig, LimitsConfig, PythonExecutor};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// CORS allowed origins (if None, allows any origin)
    pub cors_origins: Option<Vec<String>>,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Enable request logging
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            cors_origins: None,
            max_body_size: body_limit_for(&LimitsConfig::default()),
            enable_logging: true,
        }
    }
}

/// Body size that fits any script within `limits` after JSON escaping.
pub fn body_limit_for(limits: &LimitsConfig) -> usize {
    limits.max_script_bytes.saturating_mul(6).saturating_add(64 * 1024)
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the body limit from the execution limits.
    pub fn for_limits(limits: &LimitsConfig) -> Self {
        Self {
            max_body_size: body_limit_for(limits),
            ..Self::default()
        }
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(self, addr: &str) -> Result<Self> {
        let parsed = addr.parse::<SocketAddr>().map_err(|e| {
            ServerError::config_error(format!("Invalid bind address '{}': {}", addr, e))
        })?;
        Ok(self.with_bind_addr(parsed))
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<dyn CodeExecutor>,
    pub jail_config: Arc<JailConfig>,
}

/// Handler for the /execute POST endpoint.
async fn execute_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return ServerError::payload_too_large(SCRIPT_TOO_LARGE_MESSAGE).into_response();
        }
        Err(rejection) => {
            log::warn!("Failed to read request body: {}", rejection.body_text());
            return ServerError::invalid_request(rejection.body_text()).into_response();
        }
    };

    let request =
        match parse_execute_request(&headers, &body, state.jail_config.limits.max_script_bytes) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("Rejected execute request: {}", e);
                return e.into_response();
            }
        };

    let outcome = state.executor.execute(request).await;
    outcome_response(outcome)
}

/// Maps an outcome onto its HTTP status and JSON body.
pub fn outcome_response(outcome: ExecutionOutcome) -> Response {
    let status =
        StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if let Some(error) = outcome.error() {
        log::info!(
            "Execution finished with {} ({}): {}",
            error.error_type,
            status.as_u16(),
            error.message
        );
    }
    (status, Json(outcome)).into_response()
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = request.method().clone();
    let uri = request.uri().clone();
    // Health probes are frequent; keep them out of the info log.
    let quiet = uri.path() == "/health";

    if quiet {
        log::debug!("Request {} {} {}", request_id, method, uri);
    } else {
        log::info!("Request {} {} {}", request_id, method, uri);
    }

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();

    if quiet {
        log::debug!("Response {} {} in {:?}", request_id, response.status(), duration);
    } else {
        log::info!("Response {} {} in {:?}", request_id, response.status(), duration);
    }
    response
}

/// The execution HTTP server.
pub struct JailServer {
    executor: Arc<dyn CodeExecutor>,
    jail_config: Arc<JailConfig>,
    config: ServerConfig,
}

impl JailServer {
    /// Builds a server running scripts through the sandbox backend selected
    /// by `jail_config`.
    pub fn new(jail_config: Arc<JailConfig>) -> Self {
        let executor = Arc::new(PythonExecutor::from_config(jail_config.clone()));
        Self::with_executor(executor, jail_config)
    }

    /// Builds a server around any executor.
    pub fn with_executor(executor: Arc<dyn CodeExecutor>, jail_config: Arc<JailConfig>) -> Self {
        let config = ServerConfig::for_limits(&jail_config.limits);
        Self {
            executor,
            jail_config,
            config,
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            executor: self.executor.clone(),
            jail_config: self.jail_config.clone(),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/execute", post(execute_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(state);

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(log_requests));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors_layer = match &self.config.cors_origins {
                Some(origins) => {
                    let parsed: std::result::Result<Vec<_>, _> =
                        origins.iter().map(|s| s.parse()).collect();
                    match parsed {
                        Ok(origins) => CorsLayer::new()
                            .allow_origin(origins)
                            .allow_methods(Any)
                            .allow_headers(Any),
                        Err(_) => {
                            log::warn!("Invalid CORS origin list, allowing any origin");
                            CorsLayer::permissive()
                        }
                    }
                }
                None => CorsLayer::permissive(),
            };
            router = router.layer(cors_layer);
        }

        router
    }

    async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            ServerError::config_error(format!(
                "Failed to bind to {}: {}",
                self.config.bind_addr, e
            ))
        })
    }

    /// Start the server with graceful shutdown support.
    ///
    /// In-flight executions finish before the server returns.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = self.bind().await?;

        log::info!("jailrun server listening on {}", self.config.bind_addr);
        log::info!("Health check: http://{}/health", self.config.bind_addr);
        log::info!("Execute endpoint: http://{}/execute", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        log::info!("jailrun server shut down gracefully");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use jailrun_core::{ErrorType, ExecutionRequest, OutcomeError};
    use serde_json::json;
    use std::sync::Mutex;
    use tower::ServiceExt; // for `oneshot`

    struct MockExecutor {
        outcome: ExecutionOutcome,
        requests: Arc<Mutex<Vec<ExecutionRequest>>>,
    }

    impl MockExecutor {
        fn returning(outcome: ExecutionOutcome) -> Self {
            Self {
                outcome,
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl CodeExecutor for MockExecutor {
        async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
            self.requests.lock().unwrap().push(request);
            self.outcome.clone()
        }
    }

    fn test_app_with(
        outcome: ExecutionOutcome,
        config: JailConfig,
    ) -> (Router, Arc<Mutex<Vec<ExecutionRequest>>>) {
        let executor = MockExecutor::returning(outcome);
        let requests = executor.requests.clone();
        let server = JailServer::with_executor(Arc::new(executor), Arc::new(config));
        (server.build_router(), requests)
    }

    fn test_app(outcome: ExecutionOutcome) -> (Router, Arc<Mutex<Vec<ExecutionRequest>>>) {
        test_app_with(outcome, JailConfig::default())
    }

    fn execute_request(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = test_app(ExecutionOutcome::success(json!(null), ""));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_execute_success() {
        let (app, requests) = test_app(ExecutionOutcome::success(json!({"a": 1}), "hi\n"));
        let response = app
            .oneshot(execute_request(r#"{"script": "def main(): return {'a': 1}", "timeout": 2}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"result": {"a": 1}, "stdout": "hi\n"})
        );
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].script, "def main(): return {'a': 1}");
        assert_eq!(requests[0].timeout, Some(2.0));
    }

    #[tokio::test]
    async fn test_outcome_status_mapping() {
        let cases = [
            (ErrorType::ExecutionError, 400),
            (ErrorType::MissingMainError, 400),
            (ErrorType::TimeoutError, 408),
            (ErrorType::EnvironmentError, 503),
            (ErrorType::HarnessError, 500),
            (ErrorType::SerializationError, 500),
        ];
        for (error_type, status) in cases {
            let outcome = ExecutionOutcome::failure(OutcomeError::new(error_type, "msg"), "out\n");
            let (app, _) = test_app(outcome);
            let response = app
                .oneshot(execute_request(r#"{"script": "x"}"#))
                .await
                .unwrap();

            assert_eq!(response.status().as_u16(), status, "{}", error_type);
            let body = json_body(response).await;
            assert_eq!(body["error"]["type"], error_type.as_str());
            assert_eq!(body["stdout"], "out\n");
        }
    }

    #[tokio::test]
    async fn test_missing_content_type() {
        let (app, requests) = test_app(ExecutionOutcome::success(json!(1), ""));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .body(Body::from(r#"{"script": "x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "ValidationError");
        assert_eq!(body["error"]["message"], "Content-Type must be application/json");
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_script_not_a_string() {
        let (app, _) = test_app(ExecutionOutcome::success(json!(1), ""));
        let response = app
            .oneshot(execute_request(r#"{"script": ["x"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["message"], "'script' must be a string");
        assert_eq!(body["stdout"], "");
    }

    #[tokio::test]
    async fn test_bad_timeout() {
        let (app, _) = test_app(ExecutionOutcome::success(json!(1), ""));
        let response = app
            .oneshot(execute_request(r#"{"script": "x", "timeout": -1}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["message"], "'timeout' must be a positive number");
    }

    #[tokio::test]
    async fn test_script_too_large() {
        let mut config = JailConfig::default();
        config.limits.max_script_bytes = 16;
        let (app, requests) = test_app_with(ExecutionOutcome::success(json!(1), ""), config);

        let body = json!({"script": "x".repeat(17)}).to_string();
        let response = app.oneshot(execute_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "ValidationError");
        assert_eq!(body["error"]["message"], "script too large");
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_body_over_limit() {
        let executor = MockExecutor::returning(ExecutionOutcome::success(json!(1), ""));
        let server = JailServer::with_executor(Arc::new(executor), Arc::new(JailConfig::default()))
            .with_config(ServerConfig::new().with_max_body_size(32));

        let body = json!({"script": "x".repeat(100)}).to_string();
        let response = server
            .build_router()
            .oneshot(execute_request(body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = json_body(response).await;
        assert_eq!(body["error"]["message"], "script too large");
    }

    /// Answers every run with a fixed result line and records the timeout.
    #[derive(Debug, Default)]
    struct RecordingSandbox {
        timeouts: Mutex<Vec<std::time::Duration>>,
    }

    #[async_trait]
    impl jailrun_core::Sandbox for RecordingSandbox {
        async fn run(
            &self,
            _command: &jailrun_core::SandboxCommand,
            timeout: std::time::Duration,
        ) -> std::result::Result<jailrun_core::SandboxOutput, jailrun_core::SandboxError> {
            self.timeouts.lock().unwrap().push(timeout);
            let prefix = jailrun_core::ProtocolConfig::default().result_prefix;
            Ok(jailrun_core::SandboxOutput::new(0, format!("{}7\n", prefix), ""))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_huge_timeout_is_clamped() {
        let mut config = JailConfig::default();
        config.protocol.per_request_nonce = false;
        let config = Arc::new(config);
        let sandbox = Arc::new(RecordingSandbox::default());
        let executor = PythonExecutor::new(config.clone(), sandbox.clone()).with_interpreter_resolver(
            jailrun_core::sandbox::InterpreterResolver::with_candidates(
                Some(std::path::PathBuf::from("/bin/sh")),
                vec![],
            ),
        );
        let app = JailServer::with_executor(Arc::new(executor), config).build_router();

        let response = app
            .oneshot(execute_request(r#"{"script": "x", "timeout": 1e20}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"result": 7, "stdout": ""}));
        assert_eq!(
            *sandbox.timeouts.lock().unwrap(),
            vec![std::time::Duration::from_secs(60)]
        );
    }

    #[test]
    fn test_server_config_builders() {
        let config = ServerConfig::new()
            .with_bind_addr_str("0.0.0.0:9000")
            .unwrap()
            .with_cors(false)
            .with_logging(false);
        assert_eq!(config.bind_addr.port(), 9000);
        assert!(!config.enable_cors);
        assert!(ServerConfig::new().with_bind_addr_str("not an address").is_err());

        let limits = LimitsConfig {
            max_script_bytes: 1000,
            ..LimitsConfig::default()
        };
        assert!(ServerConfig::for_limits(&limits).max_body_size >= 6000);
    }
}
