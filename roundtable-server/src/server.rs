use app_state::AppState;
use axum::{Extension, Router, response::IntoResponse, routing::get, serve};
use shared::config::server::{Config, LogFormat};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::{
    app_state,
    middleware::request_context::{self, RequestIdState},
    routes,
    services::{buffer_store::InMemoryBufferStore, stream_supervisor::StreamSupervisor},
    tracer,
};
use axum::http::{HeaderValue, StatusCode, header};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus handle. The recorder is installed on first use.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!("a global metrics recorder was already installed");
            }
            handle
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed, keeping existing one");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// CORS for browser clients reading the resume endpoint. Exposes the resume headers.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use http::{HeaderName, Method};
    use shared::streams::resume::{
        HEADER_MODERATOR_ID, HEADER_NEXT_PARTICIPANT_INDEX, HEADER_PARTICIPANT_INDEX,
        HEADER_PARTICIPANT_STATUSES, HEADER_PHASE, HEADER_ROUND_NUMBER, HEADER_STREAM_ID,
        HEADER_TOTAL_PARTICIPANTS,
    };

    let exposed = [
        HEADER_PHASE,
        HEADER_STREAM_ID,
        HEADER_ROUND_NUMBER,
        HEADER_PARTICIPANT_INDEX,
        HEADER_TOTAL_PARTICIPANTS,
        HEADER_PARTICIPANT_STATUSES,
        HEADER_NEXT_PARTICIPANT_INDEX,
        HEADER_MODERATOR_ID,
    ]
    .into_iter()
    .map(HeaderName::from_static)
    .collect::<Vec<_>>();

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::any())
        .expose_headers(exposed)
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| http::HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Routes nested under `/api`.
pub fn create_api_router(config: &Config) -> Router<Arc<AppState>> {
    Router::new().merge(routes::streams::create_stream_router(config))
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: Arc<Config>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let cors = create_cors_layer(&config);
    let request_id_state = RequestIdState::from_config(&config);

    let mut router = Router::new()
        .nest("/api", create_api_router(&config))
        .merge(routes::health::create_health_router());
    if config.features.metrics {
        router = router.route("/metrics", get(metrics_endpoint));
    }

    router
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Resolves when CTRL+C is received.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for CTRL+C");
    }
    info!("Shutting down...");
}

/// Starts the server and blocks until shutdown.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    initialize_tracing(&config);
    info!(profile = ?config.profile, "Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let store = Arc::new(InMemoryBufferStore::new());
    let supervisor = Arc::new(StreamSupervisor::new(config.streams.producer_timeout()));
    let shutdown = CancellationToken::new();
    let janitor = store.spawn_janitor(
        Duration::from_secs(config.streams.janitor_interval_seconds.max(1)),
        shutdown.clone(),
    );

    let state = Arc::new(AppState::new(
        Arc::clone(&config),
        store,
        Arc::clone(&supervisor),
    ));
    let app = create_app_router(state, Arc::clone(&config), metrics_handle);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    let cancelled = supervisor.cancel_all().await;
    if cancelled > 0 {
        info!(cancelled, "cancelled in-flight recordings");
        tokio::task::yield_now().await;
    }
    shutdown.cancel();
    if let Err(err) = janitor.await {
        warn!(error = %err, "buffer janitor did not stop cleanly");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use serde_json::Value;
    use shared::config::server::Profile;
    use std::{
        io::{self, Write},
        sync::Mutex,
    };
    use tower::ServiceExt;
    use tracing::{Subscriber, info};
    use tracing_subscriber::fmt::{self, MakeWriter};

    #[derive(Clone)]
    struct BufferMakeWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferMakeWriter {
        fn new(buffer: Arc<Mutex<Vec<u8>>>) -> Self {
            Self { buffer }
        }
    }

    struct BufferWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> MakeWriter<'a> for BufferMakeWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            BufferWriter {
                buffer: Arc::clone(&self.buffer),
            }
        }
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn subscriber_with_writer<W>(config: &Config, writer: W) -> Box<dyn Subscriber + Send + Sync>
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let env_filter = super::build_env_filter(config);
        let builder = fmt::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(writer);

        if matches!(config.logging.format, LogFormat::Json) {
            Box::new(builder.json().with_ansi(false).finish())
        } else {
            Box::new(builder.with_ansi(false).finish())
        }
    }

    fn captured_line(config: &Config) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = subscriber_with_writer(config, BufferMakeWriter::new(buffer.clone()));
        let dispatch = tracing::dispatcher::Dispatch::new(subscriber);

        tracing::dispatcher::with_default(&dispatch, || {
            info!(stream_id = "t_r0_presearch", "log entry");
        });

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        contents
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap()
            .to_string()
    }

    fn test_app(config: Config) -> Router {
        let config = Arc::new(config);
        create_app_router(
            Arc::new(AppState::in_memory(Arc::clone(&config))),
            config,
            super::metrics_handle(),
        )
    }

    #[test]
    fn initialize_tracing_returns_configured_level() {
        let config = Config::default_for_profile(Profile::Dev);
        assert_eq!(initialize_tracing(&config), config.logging.level);
    }

    #[test]
    fn json_log_format_produces_json_output() {
        let mut config = Config::default_for_profile(Profile::Dev);
        config.logging.format = LogFormat::Json;

        let value: Value = serde_json::from_str(&captured_line(&config)).unwrap();
        assert_eq!(value["fields"]["message"], "log entry");
        assert_eq!(value["fields"]["stream_id"], "t_r0_presearch");
    }

    #[test]
    fn text_log_format_emits_plain_events() {
        let mut config = Config::default_for_profile(Profile::Dev);
        config.logging.format = LogFormat::Text;

        let line = captured_line(&config);
        assert!(
            serde_json::from_str::<Value>(&line).is_err(),
            "expected plain text log line"
        );
        assert!(line.contains("log entry"));
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_payload() {
        let mut config = Config::default_for_profile(Profile::Test);
        config.features.metrics = true;

        // Make sure at least one series exists before rendering.
        let _ = test_app(config.clone())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let response = test_app(config)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/plain; version=0.0.4");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(
            body.contains("health_checks_total"),
            "expected prometheus exposition format body"
        );
    }

    #[tokio::test]
    async fn metrics_route_follows_feature_flag() {
        let mut config = Config::default_for_profile(Profile::Test);
        config.features.metrics = false;

        let response = test_app(config)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_routes_are_nested_and_tagged_with_request_id() {
        let response = test_app(Config::default_for_profile(Profile::Test))
            .oneshot(
                Request::builder()
                    .uri("/api/threads/t/stream?round=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn cors_preflight_exposes_resume_headers() {
        let response = test_app(Config::default_for_profile(Profile::Test))
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/threads/t/stream?round=0")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_success());
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn missing_round_query_is_rejected() {
        let response = test_app(Config::default_for_profile(Profile::Test))
            .oneshot(
                Request::builder()
                    .uri("/api/threads/t/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
