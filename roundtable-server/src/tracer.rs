use axum::{body::Body, http::Request};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, DefaultOnResponse, MakeSpan, TraceLayer,
};
use tracing::{Level, Span, error, info};

use crate::middleware::request_context::RequestContext;

type TraceLayerType = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    HttpMakeSpan,
    fn(&Request<Body>, &Span) -> (),
    DefaultOnResponse,
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span) -> (),
>;

/// Span per request. `stream_id` and `phase` start empty and are filled by
/// stream handlers once known.
#[derive(Clone, Debug, Default)]
pub(crate) struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map_or_else(|| "n/a".into(), |ctx| ctx.request_id.clone());

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
            stream_id = tracing::field::Empty,
            phase = tracing::field::Empty,
        )
    }
}

pub(crate) fn on_request_handler(req: &Request<Body>, span: &Span) {
    span.in_scope(|| {
        info!(
            method = %req.method(),
            uri = %req.uri(),
            version = ?req.version(),
            "started processing request"
        );
    });
}

pub(crate) fn on_failure_handler(error: ServerErrorsFailureClass, latency: Duration, span: &Span) {
    span.in_scope(|| {
        error!(
            error = %error,
            latency = ?latency,
            "error processing request"
        );
    });
}

/// Records the stream a handler is serving on the enclosing request span.
pub(crate) fn record_stream(stream_id: &str, phase: Option<&str>) {
    let span = Span::current();
    span.record("stream_id", stream_id);
    if let Some(phase) = phase {
        span.record("phase", phase);
    }
}

pub fn create_trace_layer() -> TraceLayerType {
    TraceLayer::new_for_http()
        .make_span_with(HttpMakeSpan)
        .on_request(on_request_handler as fn(&Request<Body>, &Span))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(on_failure_handler as fn(ServerErrorsFailureClass, Duration, &Span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use std::{
        io::{self, Write},
        sync::{Arc, Mutex},
    };
    use tracing_subscriber::{fmt::MakeWriter, util::SubscriberInitExt};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn captured_subscriber(writer: Captured) -> tracing::subscriber::DefaultGuard {
        tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_ansi(false)
            .with_writer(writer)
            .set_default()
    }

    #[test]
    fn span_carries_request_id_and_stream_fields() {
        let writer = Captured::default();
        let _guard = captured_subscriber(writer.clone());

        let mut request = Request::builder()
            .method(Method::GET)
            .uri("/api/threads/t/stream?round=0")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(RequestContext {
            request_id: "req-7".into(),
        });

        let span = HttpMakeSpan.make_span(&request);
        span.in_scope(|| {
            record_stream("t_r0_participant_0", Some("participant"));
            info!("inside");
        });

        let output = String::from_utf8(writer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("request_id=req-7"));
        assert!(output.contains("stream_id=\"t_r0_participant_0\""));
        assert!(output.contains("phase=\"participant\""));
    }

    #[test]
    fn span_without_context_uses_placeholder() {
        let writer = Captured::default();
        let _guard = captured_subscriber(writer.clone());

        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let span = HttpMakeSpan.make_span(&request);
        span.in_scope(|| info!("inside"));

        let output = String::from_utf8(writer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("request_id=n/a"));
    }

    #[test]
    fn request_and_failure_handlers_log_within_span() {
        let writer = Captured::default();
        let _guard = captured_subscriber(writer.clone());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/streams/t_r0_presearch/start")
            .body(Body::empty())
            .unwrap();
        let span = HttpMakeSpan.make_span(&request);
        on_request_handler(&request, &span);
        on_failure_handler(
            ServerErrorsFailureClass::StatusCode(axum::http::StatusCode::BAD_GATEWAY),
            Duration::from_millis(5),
            &span,
        );

        let output = String::from_utf8(writer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("started processing request"));
        assert!(output.contains("error processing request"));
    }
}
