use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use shared::config::server::Config;

use crate::{
    app_state::AppState,
    handlers::{ingest, resume},
};

/// Resume endpoint, plus the producer ingest endpoints when enabled.
pub fn create_stream_router(config: &Config) -> Router<Arc<AppState>> {
    let router = Router::new().route(
        "/threads/{thread_id}/stream",
        get(resume::resume_thread_stream),
    );

    if !config.features.ingest_api {
        return router;
    }

    router
        .route("/streams/{stream_id}/start", post(ingest::start_stream))
        .route("/streams/{stream_id}/chunks", post(ingest::append_chunks))
        .route("/streams/{stream_id}/finish", post(ingest::finish_stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header::CONTENT_TYPE},
        response::Response,
    };
    use chrono::TimeDelta;
    use serde_json::{Value, json};
    use shared::{
        config::server::Profile,
        models::{StreamPhase, Timestamp},
        streams::{ResumeOutcome, ResumeStatus, SseFrameDecoder},
    };
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::in_memory(Arc::new(Config::default_for_profile(
            Profile::Test,
        ))))
    }

    fn router(state: &Arc<AppState>) -> Router {
        create_stream_router(&state.config).with_state(Arc::clone(state))
    }

    async fn post_json(state: &Arc<AppState>, uri: &str, body: Value) -> Response {
        router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get_resume(state: &Arc<AppState>, thread: &str, round: u32) -> Response {
        router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/threads/{thread}/stream?round={round}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    fn outcome_of(response: &Response) -> ResumeOutcome {
        ResumeOutcome::from_headers(response.status().as_u16(), |name| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .unwrap()
    }

    async fn age_participant(state: &Arc<AppState>, stream_id: &str, secs: i64) {
        let buffers = state.recorder.buffers();
        let mut record = buffers
            .meta(StreamPhase::Participant, stream_id)
            .await
            .unwrap()
            .unwrap();
        let past = Timestamp(Timestamp::now().0 - TimeDelta::seconds(secs));
        record.created_at = past;
        record.last_chunk_at = record.last_chunk_at.map(|_| past);
        buffers.put_meta(&record).await.unwrap();
    }

    #[tokio::test]
    async fn idle_thread_is_204_without_phase() {
        let state = state();
        let response = get_resume(&state, "t", 0).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(outcome_of(&response), ResumeOutcome::idle());
    }

    #[tokio::test]
    async fn stale_participant_resumes_with_next_index() {
        let state = state();
        let first = post_json(
            &state,
            "/streams/t_r0_participant_0/start",
            json!({ "total_participants": 3 }),
        )
        .await;
        assert_eq!(first.status(), StatusCode::CREATED);
        post_json(
            &state,
            "/streams/t_r0_participant_0/finish",
            json!({ "status": "completed" }),
        )
        .await;
        post_json(&state, "/streams/t_r0_participant_1/start", json!({})).await;
        post_json(
            &state,
            "/streams/t_r0_participant_1/chunks",
            json!({ "chunks": [{ "type": "text-delta", "delta": "Hel" }] }),
        )
        .await;
        age_participant(&state, "t_r0_participant_1", 65).await;

        let response = get_resume(&state, "t", 0).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let outcome = outcome_of(&response);
        assert_eq!(outcome.phase, Some(StreamPhase::Participant));
        assert_eq!(outcome.next_participant_index, Some(1));
        assert_eq!(outcome.total_participants, Some(3));
        assert_eq!(outcome.participant_index, Some(1));
    }

    #[tokio::test]
    async fn live_participant_streams_buffered_frames() {
        let state = state();
        post_json(
            &state,
            "/streams/t_r0_p0/start",
            json!({ "total_participants": 1 }),
        )
        .await;
        post_json(
            &state,
            "/streams/t_r0_participant_0/chunks",
            json!({ "chunks": [
                { "type": "text-delta", "delta": "Hello" },
                { "type": "text-delta", "delta": " world" },
                { "type": "finish", "finish_reason": "stop" }
            ] }),
        )
        .await;

        let response = get_resume(&state, "t", 0).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(outcome_of(&response).status, ResumeStatus::Live);

        let finisher = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                post_json(
                    &state,
                    "/streams/t_r0_participant_0/finish",
                    json!({ "status": "completed" }),
                )
                .await
            })
        };

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(finisher.await.unwrap().status(), StatusCode::OK);

        let chunks = SseFrameDecoder::new().push(&body).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].is_terminal());
    }

    #[tokio::test]
    async fn writes_after_finish_conflict() {
        let state = state();
        post_json(&state, "/streams/t_r0_presearch/start", json!({})).await;
        post_json(
            &state,
            "/streams/t_r0_presearch/finish",
            json!({ "status": "failed", "error": "search provider down" }),
        )
        .await;

        let response = post_json(
            &state,
            "/streams/t_r0_presearch/chunks",
            json!({ "chunks": [{ "type": "text-delta", "delta": "late" }] }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let problem: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(problem["code"], "stream_finished");
    }

    #[tokio::test]
    async fn unparseable_stream_id_is_400() {
        let state = state();
        let response = post_json(&state, "/streams/garbage/start", json!({})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn active_moderator_is_reported() {
        let state = state();
        post_json(&state, "/streams/t_r2_summarizer/start", json!({})).await;

        let response = get_resume(&state, "t", 2).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let outcome = outcome_of(&response);
        assert_eq!(outcome.phase, Some(StreamPhase::Moderator));
        assert_eq!(outcome.moderator_id.as_deref(), Some("t_r2_moderator"));
    }

    #[tokio::test]
    async fn ingest_routes_can_be_disabled() {
        let mut config = Config::default_for_profile(Profile::Test);
        config.features.ingest_api = false;
        let state = Arc::new(AppState::in_memory(Arc::new(config)));

        let response = post_json(&state, "/streams/t_r0_presearch/start", json!({})).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
