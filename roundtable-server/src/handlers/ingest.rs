//! Producer endpoints used by external generation workers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;
use shared::{
    models::{StreamBufferRecord, StreamChunk, StreamStatus},
    streams::StreamId,
};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    tracer,
};

#[derive(Debug, Default, Deserialize)]
pub struct StartStreamRequest {
    #[serde(default)]
    pub total_participants: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AppendChunksRequest {
    pub chunks: Vec<StreamChunk>,
}

#[derive(Debug, Deserialize)]
pub struct FinishStreamRequest {
    pub status: StreamStatus,
    #[serde(default)]
    pub error: Option<String>,
}

fn parse_stream_id(raw: &str) -> AppResult<StreamId> {
    let id = StreamId::parse(raw).ok_or_else(|| {
        ApiError::bad_request("invalid_stream_id", format!("unrecognised stream id {raw}"))
            .with_details(json!({ "stream_id": raw }))
    })?;
    tracer::record_stream(&id.encode(), Some(id.phase().as_str()));
    Ok(id)
}

/// `POST /api/streams/{stream_id}/start`
pub async fn start_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    Json(request): Json<StartStreamRequest>,
) -> AppResult<(StatusCode, Json<StreamBufferRecord>)> {
    let id = parse_stream_id(&stream_id)?;
    let record = state
        .recorder
        .start(&id, request.total_participants)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `POST /api/streams/{stream_id}/chunks`
pub async fn append_chunks(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    Json(request): Json<AppendChunksRequest>,
) -> AppResult<Json<StreamBufferRecord>> {
    let id = parse_stream_id(&stream_id)?;
    let record = state.recorder.append(&id, &request.chunks).await?;
    Ok(Json(record))
}

/// `POST /api/streams/{stream_id}/finish`
pub async fn finish_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    Json(request): Json<FinishStreamRequest>,
) -> AppResult<Json<StreamBufferRecord>> {
    let id = parse_stream_id(&stream_id)?;
    let record = state
        .recorder
        .finish(&id, request.status, request.error)
        .await?;
    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{
        config::server::{Config, Profile},
        models::StreamPhase,
    };

    #[test]
    fn legacy_ids_are_normalised() {
        let id = parse_stream_id("thread_1_r2_p1").unwrap();
        assert_eq!(id.phase(), StreamPhase::Participant);
        assert_eq!(id.encode(), "thread_1_r2_participant_1");
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let err = parse_stream_id("not-a-stream").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ingest_streams_are_supervised_between_start_and_finish() {
        let config = Arc::new(Config::default_for_profile(Profile::Test));
        let state = Arc::new(AppState::in_memory(config));
        let stream_id = "t_r0_moderator";

        let (status, _) = start_stream(
            State(Arc::clone(&state)),
            Path(stream_id.to_string()),
            Json(StartStreamRequest::default()),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(state.recorder.supervisor().is_recording(stream_id).await);

        finish_stream(
            State(Arc::clone(&state)),
            Path(stream_id.to_string()),
            Json(FinishStreamRequest {
                status: StreamStatus::Completed,
                error: None,
            }),
        )
        .await
        .unwrap();
        assert!(!state.recorder.supervisor().is_recording(stream_id).await);
    }
}
