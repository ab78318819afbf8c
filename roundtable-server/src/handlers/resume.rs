use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{
        StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::Response,
};
use serde::Deserialize;
use shared::models::StreamPhase;

use crate::{app_state::AppState, http::error::AppResult, tracer};

#[derive(Debug, Deserialize)]
pub struct ResumeQuery {
    pub round: u32,
}

/// `GET /api/threads/{thread_id}/stream?round=N`
///
/// 204 with `x-roundtable-*` headers when there is nothing to attach to,
/// 200 with the same headers and an event stream replaying the live
/// participant's buffered frames otherwise.
pub async fn resume_thread_stream(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Query(query): Query<ResumeQuery>,
) -> AppResult<Response> {
    let outcome = state.resume.resume(&thread_id, query.round).await?;
    if let Some(stream_id) = &outcome.stream_id {
        tracer::record_stream(stream_id, outcome.phase.map(StreamPhase::as_str));
    }

    let mut builder = Response::builder().header(CACHE_CONTROL, "no-store");
    for (name, value) in outcome.header_pairs() {
        builder = builder.header(name, value);
    }

    let response = match (outcome.is_live(), outcome.phase, outcome.stream_id) {
        (true, Some(phase), Some(stream_id)) => builder
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .body(Body::from_stream(state.resume.replay(phase, stream_id)))?,
        _ => builder.status(StatusCode::NO_CONTENT).body(Body::empty())?,
    };
    Ok(response)
}
