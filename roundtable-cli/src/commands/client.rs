//! HTTP access to the resume endpoint.

use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use shared::{
    models::{Message, StreamChunk},
    rounds::MessageAccumulator,
    streams::{ResumeOutcome, SseFrameDecoder},
};
use url::Url;

#[derive(Debug, Clone)]
pub struct ResumeClient {
    http: Client,
    api_base: Url,
}

/// What the server answered for one resume request.
#[derive(Debug)]
pub struct ResumeResponse {
    pub outcome: ResumeOutcome,
    /// Open `text/event-stream` body when the outcome is live.
    pub body: Option<Response>,
}

impl ResumeClient {
    /// # Errors
    /// Returns an error if `server` is not a valid base URL.
    pub fn new(server: &str) -> Result<Self> {
        let server_url = Url::parse(server).context("invalid server URL")?;
        let api_base = server_url
            .join("api/")
            .context("invalid API base for resume")?;
        Ok(Self {
            http: Client::new(),
            api_base,
        })
    }

    /// Calls `GET /api/threads/{thread}/stream?round=N`.
    ///
    /// # Errors
    /// Returns an error when the server is unreachable, rejects the request,
    /// or answers with headers that do not describe an outcome.
    pub async fn resume(&self, thread_id: &str, round_number: u32) -> Result<ResumeResponse> {
        let mut url = self
            .api_base
            .join(&format!("threads/{thread_id}/stream"))
            .context("invalid resume endpoint")?;
        url.query_pairs_mut()
            .append_pair("round", &round_number.to_string());

        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to reach the server")?;

        let status = response.status();
        if !matches!(status, StatusCode::OK | StatusCode::NO_CONTENT) {
            let detail = response.text().await.unwrap_or_default();
            bail!("resume rejected with {status}: {detail}");
        }

        let outcome = ResumeOutcome::from_headers(status.as_u16(), |name| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .context("malformed resume headers")?;

        let body = outcome.is_live().then_some(response);
        Ok(ResumeResponse { outcome, body })
    }
}

/// Reads a live replay to its end, folding chunks into `placeholder`.
///
/// `on_chunk` sees every decoded chunk as it arrives. A body that ends without
/// a terminal chunk yields an interrupted message.
///
/// # Errors
/// Returns an error if the connection drops or a frame cannot be decoded.
pub async fn read_live(
    response: Response,
    placeholder: Message,
    mut on_chunk: impl FnMut(&StreamChunk),
) -> Result<Message> {
    let mut decoder = SseFrameDecoder::new();
    let mut accumulator = MessageAccumulator::new(placeholder);
    let mut body = response.bytes_stream();

    while let Some(bytes) = body.next().await {
        let bytes = bytes.context("stream interrupted")?;
        for chunk in decoder.push(&bytes)? {
            on_chunk(&chunk);
            accumulator.apply(&chunk);
        }
    }

    accumulator.finish_interrupted();
    Ok(accumulator.into_message())
}
