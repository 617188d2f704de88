//! Streaming completion upstream client
//!
//! Speaks the OpenAI-compatible chat-completions protocol with
//! `stream: true`: the response body arrives as server-sent-events lines,
//! each carrying a JSON chunk with a content delta, terminated by a
//! `[DONE]` sentinel. Byte chunks do not align with line boundaries, so a
//! carry-over buffer holds the trailing partial line between reads.

use crate::config::CompletionConfig;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Token-delta stream from a completion upstream
pub type DeltaStream = BoxStream<'static, Result<String>>;

/// Completion upstream capable of streaming token deltas
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    /// Open a streaming completion. Errors here mean the upstream could not
    /// be reached; errors on the returned stream mean it failed mid-flight.
    async fn stream_completion(&self, system: &str, user: &str) -> Result<DeltaStream>;
}

/// OpenAI-compatible chat-completions client
pub struct HttpCompletionClient {
    client: Client,
    api_url: String,
    api_token: secrecy::Secret<String>,
    provider: String,
    model: String,
}

impl HttpCompletionClient {
    /// Returns `None` when the upstream is not configured; the relay then
    /// serves synthesized fallback streams only.
    pub fn new(config: &CompletionConfig) -> Result<Option<Self>> {
        if !config.is_configured() {
            return Ok(None);
        }
        let (Some(api_url), Some(api_token)) = (config.api_url.clone(), config.api_token.clone())
        else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;

        Ok(Some(Self {
            client,
            api_url,
            api_token,
            provider: config.provider.clone(),
            model: config.model.clone(),
        }))
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_completion(&self, system: &str, user: &str) -> Result<DeltaStream> {
        let response = self
            .client
            .post(&self.api_url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_token.expose_secret()),
            )
            .json(&json!({
                "model": self.model,
                "stream": true,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
            }))
            .send()
            .await
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Unavailable(format!("status {}: {}", status, body)).into());
        }

        Ok(sse_delta_stream(response.bytes_stream().boxed()))
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

enum Line {
    Delta(String),
    Done,
    Skip,
}

/// Turn a raw byte stream of SSE lines into a stream of content deltas
pub fn sse_delta_stream(bytes: BoxStream<'static, reqwest::Result<bytes::Bytes>>) -> DeltaStream {
    let state = SseState {
        bytes,
        buffer: String::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(text) = state.pending.pop_front() {
                return Some((Ok(text), state));
            }
            if state.done {
                return None;
            }

            match state.bytes.next().await {
                None => {
                    state.done = true;
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((
                        Err(StreamError::Transport(e.to_string()).into()),
                        state,
                    ));
                }
                Some(Ok(chunk)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    while let Some(pos) = state.buffer.find('\n') {
                        let line: String = state.buffer.drain(..=pos).collect();
                        match parse_line(line.trim()) {
                            Line::Delta(text) => state.pending.push_back(text),
                            Line::Done => {
                                state.done = true;
                                break;
                            }
                            Line::Skip => {}
                        }
                    }
                }
            }
        }
    })
    .boxed()
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StreamDelta {
    content: Option<String>,
}

fn parse_line(line: &str) -> Line {
    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return Line::Skip;
    };
    if payload == "[DONE]" {
        return Line::Done;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
            Some(content) if !content.is_empty() => Line::Delta(content),
            _ => Line::Skip,
        },
        Err(e) => {
            // A malformed chunk costs its own tokens, never the stream
            debug!(error = %e, "Skipping malformed stream chunk");
            Line::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn byte_stream(chunks: Vec<&'static str>) -> BoxStream<'static, reqwest::Result<Bytes>> {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c)))).boxed()
    }

    async fn collect(stream: DeltaStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    fn chunk_line(text: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n",
            text
        )
    }

    #[tokio::test]
    async fn test_deltas_across_aligned_lines() {
        let body: &'static str = Box::leak(
            format!("{}{}data: [DONE]\n", chunk_line("Hello"), chunk_line(" world")).into_boxed_str(),
        );
        let deltas = collect(sse_delta_stream(byte_stream(vec![body]))).await;

        let texts: Vec<String> = deltas.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(texts, vec!["Hello".to_string(), " world".to_string()]);
    }

    #[tokio::test]
    async fn test_partial_line_carried_across_chunks() {
        let full = chunk_line("split");
        let (a, b) = full.split_at(20);
        let a: &'static str = Box::leak(a.to_string().into_boxed_str());
        let rest: &'static str =
            Box::leak(format!("{}data: [DONE]\n", b).into_boxed_str());

        let deltas = collect(sse_delta_stream(byte_stream(vec![a, rest]))).await;
        let texts: Vec<String> = deltas.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(texts, vec!["split".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_skipped() {
        let body: &'static str = Box::leak(
            format!(
                "{}data: {{not json}}\n{}data: [DONE]\n",
                chunk_line("a"),
                chunk_line("b")
            )
            .into_boxed_str(),
        );

        let deltas = collect(sse_delta_stream(byte_stream(vec![body]))).await;
        let texts: Vec<String> = deltas.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(texts, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_lines_after_done_are_ignored() {
        let body: &'static str = Box::leak(
            format!("{}data: [DONE]\n{}", chunk_line("kept"), chunk_line("dropped"))
                .into_boxed_str(),
        );

        let deltas = collect(sse_delta_stream(byte_stream(vec![body]))).await;
        let texts: Vec<String> = deltas.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(texts, vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn test_end_without_sentinel_terminates() {
        let body: &'static str = Box::leak(chunk_line("tail").into_boxed_str());
        let deltas = collect(sse_delta_stream(byte_stream(vec![body]))).await;
        assert_eq!(deltas.len(), 1);
    }
}
