//! Wire events emitted over the streaming channel

use crate::retrieval::models::{RagResult, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal sentinel frame closing every stream
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Stable error codes carried by terminal error events
pub mod codes {
    pub const UPSTREAM_UNAVAILABLE: &str = "upstream_unavailable";
    pub const STREAM_TRANSPORT: &str = "stream_transport";
    pub const INTERNAL: &str = "internal";
}

/// Per-source contribution summary in the opening meta event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSummary {
    pub source: SourceKind,
    pub items: usize,
}

/// Prompt-size metrics carried by the meta event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptMetrics {
    pub context_chars: usize,
    pub sources: Vec<SourceSummary>,
    pub total_weight: f32,
}

/// Stable code plus human-readable message, the only error surface the
/// stream consumer ever sees
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// One event on the relay stream.
///
/// Every stream opens with exactly one `Meta`, carries zero or more
/// `Delta`s, and ends with exactly one terminal event (`Done`, or `Error`
/// on fatal mid-stream failure) followed by the `[DONE]` sentinel frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Meta {
        provider: String,
        model: String,
        conversation_id: String,
        created_at: DateTime<Utc>,
        /// True when the answer is replayed from the response cache
        cached: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<PromptMetrics>,
    },
    Delta {
        delta: String,
    },
    Error {
        error: ErrorDetail,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        finish_reason: String,
    },
}

impl StreamEvent {
    pub fn meta(
        provider: &str,
        model: &str,
        conversation_id: String,
        cached: bool,
        rag: &RagResult,
        context_chars: usize,
    ) -> Self {
        let mut sources: Vec<SourceSummary> = Vec::new();
        for kind in SourceKind::PRIORITY {
            let items = rag.contexts.iter().filter(|c| c.source == kind).count();
            if items > 0 {
                sources.push(SourceSummary {
                    source: kind,
                    items,
                });
            }
        }
        StreamEvent::Meta {
            provider: provider.to_string(),
            model: model.to_string(),
            conversation_id,
            created_at: Utc::now(),
            cached,
            prompt: Some(PromptMetrics {
                context_chars,
                sources,
                total_weight: rag.total_weight,
            }),
        }
    }

    pub fn delta(text: impl Into<String>) -> Self {
        StreamEvent::Delta {
            delta: text.into(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn done(finish_reason: impl Into<String>) -> Self {
        StreamEvent::Done {
            finish_reason: finish_reason.into(),
        }
    }

    /// Encode as one server-sent-events frame
    pub fn to_sse_frame(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("data: {}\n\n", json),
            // Serialization of these variants cannot fail in practice
            Err(_) => DONE_FRAME.to_string(),
        }
    }
}
