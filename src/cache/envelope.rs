//! Persisted response envelope with size-gated compression

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::warn;

const COMPRESSION_METHOD: &str = "gzip";

/// Envelope for a completed response persisted in the durable tier.
///
/// Content above the size threshold is gzip-compressed and hex-encoded.
/// Decompression failure falls back to treating the stored bytes as
/// already-plain content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Content kind, e.g. "answer" or "summary"
    pub kind: String,

    /// Stable content identifier
    pub slug: String,

    /// Model that produced the content
    pub model: String,

    /// Plain or compressed-and-hex-encoded text
    pub content: String,

    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_method: Option<String>,
}

impl ResponseEnvelope {
    pub fn new(
        kind: impl Into<String>,
        slug: impl Into<String>,
        model: impl Into<String>,
        content: String,
        ttl_secs: i64,
        compression_threshold: usize,
    ) -> Self {
        let now = Utc::now();
        let (content, compressed, method) = if content.len() > compression_threshold {
            match compress(&content) {
                Some(encoded) => (encoded, Some(true), Some(COMPRESSION_METHOD.to_string())),
                None => (content, None, None),
            }
        } else {
            (content, None, None)
        };

        Self {
            kind: kind.into(),
            slug: slug.into(),
            model: model.into(),
            content,
            updated_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            compressed,
            compression_method: method,
        }
    }

    /// The plain content, decompressing when needed
    pub fn plain_content(&self) -> String {
        if self.compressed != Some(true) {
            return self.content.clone();
        }

        match decompress(&self.content) {
            Some(text) => text,
            None => {
                warn!(slug = %self.slug, "Decompression failed, returning stored bytes as plain content");
                self.content.clone()
            }
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

fn compress(content: &str) -> Option<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).ok()?;
    let bytes = encoder.finish().ok()?;
    Some(hex::encode(bytes))
}

fn decompress(encoded: &str) -> Option<String> {
    let bytes = hex::decode(encoded).ok()?;
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut text = String::new();
    decoder.read_to_string(&mut text).ok()?;
    Some(text)
}
