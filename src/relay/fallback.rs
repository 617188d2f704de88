//! Paced word-chunk synthesis for degraded streaming
//!
//! When the completion upstream is unavailable, or when a cached answer is
//! replayed, the relay still emits a token-like stream so clients observe
//! the same protocol either way.

use super::events::StreamEvent;
use crate::config::RelayConfig;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Split text into chunks of up to `words_per_chunk` whitespace-separated
/// words, each chunk carrying its trailing space so concatenation
/// reconstructs the original word sequence.
pub fn chunk_words(text: &str, words_per_chunk: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(words_per_chunk.max(1))
        .enumerate()
        .map(|(i, chunk)| {
            let mut piece = chunk.join(" ");
            if (i + 1) * words_per_chunk.max(1) < words.len() {
                piece.push(' ');
            }
            piece
        })
        .collect()
}

/// Stream `text` as paced delta events. Returns false when the receiver
/// went away before the text was fully sent.
pub async fn synthesize(
    tx: &mpsc::Sender<StreamEvent>,
    text: &str,
    config: &RelayConfig,
) -> bool {
    let chunks = chunk_words(text, config.fallback_chunk_words);
    let pacing = Duration::from_millis(config.fallback_pacing_ms);

    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(pacing).await;
        }
        if tx.send(StreamEvent::delta(chunk.clone())).await.is_err() {
            debug!("Receiver dropped during synthesized stream");
            return false;
        }
    }
    true
}
