//! Upstream capability traits consumed by the source resolvers
//!
//! Each external collaborator (search indexes, embeddings, live search,
//! enrichment, the hot-content store) is reached only through one of these
//! traits; resolvers never talk to concrete backends directly.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Hit from the full-text Q&A index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaHit {
    pub id: String,
    pub question: String,
    pub answer: String,
    /// Normalized lexical rank in [0, 1]
    pub rank: f32,
}

/// Hit from the transcript index. Either search mode fills only its own
/// score; the hybrid merge joins them by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptHit {
    pub id: String,
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_rank: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_similarity: Option<f32>,
    /// Filled by the hybrid merge, never by the index itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined: Option<f32>,
}

/// Previously generated answer kept warm in the content store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotEntry {
    pub slug: String,
    pub question: String,
    pub answer: String,
}

/// Raw live-search provider response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerpData {
    pub top_results: Vec<super::models::SerpResult>,
    pub related_questions: Vec<String>,
    pub related_searches: Vec<String>,
}

/// External enrichment document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentDoc {
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Full-text search over the Q&A index
#[async_trait]
pub trait QaIndex: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<QaHit>>;
}

/// Transcript index exposing both lexical and vector search modes
#[async_trait]
pub trait TranscriptIndex: Send + Sync {
    async fn text_search(&self, query: &str, limit: usize) -> Result<Vec<TranscriptHit>>;

    async fn vector_search(&self, embedding: &[f32], limit: usize) -> Result<Vec<TranscriptHit>>;
}

/// Embeddings endpoint
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Live web/search-results provider
#[async_trait]
pub trait LiveSearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<SerpData>;
}

/// Content-enrichment provider
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn enrich(&self, query: &str) -> Result<Vec<EnrichmentDoc>>;
}

/// Hot-content store of previously generated answers
#[async_trait]
pub trait HotContentStore: Send + Sync {
    async fn lookup(&self, query: &str, limit: usize) -> Result<Vec<HotEntry>>;
}
