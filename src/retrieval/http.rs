//! HTTP-backed implementations of the upstream capability traits

use super::providers::*;
use crate::config::{EmbeddingConfig, EnrichmentConfig, FullTextConfig, LiveSearchConfig, VectorConfig};
use crate::error::{Result, RetrievalError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

/// Shared HTTP client with connection pooling
fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| RetrievalError::Network(e).into())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            error!(%status, "Upstream rejected credentials");
            Err(RetrievalError::Api {
                status: status.as_u16(),
                message: "authentication failed".to_string(),
            }
            .into())
        }
        s if s.is_success() => Ok(response),
        s => {
            let message = response.text().await.unwrap_or_default();
            Err(RetrievalError::Api {
                status: s.as_u16(),
                message,
            }
            .into())
        }
    }
}

/// Full-text Q&A index over HTTP
pub struct HttpQaIndex {
    client: Client,
    url: String,
}

impl HttpQaIndex {
    pub fn new(config: &FullTextConfig) -> Result<Option<Self>> {
        let Some(url) = config.url.clone() else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: build_client(Duration::from_millis(config.timeout_ms))?,
            url,
        }))
    }
}

#[derive(Deserialize)]
struct QaSearchResponse {
    hits: Vec<QaHit>,
}

#[async_trait]
impl QaIndex for HttpQaIndex {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<QaHit>> {
        debug!(query, limit, "Full-text index search");
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query, "limit": limit }))
            .send()
            .await
            .map_err(RetrievalError::Network)?;

        let body: QaSearchResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(RetrievalError::Network)?;
        Ok(body.hits)
    }
}

/// Transcript index over HTTP, exposing lexical and vector search routes
pub struct HttpTranscriptIndex {
    client: Client,
    url: String,
}

impl HttpTranscriptIndex {
    pub fn new(config: &VectorConfig) -> Result<Option<Self>> {
        let Some(url) = config.url.clone() else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: build_client(Duration::from_millis(config.timeout_ms))?,
            url,
        }))
    }
}

#[derive(Deserialize)]
struct TranscriptSearchResponse {
    hits: Vec<TranscriptHit>,
}

#[async_trait]
impl TranscriptIndex for HttpTranscriptIndex {
    async fn text_search(&self, query: &str, limit: usize) -> Result<Vec<TranscriptHit>> {
        debug!(query, limit, "Transcript lexical search");
        let response = self
            .client
            .post(format!("{}/text", self.url))
            .json(&json!({ "query": query, "limit": limit }))
            .send()
            .await
            .map_err(RetrievalError::Network)?;

        let body: TranscriptSearchResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(RetrievalError::Network)?;
        Ok(body.hits)
    }

    async fn vector_search(&self, embedding: &[f32], limit: usize) -> Result<Vec<TranscriptHit>> {
        debug!(dim = embedding.len(), limit, "Transcript vector search");
        let response = self
            .client
            .post(format!("{}/vector", self.url))
            .json(&json!({ "vector": embedding, "limit": limit }))
            .send()
            .await
            .map_err(RetrievalError::Network)?;

        let body: TranscriptSearchResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(RetrievalError::Network)?;
        Ok(body.hits)
    }
}

/// OpenAI-style embeddings client
pub struct HttpEmbeddingClient {
    client: Client,
    api_url: String,
    api_token: secrecy::Secret<String>,
    model: String,
}

impl HttpEmbeddingClient {
    /// Returns `None` when the endpoint or token is not configured; callers
    /// degrade to lexical-only ranking.
    pub fn new(config: &EmbeddingConfig) -> Result<Option<Self>> {
        let (Some(api_url), Some(api_token)) = (config.api_url.clone(), config.api_token.clone())
        else {
            return Ok(None);
        };
        if api_token.expose_secret().is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            client: build_client(Duration::from_secs(10))?,
            api_url,
            api_token,
            model: config.model.clone(),
        }))
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(RetrievalError::InvalidInput("text cannot be empty".to_string()).into());
        }

        let response = self
            .client
            .post(&self.api_url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_token.expose_secret()),
            )
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(RetrievalError::Network)?;

        let body: EmbeddingResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(RetrievalError::Network)?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RetrievalError::Upstream("no embeddings returned".to_string()).into())
    }
}

/// Live search-results provider client
pub struct HttpLiveSearchClient {
    client: Client,
    api_url: String,
    api_key: Option<secrecy::Secret<String>>,
}

impl HttpLiveSearchClient {
    pub fn new(config: &LiveSearchConfig) -> Result<Option<Self>> {
        let Some(api_url) = config.api_url.clone() else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: build_client(Duration::from_millis(config.timeout_ms))?,
            api_url,
            api_key: config.api_key.clone(),
        }))
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SerpResponse {
    organic_results: Vec<SerpOrganic>,
    related_questions: Vec<SerpRelated>,
    related_searches: Vec<SerpRelated>,
}

#[derive(Deserialize)]
struct SerpOrganic {
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Deserialize)]
struct SerpRelated {
    #[serde(alias = "question", alias = "query")]
    text: String,
}

#[async_trait]
impl LiveSearchProvider for HttpLiveSearchClient {
    async fn search(&self, query: &str) -> Result<SerpData> {
        debug!(query, "Live search");
        let mut request = self.client.get(&self.api_url).query(&[("q", query)]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.expose_secret().as_str())]);
        }

        let response = request.send().await.map_err(RetrievalError::Network)?;
        let body: SerpResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(RetrievalError::Network)?;

        Ok(SerpData {
            top_results: body
                .organic_results
                .into_iter()
                .map(|r| super::models::SerpResult {
                    title: r.title,
                    snippet: r.snippet,
                    url: r.link,
                })
                .collect(),
            related_questions: body.related_questions.into_iter().map(|r| r.text).collect(),
            related_searches: body.related_searches.into_iter().map(|r| r.text).collect(),
        })
    }
}

/// Content-enrichment provider client
pub struct HttpEnrichmentClient {
    client: Client,
    api_url: String,
}

impl HttpEnrichmentClient {
    pub fn new(config: &EnrichmentConfig) -> Result<Option<Self>> {
        let Some(api_url) = config.api_url.clone() else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: build_client(Duration::from_millis(config.timeout_ms))?,
            api_url,
        }))
    }
}

#[derive(Deserialize)]
struct EnrichmentResponse {
    documents: Vec<EnrichmentDoc>,
}

#[async_trait]
impl EnrichmentProvider for HttpEnrichmentClient {
    async fn enrich(&self, query: &str) -> Result<Vec<EnrichmentDoc>> {
        debug!(query, "Content enrichment lookup");
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("topic", query)])
            .send()
            .await
            .map_err(RetrievalError::Network)?;

        let body: EnrichmentResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(RetrievalError::Network)?;
        Ok(body.documents)
    }
}
