//! Data models for retrieved grounding material

use serde::{Deserialize, Serialize};

/// Origin kind of one retrieved context item.
///
/// Each kind carries a fixed prior weight; weights are per-kind and never
/// mutated per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Full-text Q&A index
    TextIndex,

    /// Vector similarity index over first-person transcript material
    VectorIndex,

    /// Hot-content cache of previously generated answers
    HotCache,

    /// External live web/search-results provider
    LiveSearch,

    /// External content-enrichment provider
    Enrichment,
}

impl SourceKind {
    /// Static prior weight. First-person transcript material ranks highest,
    /// cached cluster data lowest.
    pub fn weight(self) -> f32 {
        match self {
            SourceKind::VectorIndex => 1.0,
            SourceKind::Enrichment => 0.8,
            SourceKind::LiveSearch => 0.6,
            SourceKind::TextIndex => 0.5,
            SourceKind::HotCache => 0.4,
        }
    }

    /// Cache-key namespace for this source
    pub fn namespace(self) -> &'static str {
        match self {
            SourceKind::TextIndex => "rag:fulltext",
            SourceKind::VectorIndex => "rag:vector",
            SourceKind::HotCache => "rag:hot",
            SourceKind::LiveSearch => "rag:serp",
            SourceKind::Enrichment => "rag:enrich",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::TextIndex => "text-index",
            SourceKind::VectorIndex => "vector-index",
            SourceKind::HotCache => "hot-cache",
            SourceKind::LiveSearch => "live-search",
            SourceKind::Enrichment => "enrichment",
        }
    }

    /// Fixed presentation priority for prompt formatting: first-person
    /// content, then enrichment, live-search signals, indexed Q&A, and
    /// cached cluster data last. Output stability depends on this order.
    pub const PRIORITY: [SourceKind; 5] = [
        SourceKind::VectorIndex,
        SourceKind::Enrichment,
        SourceKind::LiveSearch,
        SourceKind::TextIndex,
        SourceKind::HotCache,
    ];
}

/// One entry in a search-engine results page fragment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerpResult {
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Payload variants for retrieved material
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContextPayload {
    QuestionAnswer {
        question: String,
        answer: String,
    },
    TitleSnippet {
        title: String,
        snippet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    SerpFragment {
        top_results: Vec<SerpResult>,
        related_questions: Vec<String>,
        related_searches: Vec<String>,
    },
}

/// Per-item relevance scores. Absent when the index that could compute them
/// was unavailable.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RelevanceScores {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_rank: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_similarity: Option<f32>,

    /// Weighted combination, present when hybrid search ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined: Option<f32>,
}

/// One unit of retrieved grounding material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub source: SourceKind,

    /// Source-level prior, copied from [`SourceKind::weight`]
    pub weight: f32,

    pub payload: ContextPayload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<RelevanceScores>,
}

impl RetrievalContext {
    pub fn new(source: SourceKind, payload: ContextPayload) -> Self {
        Self {
            source,
            weight: source.weight(),
            payload,
            scores: None,
        }
    }

    pub fn with_scores(mut self, scores: RelevanceScores) -> Self {
        self.scores = Some(scores);
        self
    }

    /// Item text truncated to a bounded preview, for prompt assembly
    pub fn preview(&self, max_chars: usize) -> String {
        let text = match &self.payload {
            ContextPayload::QuestionAnswer { question, answer } => {
                format!("Q: {} A: {}", question, answer)
            }
            ContextPayload::TitleSnippet { title, snippet, .. } => {
                format!("{}: {}", title, snippet)
            }
            ContextPayload::SerpFragment {
                top_results,
                related_questions,
                ..
            } => {
                let mut parts: Vec<String> = top_results
                    .iter()
                    .map(|r| format!("{}: {}", r.title, r.snippet))
                    .collect();
                if !related_questions.is_empty() {
                    parts.push(format!("People also ask: {}", related_questions.join("; ")));
                }
                parts.join(" | ")
            }
        };
        truncate_chars(&text, max_chars)
    }
}

/// Ordered sequence of retrieved contexts plus the weight sum used as a
/// coarse confidence signal by callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResult {
    pub contexts: Vec<RetrievalContext>,
    pub total_weight: f32,
}

impl RagResult {
    pub fn from_contexts(contexts: Vec<RetrievalContext>) -> Self {
        let total_weight = contexts.iter().map(|c| c.weight).sum();
        Self {
            contexts,
            total_weight,
        }
    }

    pub fn empty() -> Self {
        Self {
            contexts: Vec::new(),
            total_weight: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Which sources to include in one aggregation call
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceToggles {
    #[serde(default = "enabled")]
    pub full_text: bool,
    #[serde(default = "enabled")]
    pub vector: bool,
    #[serde(default = "enabled")]
    pub hot_cache: bool,
    #[serde(default = "enabled")]
    pub live_search: bool,
    #[serde(default = "enabled")]
    pub enrichment: bool,
}

fn enabled() -> bool {
    true
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            full_text: true,
            vector: true,
            hot_cache: true,
            live_search: true,
            enrichment: true,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}…", truncated.trim_end())
    }
}
