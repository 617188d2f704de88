//! Multi-source retrieval: upstream clients, per-source resolvers, and the
//! data model for retrieved grounding material

pub mod http;
pub mod hybrid;
pub mod key;
pub mod models;
pub mod providers;
pub mod resolver;

pub use key::cache_key;
pub use models::{
    ContextPayload, RagResult, RelevanceScores, RetrievalContext, SerpResult, SourceKind,
    SourceToggles,
};
pub use providers::{
    EmbeddingProvider, EnrichmentDoc, EnrichmentProvider, HotContentStore, HotEntry,
    LiveSearchProvider, QaHit, QaIndex, SerpData, TranscriptHit, TranscriptIndex,
};
pub use resolver::{
    envelope_key, slugify, EnrichmentResolver, EnvelopeAnswerStore, FullTextResolver,
    HotCacheResolver, LiveSearchResolver, SourceResolver, TranscriptResolver,
};
