//! Parallel multi-source context aggregation and deterministic prompt
//! formatting
//!
//! The aggregator fans one query out to every enabled source, applies each
//! source's own time budget, and assembles whatever came back in time. A
//! slow or failing source costs its own contribution, never the request.

use crate::error::Result;
use crate::retrieval::models::{RagResult, RetrievalContext, SourceKind, SourceToggles};
use crate::retrieval::resolver::SourceResolver;
use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{info, warn};

/// Character budget for one formatted context item
const ITEM_PREVIEW_CHARS: usize = 600;

fn section_title(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::VectorIndex => "In his own words",
        SourceKind::Enrichment => "Background",
        SourceKind::LiveSearch => "What people are searching",
        SourceKind::TextIndex => "Related questions and answers",
        SourceKind::HotCache => "Previously answered",
    }
}

pub struct ContextAggregator {
    resolvers: Vec<Arc<dyn SourceResolver>>,
}

impl ContextAggregator {
    pub fn new(resolvers: Vec<Arc<dyn SourceResolver>>) -> Self {
        Self { resolvers }
    }

    fn enabled(kind: SourceKind, toggles: &SourceToggles) -> bool {
        match kind {
            SourceKind::TextIndex => toggles.full_text,
            SourceKind::VectorIndex => toggles.vector,
            SourceKind::HotCache => toggles.hot_cache,
            SourceKind::LiveSearch => toggles.live_search,
            SourceKind::Enrichment => toggles.enrichment,
        }
    }

    /// Gather contexts from every enabled source in parallel.
    ///
    /// Always returns a result; sources that error or exceed their budget
    /// contribute nothing.
    pub async fn build_context(
        &self,
        query: &str,
        toggles: &SourceToggles,
        force_refresh: bool,
    ) -> Result<RagResult> {
        let start = Instant::now();

        let tasks = self
            .resolvers
            .iter()
            .filter(|r| Self::enabled(r.kind(), toggles))
            .map(|resolver| {
                let resolver = resolver.clone();
                let query = query.to_string();
                async move {
                    let kind = resolver.kind();
                    match timeout(resolver.budget(), resolver.resolve(&query, force_refresh)).await
                    {
                        Ok(Ok(contexts)) => contexts,
                        Ok(Err(e)) => {
                            warn!(source = kind.as_str(), error = %e, "Source failed, skipping");
                            Vec::new()
                        }
                        Err(_) => {
                            warn!(
                                source = kind.as_str(),
                                budget_ms = resolver.budget().as_millis() as u64,
                                "Source exceeded its budget, skipping"
                            );
                            Vec::new()
                        }
                    }
                }
            });

        let contexts: Vec<RetrievalContext> = join_all(tasks).await.into_iter().flatten().collect();
        let result = RagResult::from_contexts(contexts);

        info!(
            contexts = result.contexts.len(),
            total_weight = result.total_weight,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Context aggregation complete"
        );
        Ok(result)
    }
}

/// Render aggregated contexts into a stable prompt block.
///
/// Sections appear in fixed source-priority order and items keep their
/// within-source order, so identical inputs always format identically.
pub fn format_context(result: &RagResult) -> String {
    let mut sections: IndexMap<SourceKind, Vec<String>> = SourceKind::PRIORITY
        .iter()
        .map(|&kind| (kind, Vec::new()))
        .collect();

    for context in &result.contexts {
        if let Some(items) = sections.get_mut(&context.source) {
            items.push(context.preview(ITEM_PREVIEW_CHARS));
        }
    }

    let mut out = String::new();
    for (kind, items) in &sections {
        if items.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("## ");
        out.push_str(section_title(*kind));
        out.push('\n');
        for item in items {
            out.push_str("- ");
            out.push_str(item);
            out.push('\n');
        }
    }
    out
}
