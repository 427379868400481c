//! Query command implementation

use crate::config::Config;
use crate::engine::Engine;
use crate::error::Result;
use crate::rank::Hit;
use crate::retrieve::{Diversity, RetrievalMode, RetrieveRequest};
use crate::store::ChunkFilter;
use serde::Serialize;
use tracing::info;

/// Query options; unset fields fall back to `[retrieval]` config
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub mode: Option<String>,
    pub top_k: Option<usize>,
    pub doc_ids: Vec<String>,
    pub doc_types: Vec<String>,
    /// Spread hits across documents
    pub diverse: bool,
}

/// Query result for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub requested_mode: RetrievalMode,
    pub mode_used: RetrievalMode,
    pub hits: Vec<Hit>,
}

pub fn build_request(
    config: &Config,
    query: &str,
    options: &QueryOptions,
) -> Result<RetrieveRequest> {
    let mode: RetrievalMode = options
        .mode
        .as_deref()
        .unwrap_or(&config.retrieval.default_mode)
        .parse()?;
    let top_k = options.top_k.unwrap_or(config.retrieval.default_top_k);

    let mut request = RetrieveRequest::new(query, mode, top_k);
    request.filter = ChunkFilter {
        doc_ids: (!options.doc_ids.is_empty()).then(|| options.doc_ids.clone()),
        doc_types: (!options.doc_types.is_empty()).then(|| options.doc_types.clone()),
    };
    if options.diverse {
        request.diversity = Some(Diversity {
            max_per_doc: config.retrieval.max_per_doc,
            min_docs: config.retrieval.min_docs,
        });
    }
    Ok(request)
}

/// Execute a query
pub async fn cmd_query(
    engine: &Engine,
    workspace: &str,
    query: &str,
    options: &QueryOptions,
) -> Result<QueryResult> {
    info!(workspace = %workspace, "Querying: {}", query);

    let request = build_request(engine.config(), query, options)?;
    let retrieval = engine.retriever().retrieve(workspace, &request).await?;

    info!("Returning {} results", retrieval.hits.len());
    Ok(QueryResult {
        query: query.to_string(),
        requested_mode: request.mode,
        mode_used: retrieval.mode_used,
        hits: retrieval.hits,
    })
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.trim().replace('\n', " ");
    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    } else {
        flat
    }
}

pub fn print_hits(hits: &[Hit]) {
    for (i, hit) in hits.iter().enumerate() {
        let pages = if hit.page_start == hit.page_end {
            format!("p. {}", hit.page_start)
        } else {
            format!("pp. {}-{}", hit.page_start, hit.page_end)
        };
        println!("{}. [score: {:.3}] {} ({})", i + 1, hit.score, hit.filename, pages);
        if let (Some(v), Some(b)) = (hit.vector_score, hit.bm25_score) {
            println!("   vector {:.3} · bm25 {:.3}", v, b);
        }
        println!("   {}\n", preview(&hit.text, 200));
    }
}

/// Print query results to console
pub fn print_query_results(result: &QueryResult) {
    println!("\n🔍 Query: {}\n", result.query);
    if result.mode_used != result.requested_mode {
        println!(
            "⚠ {} retrieval unavailable, used {} instead\n",
            result.requested_mode, result.mode_used
        );
    }
    println!("Found {} results:\n", result.hits.len());
    print_hits(&result.hits);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::test_engine;
    use crate::error::Error;
    use crate::index::test_support::seed_doc;

    #[test]
    fn test_build_request_defaults() {
        let config = Config::default();
        let request = build_request(&config, "q", &QueryOptions::default()).unwrap();
        assert_eq!(request.mode, RetrievalMode::Hybrid);
        assert_eq!(request.top_k, config.retrieval.default_top_k);
        assert!(request.filter.is_empty());
        assert!(request.diversity.is_none());

        let options = QueryOptions {
            mode: Some("sparse".to_string()),
            doc_ids: vec!["d1".to_string()],
            diverse: true,
            ..QueryOptions::default()
        };
        let request = build_request(&config, "q", &options).unwrap();
        assert_eq!(request.mode, RetrievalMode::Bm25);
        assert_eq!(request.filter.doc_ids, Some(vec!["d1".to_string()]));
        assert_eq!(request.diversity.unwrap().max_per_doc, config.retrieval.max_per_doc);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let options = QueryOptions {
            mode: Some("fuzzy".to_string()),
            ..QueryOptions::default()
        };
        assert!(matches!(
            build_request(&Config::default(), "q", &options),
            Err(Error::Retrieval { .. })
        ));
    }

    #[tokio::test]
    async fn test_bm25_query_builds_sparse_index() {
        let te = test_engine().await;
        seed_doc(
            te.engine.db(),
            "w1",
            "notes.pdf",
            &["gradient descent converges", "attention in transformers"],
        )
        .await;

        let options = QueryOptions {
            mode: Some("bm25".to_string()),
            top_k: Some(3),
            ..QueryOptions::default()
        };
        let result = cmd_query(&te.engine, "w1", "transformers", &options).await.unwrap();
        assert_eq!(result.mode_used, RetrievalMode::Bm25);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].text, "attention in transformers");
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("héllo\nworld", 5), "héllo...");
        assert_eq!(preview("short", 10), "short");
    }
}
