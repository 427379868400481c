//! Ask command: coverage answer for scope-wide questions, retrieval otherwise

use super::query::{cmd_query, print_hits, QueryOptions, QueryResult};
use crate::coverage::{classify_scope, CoverageAnswer, QueryScope};
use crate::engine::Engine;
use crate::error::Result;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Scope (course, project) whose units a global question covers
    pub scope: Option<String>,
    /// Force an answering path instead of classifying the question
    pub force_scope: Option<QueryScope>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AskResult {
    Coverage(CoverageAnswer),
    Retrieval(QueryResult),
}

pub async fn cmd_ask(
    engine: &Engine,
    workspace: &str,
    question: &str,
    options: &AskOptions,
) -> Result<AskResult> {
    let config = engine.config();
    let scope = options
        .force_scope
        .unwrap_or_else(|| classify_scope(question, config.coverage.global_word_threshold));
    info!(workspace = %workspace, ?scope, "Answering question");

    match (scope, options.scope.as_deref()) {
        (QueryScope::Global, Some(scope_id)) => {
            let answer = engine
                .coverage()
                .coverage_query(
                    workspace,
                    scope_id,
                    question,
                    config.coverage.map_token_budget,
                    config.coverage.reduce_token_budget,
                )
                .await?;
            Ok(AskResult::Coverage(answer))
        }
        (QueryScope::Global, None) => {
            warn!("Scope-wide question without --scope, answering from retrieval");
            retrieval(engine, workspace, question, true).await
        }
        (QueryScope::Local, _) => retrieval(engine, workspace, question, false).await,
    }
}

async fn retrieval(
    engine: &Engine,
    workspace: &str,
    question: &str,
    diverse: bool,
) -> Result<AskResult> {
    let options = QueryOptions {
        diverse,
        ..QueryOptions::default()
    };
    Ok(AskResult::Retrieval(
        cmd_query(engine, workspace, question, &options).await?,
    ))
}

pub fn print_ask_result(result: &AskResult) {
    match result {
        AskResult::Coverage(answer) => {
            println!("\n{}\n", answer.answer);
            if !answer.citations.is_empty() {
                println!("Sources:");
                for c in &answer.citations {
                    println!("  • {} ({})", c.title, c.doc_id);
                }
            }
            let coverage = &answer.coverage;
            println!(
                "\nCoverage: {}/{} units with evidence, {} documents used, {} without summaries",
                coverage.per_unit.len() - coverage.missing_units.len(),
                coverage.per_unit.len(),
                coverage.included_docs.len(),
                coverage.missing_docs.len()
            );
            for unit in coverage
                .per_unit
                .iter()
                .filter(|u| coverage.missing_units.contains(&u.unit_id))
            {
                println!("  ✗ {}", unit.title);
            }
        }
        AskResult::Retrieval(result) => {
            println!("\n🔍 {}\n", result.query);
            print_hits(&result.hits);
        }
    }
}
