use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static GLOBAL_HINTS: OnceLock<Option<Regex>> = OnceLock::new();

/// Which answering path a query takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryScope {
    /// Whole-scope question, answered by map-reduce over document summaries
    Global,
    /// Point question, answered by retrieval
    Local,
}

fn global_hints() -> Option<&'static Regex> {
    GLOBAL_HINTS
        .get_or_init(|| {
            Regex::new(concat!(
                r"(?i)\b(whole|entire|exam|overview|summary|summari[sz]e|everything|across",
                r"|all\s+(lectures|papers|documents|chapters))\b",
            ))
            .ok()
        })
        .as_ref()
}

/// Keyword and length heuristic. It misclassifies sometimes: a long, narrow
/// question is treated as global and a terse scope-wide one as local.
pub fn classify_scope(query: &str, word_threshold: usize) -> QueryScope {
    if global_hints().is_some_and(|re| re.is_match(query)) {
        return QueryScope::Global;
    }
    if word_threshold > 0 && query.split_whitespace().count() >= word_threshold {
        return QueryScope::Global;
    }
    QueryScope::Local
}
