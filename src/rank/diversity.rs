use std::collections::{HashMap, HashSet};

/// Spread a ranked list across documents.
///
/// The first pass takes the best item of each unseen document until
/// `min_docs` documents are represented. The second pass fills the
/// remaining slots in rank order, allowing at most `max_per_doc` items per
/// document. Each pass keeps the input's relative order.
pub fn diversify<T, F>(
    items: Vec<T>,
    top_k: usize,
    max_per_doc: usize,
    min_docs: usize,
    doc_of: F,
) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let max_per_doc = max_per_doc.max(1);
    let mut taken = vec![false; items.len()];
    let mut per_doc: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<usize> = Vec::with_capacity(top_k.min(items.len()));

    let mut seen: HashSet<&str> = HashSet::new();
    for (i, item) in items.iter().enumerate() {
        if order.len() >= top_k || seen.len() >= min_docs {
            break;
        }
        let doc = doc_of(item);
        if seen.insert(doc) {
            taken[i] = true;
            *per_doc.entry(doc.to_string()).or_insert(0) += 1;
            order.push(i);
        }
    }

    for (i, item) in items.iter().enumerate() {
        if order.len() >= top_k {
            break;
        }
        if taken[i] {
            continue;
        }
        let count = per_doc.entry(doc_of(item).to_string()).or_insert(0);
        if *count < max_per_doc {
            *count += 1;
            taken[i] = true;
            order.push(i);
        }
    }

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ranked(docs: &[&str]) -> Vec<(usize, String)> {
        docs.iter()
            .enumerate()
            .map(|(i, d)| (i, d.to_string()))
            .collect()
    }

    #[test]
    fn test_min_docs_and_per_doc_cap() {
        // Five documents, heavily skewed towards d1 at the top
        let items = ranked(&["d1", "d1", "d1", "d1", "d2", "d2", "d2", "d3", "d4", "d5"]);
        let result = diversify(items, 6, 2, 3, |(_, d)| d.as_str());

        assert_eq!(result.len(), 6);
        let prefix: HashSet<&str> = result[..3].iter().map(|(_, d)| d.as_str()).collect();
        assert!(prefix.len() >= 3);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (_, d) in &result {
            *counts.entry(d.as_str()).or_default() += 1;
        }
        assert!(counts.values().all(|&c| c <= 2));

        let ranks: Vec<usize> = result.iter().map(|(r, _)| *r).collect();
        assert_eq!(ranks, vec![0, 4, 7, 1, 5, 8]);
    }

    #[test]
    fn test_fewer_docs_than_min() {
        let items = ranked(&["d1", "d1", "d2", "d1"]);
        let result = diversify(items, 10, 2, 5, |(_, d)| d.as_str());
        let ranks: Vec<usize> = result.iter().map(|(r, _)| *r).collect();
        assert_eq!(ranks, vec![0, 2, 1]);
    }

    #[test]
    fn test_zero_cap_treated_as_one() {
        let items = ranked(&["d1", "d1", "d2"]);
        let result = diversify(items, 10, 0, 0, |(_, d)| d.as_str());
        assert_eq!(result.len(), 2);
    }
}
