//! Contradiction chain detection (§4.14 stage 5): links contradictions that
//! connect three or more documents into a chain (A contradicts B, B
//! contradicts C, ...). Grounded in `ChainDetector.detect_chains`/
//! `_dfs_find_paths` of the original contradictions shard.

use std::collections::{HashMap, HashSet};

use common::storage::types::contradiction::Contradiction;

const MAX_DEPTH: usize = 5;

fn sorted_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[allow(clippy::too_many_arguments)]
fn dfs_find_paths(
    current: &str,
    graph: &HashMap<String, HashSet<String>>,
    contradiction_map: &HashMap<(String, String), String>,
    visited: &mut HashSet<String>,
    path: &[String],
    max_depth: usize,
) -> Vec<String> {
    if path.len() >= max_depth {
        return Vec::new();
    }

    visited.insert(current.to_string());
    let mut longest_chain: Vec<String> = Vec::new();

    let Some(neighbors) = graph.get(current) else {
        return longest_chain;
    };

    for neighbor in neighbors {
        if path.contains(neighbor) {
            continue;
        }

        let key = sorted_pair(current, neighbor);
        let Some(contradiction_id) = contradiction_map.get(&key) else {
            continue;
        };

        let mut new_path = path.to_vec();
        new_path.push(neighbor.clone());

        let mut chain = vec![contradiction_id.clone()];
        let sub_chain = dfs_find_paths(neighbor, graph, contradiction_map, visited, &new_path, max_depth);
        chain.extend(sub_chain);

        if chain.len() > longest_chain.len() {
            longest_chain = chain;
        }
    }

    longest_chain
}

/// Builds an undirected graph of document relationships from `contradictions`
/// and returns every chain of at least two linked contradictions as a list
/// of contradiction ids, one per connected component.
pub fn detect_chains(contradictions: &[Contradiction]) -> Vec<Vec<String>> {
    let mut graph: HashMap<String, HashSet<String>> = HashMap::new();
    let mut contradiction_map: HashMap<(String, String), String> = HashMap::new();

    for c in contradictions {
        graph.entry(c.doc_a_id.clone()).or_default().insert(c.doc_b_id.clone());
        graph.entry(c.doc_b_id.clone()).or_default().insert(c.doc_a_id.clone());

        let key = sorted_pair(&c.doc_a_id, &c.doc_b_id);
        contradiction_map.insert(key, c.id.clone());
    }

    let mut chains = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();

    let start_docs: Vec<String> = graph.keys().cloned().collect();
    for start_doc in start_docs {
        if visited.contains(&start_doc) {
            continue;
        }

        let path = vec![start_doc.clone()];
        let chain = dfs_find_paths(&start_doc, &graph, &contradiction_map, &mut visited, &path, MAX_DEPTH);

        if chain.len() >= 2 {
            chains.push(chain);
        }
    }

    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::contradiction::{ContradictionSeverity, ContradictionStatus, ContradictionType};
    use chrono::Utc;

    fn contradiction(id: &str, doc_a: &str, doc_b: &str) -> Contradiction {
        let now = Utc::now();
        Contradiction {
            id: id.to_string(),
            created_at: now,
            updated_at: now,
            doc_a_id: doc_a.to_string(),
            doc_b_id: doc_b.to_string(),
            claim_a: "a".to_string(),
            claim_b: "b".to_string(),
            contradiction_type: ContradictionType::Direct,
            severity: ContradictionSeverity::High,
            status: ContradictionStatus::Detected,
            confidence: 0.9,
            chain_id: None,
        }
    }

    #[test]
    fn three_document_cycle_forms_one_chain() {
        let contradictions = vec![
            contradiction("c1", "doc-a", "doc-b"),
            contradiction("c2", "doc-b", "doc-c"),
            contradiction("c3", "doc-a", "doc-c"),
        ];

        let chains = detect_chains(&contradictions);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].len(), 2);
    }

    #[test]
    fn single_isolated_contradiction_forms_no_chain() {
        let contradictions = vec![contradiction("c1", "doc-a", "doc-b")];
        let chains = detect_chains(&contradictions);
        assert!(chains.is_empty());
    }

    #[test]
    fn disjoint_components_each_considered_independently() {
        let contradictions = vec![
            contradiction("c1", "doc-a", "doc-b"),
            contradiction("c2", "doc-b", "doc-c"),
            contradiction("c3", "doc-x", "doc-y"),
        ];

        let chains = detect_chains(&contradictions);
        assert_eq!(chains.len(), 1);
    }
}
