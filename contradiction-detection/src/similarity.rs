//! Claim pairing (§4.14 stage 2): finds claims across two documents that talk
//! about the same thing, either by embedding cosine similarity or, when no
//! embedding service is available, by word-overlap. Grounded in
//! `find_similar_claims`/`_find_similar_claims_keywords`/`_cosine_similarity`/
//! `_text_similarity` of the original contradictions shard.

use std::collections::HashSet;

use crate::claims::Claim;

/// Pairs below this overlap aren't considered related claims at all.
const KEYWORD_SIMILARITY_FLOOR: f32 = 0.2;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Jaccard overlap of the two claims' word sets.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    let set_a = word_set(a);
    let set_b = word_set(b);

    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count() as f32;
    let union = set_a.union(&set_b).count() as f32;

    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Pairs claims across the two slices by embedding cosine similarity,
/// keeping pairs at or above `threshold`, sorted by descending similarity.
pub fn find_similar_claims(
    claims_a: &[Claim],
    embeddings_a: &[Vec<f32>],
    claims_b: &[Claim],
    embeddings_b: &[Vec<f32>],
    threshold: f32,
) -> Vec<(Claim, Claim, f32)> {
    let mut pairs = Vec::new();

    for (claim_a, embedding_a) in claims_a.iter().zip(embeddings_a) {
        for (claim_b, embedding_b) in claims_b.iter().zip(embeddings_b) {
            let similarity = cosine_similarity(embedding_a, embedding_b);
            if similarity >= threshold {
                pairs.push((claim_a.clone(), claim_b.clone(), similarity));
            }
        }
    }

    pairs.sort_by(|a, b| b.2.total_cmp(&a.2));
    pairs
}

/// Keyword-overlap fallback for pairing claims when no embedding service is
/// available.
pub fn find_similar_claims_keywords(claims_a: &[Claim], claims_b: &[Claim]) -> Vec<(Claim, Claim, f32)> {
    let mut pairs = Vec::new();

    for claim_a in claims_a {
        for claim_b in claims_b {
            let similarity = text_similarity(&claim_a.text, &claim_b.text);
            if similarity >= KEYWORD_SIMILARITY_FLOOR {
                pairs.push((claim_a.clone(), claim_b.clone(), similarity));
            }
        }
    }

    pairs.sort_by(|a, b| b.2.total_cmp(&a.2));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(document_id: &str, text: &str) -> Claim {
        Claim { document_id: document_id.to_string(), text: text.to_string(), location: "sentence_1".to_string() }
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0_f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn text_similarity_of_identical_sentences_is_one() {
        assert!((text_similarity("the board approved the transfer", "the board approved the transfer") - 1.0).abs() < 1e-6);
    }

    #[test]
    fn text_similarity_of_unrelated_sentences_is_low() {
        assert!(text_similarity("the board approved the transfer", "bananas grow in tropical climates") < 0.2);
    }

    #[test]
    fn find_similar_claims_keeps_only_pairs_above_threshold_sorted_descending() {
        let claims_a = vec![claim("doc-a", "revenue was one million dollars")];
        let embeddings_a = vec![vec![1.0_f32, 0.0, 0.0]];
        let claims_b = vec![
            claim("doc-b", "revenue was one million dollars too"),
            claim("doc-b", "completely unrelated statement here"),
        ];
        let embeddings_b = vec![vec![0.99_f32, 0.01, 0.0], vec![0.0_f32, 1.0, 0.0]];

        let pairs = find_similar_claims(&claims_a, &embeddings_a, &claims_b, &embeddings_b, 0.8);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1.text, "revenue was one million dollars too");
    }

    #[test]
    fn keyword_fallback_finds_overlapping_claims() {
        let claims_a = vec![claim("doc-a", "the board approved the transfer on Tuesday")];
        let claims_b = vec![claim("doc-b", "the board rejected the transfer on Tuesday")];

        let pairs = find_similar_claims_keywords(&claims_a, &claims_b);
        assert_eq!(pairs.len(), 1);
    }
}
