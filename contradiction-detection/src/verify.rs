//! Heuristic contradiction verification and severity scoring (§4.14 stages
//! 3-4). Grounded in `_verify_contradiction_heuristic`/`score_severity` of
//! the original contradictions shard; the LLM verification path that
//! `verify_contradiction` also offers is out of scope here.

use std::sync::LazyLock;

use common::storage::types::contradiction::{ContradictionSeverity, ContradictionType};
use regex::Regex;

use crate::{claims::Claim, similarity::text_similarity};

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+(?:,\d{3})*(?:\.\d+)?\b").unwrap());

static NEGATION_PATTERNS: LazyLock<Vec<(Regex, Regex)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"\bnot\b").unwrap(), Regex::new(r"\bis\b").unwrap()),
        (Regex::new(r"\bno\b").unwrap(), Regex::new(r"\byes\b").unwrap()),
        (Regex::new(r"\bnever\b").unwrap(), Regex::new(r"\balways\b").unwrap()),
        (Regex::new(r"\bdid not\b").unwrap(), Regex::new(r"\bdid\b").unwrap()),
    ]
});

const HIGH_SEVERITY_KEYWORDS: &[&str] = &["not", "never", "opposite", "false", "denied", "refuted"];

/// A heuristic verdict: the contradiction type, a human-readable reason (log
/// only, not persisted — [`common::storage::types::contradiction::Contradiction`]
/// has no explanation column), and a confidence score.
pub struct HeuristicVerdict {
    pub contradiction_type: ContradictionType,
    pub reason: String,
    pub confidence: f64,
}

/// Heuristic verification: negation patterns first, then a numeric mismatch
/// on otherwise-similar text, then a near-duplicate skip, then a contextual
/// fallback for moderately similar claims. Mirrors the original's checks in
/// the same order.
pub fn verify_contradiction_heuristic(claim_a: &Claim, claim_b: &Claim, similarity: f32) -> Option<HeuristicVerdict> {
    let text_a = claim_a.text.to_lowercase();
    let text_b = claim_b.text.to_lowercase();

    for (neg_pattern, pos_pattern) in NEGATION_PATTERNS.iter() {
        if neg_pattern.is_match(&text_a) && pos_pattern.is_match(&text_b) {
            return Some(HeuristicVerdict {
                contradiction_type: ContradictionType::Direct,
                reason: "Negation pattern detected".to_string(),
                confidence: f64::from(similarity) * 0.8,
            });
        }
    }

    let numbers_a: Vec<&str> = NUMBER_PATTERN.find_iter(&text_a).map(|m| m.as_str()).collect();
    let numbers_b: Vec<&str> = NUMBER_PATTERN.find_iter(&text_b).map(|m| m.as_str()).collect();

    if !numbers_a.is_empty() && !numbers_b.is_empty() && numbers_a != numbers_b {
        let text_a_no_nums = NUMBER_PATTERN.replace_all(&text_a, "NUM");
        let text_b_no_nums = NUMBER_PATTERN.replace_all(&text_b, "NUM");

        if text_similarity(&text_a_no_nums, &text_b_no_nums) > 0.7 {
            return Some(HeuristicVerdict {
                contradiction_type: ContradictionType::Numeric,
                reason: format!("Different numbers: {numbers_a:?} vs {numbers_b:?}"),
                confidence: f64::from(similarity) * 0.7,
            });
        }
    }

    if similarity > 0.9 {
        return None;
    }

    if similarity > 0.6 {
        return Some(HeuristicVerdict {
            contradiction_type: ContradictionType::Contextual,
            reason: "Claims are semantically similar but may differ in meaning".to_string(),
            confidence: f64::from(similarity),
        });
    }

    None
}

/// Scores severity from the contradiction type, confidence, and presence of
/// high-severity keywords in either claim. Mirrors `score_severity` exactly.
pub fn score_severity(
    claim_a: &str,
    claim_b: &str,
    contradiction_type: ContradictionType,
    confidence: f64,
) -> ContradictionSeverity {
    let claim_a_lower = claim_a.to_lowercase();
    let claim_b_lower = claim_b.to_lowercase();

    let high_count = HIGH_SEVERITY_KEYWORDS
        .iter()
        .filter(|keyword| claim_a_lower.contains(**keyword) || claim_b_lower.contains(**keyword))
        .count();

    if high_count >= 2 || contradiction_type == ContradictionType::Direct {
        return ContradictionSeverity::High;
    }

    if matches!(contradiction_type, ContradictionType::Temporal | ContradictionType::Numeric) {
        return ContradictionSeverity::Medium;
    }

    if confidence > 0.8 {
        return ContradictionSeverity::Medium;
    }

    ContradictionSeverity::Low
}
