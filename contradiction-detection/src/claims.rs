//! Claim extraction (§4.14 stage 1): splits document text into candidate
//! factual claims. Grounded in `extract_claims_simple`/`_split_sentences` of
//! the original contradictions shard.

/// A candidate claim pulled from one document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub document_id: String,
    pub text: String,
    /// `sentence_<n>`, 1-based, matching the original's location tagging.
    pub location: String,
}

/// Sentences shorter than this many words aren't treated as claims — too
/// short to carry a verifiable assertion.
const MIN_CLAIM_WORDS: usize = 5;

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(|c| c == '.' || c == '!' || c == '?')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Sentence-splits `text` and keeps sentences with at least [`MIN_CLAIM_WORDS`]
/// words as claims.
pub fn extract_claims_simple(text: &str, document_id: &str) -> Vec<Claim> {
    split_sentences(text)
        .into_iter()
        .enumerate()
        .filter(|(_, sentence)| sentence.split_whitespace().count() >= MIN_CLAIM_WORDS)
        .map(|(i, sentence)| Claim {
            document_id: document_id.to_string(),
            text: sentence.to_string(),
            location: format!("sentence_{}", i + 1),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sentences_are_filtered_out() {
        let claims = extract_claims_simple("Yes. The board approved the transfer on Tuesday.", "doc-1");
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].text, "The board approved the transfer on Tuesday");
    }

    #[test]
    fn location_tags_are_one_based_and_sequential() {
        let claims = extract_claims_simple(
            "The board approved the transfer on Tuesday. The funds arrived the following week.",
            "doc-1",
        );
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].location, "sentence_1");
        assert_eq!(claims[1].location, "sentence_2");
    }
}
