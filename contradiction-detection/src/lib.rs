//! Contradiction shard (§4.14): extracts candidate claims from document text,
//! pairs up claims across two documents by similarity, verifies whether a
//! pair actually contradicts, scores severity, and links contradictions that
//! chain across three or more documents. Grounded in
//! `arkham_shard_contradictions/detector.py`'s `ContradictionDetector` and
//! `ChainDetector`; the LLM verification path that detector also offers is
//! out of scope here (LLM inference internals aren't this crate's concern) so
//! only the heuristic path is implemented.

pub mod chains;
pub mod claims;
pub mod similarity;
pub mod verify;

pub use chains::detect_chains;
pub use claims::{extract_claims_simple, Claim};
pub use similarity::{cosine_similarity, find_similar_claims, find_similar_claims_keywords, text_similarity};
pub use verify::{score_severity, verify_contradiction_heuristic, HeuristicVerdict};
