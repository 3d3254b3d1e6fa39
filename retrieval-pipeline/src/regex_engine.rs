//! Regex Engine (§4.12): pattern validation with a performance/danger
//! classification, a preset catalog, and in-process match enumeration with
//! context windows. Grounded in the original system's `regex.py` preset
//! catalog (including its `credit_card` preset, a supplemented addition
//! beyond spec.md's illustrative list) and §4.12's validation/search rules.

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::file_info::deserialize_flexible_id},
};
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternPerf {
    Fast,
    Moderate,
    Slow,
    Dangerous,
    Invalid,
}

/// Result of validating a candidate pattern before it's ever run against the
/// corpus.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub ok: bool,
    pub error: Option<String>,
    pub perf: PatternPerf,
}

/// Nested-quantifier shapes like `(.+)+` or `(a|a)+` can exhibit catastrophic
/// backtracking; flagged as `Dangerous` even though Rust's `regex` crate itself
/// doesn't backtrack, matching the spec's classification contract.
fn looks_dangerous(pattern: &str) -> bool {
    let nested_quantifier = Regex::new(r"\([^)]*[+*][^)]*\)[+*]").expect("static nested-quantifier detector");
    let repeated_alternation = Regex::new(r"\((\w+)\|\1\)[+*]").expect("static repeated-alternation detector");
    nested_quantifier.is_match(pattern) || repeated_alternation.is_match(pattern)
}

fn classify_perf(pattern: &str) -> PatternPerf {
    if looks_dangerous(pattern) {
        return PatternPerf::Dangerous;
    }

    let wildcard_heavy = pattern.matches(".*").count() + pattern.matches(".+").count();
    if wildcard_heavy >= 3 {
        PatternPerf::Slow
    } else if wildcard_heavy >= 1 || pattern.contains(".{") {
        PatternPerf::Moderate
    } else {
        PatternPerf::Fast
    }
}

pub fn validate_pattern(pattern: &str) -> ValidationResult {
    match Regex::new(pattern) {
        Ok(_) => ValidationResult { ok: true, error: None, perf: classify_perf(pattern) },
        Err(err) => ValidationResult { ok: false, error: Some(err.to_string()), perf: PatternPerf::Invalid },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFlags {
    CaseSensitive,
    CaseInsensitive,
}

/// One match enumerated in-process against a candidate chunk's text.
#[derive(Debug, Clone)]
pub struct RegexMatch {
    pub chunk_id: String,
    pub context: String,
    pub line_number: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Default global cap on enumerated matches across a whole search call.
pub const DEFAULT_MATCH_CAP: usize = 1000;

/// Enumerates individual matches of `pattern` in `text`, extracting a
/// `context_chars`-wide window around each with ellipses when truncated, and
/// the 1-based line number (newline count before the match, plus one).
pub fn enumerate_matches(pattern: &Regex, chunk_id: &str, text: &str, context_chars: usize) -> Vec<RegexMatch> {
    pattern
        .find_iter(text)
        .map(|m| {
            let start = m.start();
            let end = m.end();

            let context_start = start.saturating_sub(context_chars);
            let context_end = (end + context_chars).min(text.len());

            let mut context = text[context_start..context_end].to_string();
            if context_start > 0 {
                context = format!("...{context}");
            }
            if context_end < text.len() {
                context = format!("{context}...");
            }

            let line_number = text[..start].matches('\n').count() + 1;

            RegexMatch { chunk_id: chunk_id.to_string(), context, line_number, start_offset: start, end_offset: end }
        })
        .collect()
}

/// Builds a case-(in)sensitive regex to match `flags`, used for the in-process
/// re-run after the database-side candidate scan.
pub fn compile_with_flags(pattern: &str, flags: MatchFlags) -> Result<Regex, regex::Error> {
    match flags {
        MatchFlags::CaseSensitive => Regex::new(pattern),
        MatchFlags::CaseInsensitive => Regex::new(&format!("(?i){pattern}")),
    }
}

/// A named, categorized regex preset available out of the box.
#[derive(Debug, Clone, Copy)]
pub struct RegexPreset {
    pub id: &'static str,
    pub name: &'static str,
    pub pattern: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

/// Built-in preset catalog. `credit_card` is a supplemented ninth preset beyond
/// spec.md's seven illustrative examples, carried from the original `regex.py`.
pub const PRESETS: &[RegexPreset] = &[
    RegexPreset {
        id: "email",
        name: "Email address",
        pattern: r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
        description: "Matches standard email addresses",
        category: "contact",
    },
    RegexPreset {
        id: "phone_us",
        name: "US phone number",
        pattern: r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}",
        description: "Matches US-format phone numbers",
        category: "contact",
    },
    RegexPreset {
        id: "ssn",
        name: "Social Security Number",
        pattern: r"\d{3}-\d{2}-\d{4}",
        description: "Matches US Social Security Numbers",
        category: "financial",
    },
    RegexPreset {
        id: "ip_address",
        name: "IP address",
        pattern: r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
        description: "Matches IPv4 addresses",
        category: "network",
    },
    RegexPreset {
        id: "url",
        name: "URL",
        pattern: r"https?://[^\s]+",
        description: "Matches HTTP/HTTPS URLs",
        category: "network",
    },
    RegexPreset {
        id: "money_usd",
        name: "USD amount",
        pattern: r"\$\s*\d+(?:,\d{3})*(?:\.\d{2})?",
        description: "Matches USD currency amounts",
        category: "financial",
    },
    RegexPreset {
        id: "date_mdy",
        name: "Date (M/D/Y)",
        pattern: r"\b\d{1,2}/\d{1,2}/\d{2,4}\b",
        description: "Matches dates in month/day/year format",
        category: "temporal",
    },
    RegexPreset {
        id: "credit_card",
        name: "Credit card number",
        pattern: r"\b(?:\d[ -]*?){13,16}\b",
        description: "Matches candidate credit card numbers",
        category: "financial",
    },
];

pub fn find_preset(id: &str) -> Option<&'static RegexPreset> {
    PRESETS.iter().find(|p| p.id == id)
}

/// Regex metacharacters that end a literal run when extracting a prefilter.
const METACHARACTERS: &[char] = &[
    '.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$', '\\',
];

/// Pulls the longest literal substring out of `pattern` so the database can
/// narrow candidates with a plain substring scan before the full pattern is
/// compiled and run in-process (§4.12 step 2: "database-side regex" isn't a
/// real regex engine in SurrealQL, so narrowing is done via `string::contains`
/// on the longest literal run, which is always a safe subset of true matches).
/// Returns `None` when the pattern has no literal run of at least 3 characters
/// (e.g. `\d{3}-\d{4}`), in which case the caller must scan every chunk.
pub fn literal_prefilter(pattern: &str) -> Option<String> {
    let mut best = String::new();
    let mut current = String::new();

    for ch in pattern.chars() {
        if METACHARACTERS.contains(&ch) {
            if current.len() > best.len() {
                best = current.clone();
            }
            current.clear();
        } else {
            current.push(ch);
        }
    }
    if current.len() > best.len() {
        best = current;
    }

    if best.len() >= 3 {
        Some(best)
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct ChunkCandidate {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    chunk: String,
}

/// Database-side candidate narrowing (§4.12 step 2): finds chunks whose text
/// contains the pattern's literal prefilter, without running the real regex
/// in SurrealQL. Chunks with no usable literal run are returned unfiltered —
/// the caller's in-process `enumerate_matches` pass is the actual filter in
/// that case, at the cost of scanning the whole corpus.
pub async fn candidate_chunks(
    db: &SurrealDbClient,
    user_id: &str,
    pattern: &str,
) -> Result<Vec<(String, String)>, AppError> {
    let candidates: Vec<ChunkCandidate> = match literal_prefilter(pattern) {
        Some(literal) => {
            db.client
                .query("SELECT id, chunk FROM text_chunk WHERE user_id = $user_id AND string::contains(chunk, $literal)")
                .bind(("user_id", user_id.to_string()))
                .bind(("literal", literal))
                .await
                .map_err(AppError::Database)?
                .take(0)
                .map_err(AppError::Database)?
        }
        None => {
            db.client
                .query("SELECT id, chunk FROM text_chunk WHERE user_id = $user_id")
                .bind(("user_id", user_id.to_string()))
                .await
                .map_err(AppError::Database)?
                .take(0)
                .map_err(AppError::Database)?
        }
    };

    Ok(candidates.into_iter().map(|c| (c.id, c.chunk)).collect())
}
