//! Red-flag detector (§4.13): pattern-based indicators in document text —
//! money, date, and name density, sensitive keywords, and a dedicated
//! structuring (smurfing) sub-detector. Grounded in `detect_red_flags` of the
//! original anomalies shard and the structuring detector in
//! `red_flag_service.py::detect_financial_flags`.

use std::{collections::HashSet, sync::LazyLock};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::anomaly::{Anomaly, AnomalySeverity, AnomalyType},
    },
};
use regex::Regex;
use serde_json::json;

static MONEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s*\d+(?:,\d{3})*(?:\.\d{2})?|\d+(?:,\d{3})*(?:\.\d{2})?\s*(?:USD|EUR|GBP|dollars?|euros?|pounds?)")
        .expect("static money pattern")
});

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b|\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2},?\s+\d{4}\b")
        .expect("static date pattern")
});

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b").expect("static name pattern"));

const SENSITIVE_KEYWORDS: &[&str] = &[
    "confidential",
    "secret",
    "classified",
    "private",
    "restricted",
    "internal only",
    "do not distribute",
    "proprietary",
    "privileged",
];

const MONEY_COUNT_THRESHOLD: usize = 10;
const DATE_COUNT_THRESHOLD: usize = 15;
const UNIQUE_NAME_THRESHOLD: usize = 20;

/// Lower/upper bound (inclusive) of the structuring ("smurfing") detector:
/// amounts just under the $10,000 reporting threshold.
const STRUCTURING_RANGE: (f64, f64) = (9000.0, 9999.0);
const STRUCTURING_MIN_COUNT: usize = 3;

/// Parses `"$9,500.00"`-style matches into a bare amount, or `None` if the
/// digits don't parse (currency symbol with no numerals, stray punctuation).
fn parse_amount(raw: &str) -> Option<f64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    digits.parse::<f64>().ok()
}

/// Runs the money/date/name/keyword red-flag checks and records one anomaly
/// per pattern that clears its threshold.
pub async fn detect(db: &SurrealDbClient, doc_id: &str, text: &str) -> Result<Vec<Anomaly>, AppError> {
    let mut found = Vec::new();

    let money_matches: Vec<&str> = MONEY_PATTERN.find_iter(text).map(|m| m.as_str()).collect();
    if money_matches.len() > MONEY_COUNT_THRESHOLD {
        found.push(
            Anomaly::record(
                db,
                doc_id,
                AnomalyType::RedFlag,
                money_matches.len() as f64,
                AnomalySeverity::High,
                0.9,
                format!("High frequency of monetary references ({} found)", money_matches.len()),
                json!({
                    "pattern_type": "money",
                    "count": money_matches.len(),
                    "examples": money_matches.iter().take(5).collect::<Vec<_>>(),
                }),
            )
            .await?,
        );
    }

    let date_matches: Vec<&str> = DATE_PATTERN.find_iter(text).map(|m| m.as_str()).collect();
    if date_matches.len() > DATE_COUNT_THRESHOLD {
        found.push(
            Anomaly::record(
                db,
                doc_id,
                AnomalyType::RedFlag,
                date_matches.len() as f64,
                AnomalySeverity::Medium,
                0.8,
                format!("High frequency of date references ({} found)", date_matches.len()),
                json!({
                    "pattern_type": "dates",
                    "count": date_matches.len(),
                    "examples": date_matches.iter().take(5).collect::<Vec<_>>(),
                }),
            )
            .await?,
        );
    }

    let unique_names: HashSet<&str> = NAME_PATTERN.find_iter(text).map(|m| m.as_str()).collect();
    if unique_names.len() > UNIQUE_NAME_THRESHOLD {
        found.push(
            Anomaly::record(
                db,
                doc_id,
                AnomalyType::RedFlag,
                unique_names.len() as f64,
                AnomalySeverity::Medium,
                0.7,
                format!("High frequency of name patterns ({} unique found)", unique_names.len()),
                json!({
                    "pattern_type": "names",
                    "count": unique_names.len(),
                    "examples": unique_names.iter().take(5).collect::<Vec<_>>(),
                }),
            )
            .await?,
        );
    }

    let text_lower = text.to_lowercase();
    let found_keywords: Vec<&str> = SENSITIVE_KEYWORDS
        .iter()
        .filter(|kw| text_lower.contains(*kw))
        .copied()
        .collect();
    if !found_keywords.is_empty() {
        found.push(
            Anomaly::record(
                db,
                doc_id,
                AnomalyType::RedFlag,
                found_keywords.len() as f64,
                AnomalySeverity::Critical,
                1.0,
                format!("Contains sensitive keywords: {}", found_keywords.join(", ")),
                json!({
                    "pattern_type": "sensitive_keywords",
                    "keywords": found_keywords,
                }),
            )
            .await?,
        );
    }

    found.extend(detect_round_numbers(db, doc_id, text).await?);

    if let Some(structuring) = detect_structuring(db, doc_id, text).await? {
        found.push(structuring);
    }

    Ok(found)
}

/// Flags each monetary amount that is a round multiple of 1000 (>= 1000) as a
/// possible sign of estimation or artificial structuring rather than a
/// precise transaction. Grounded in `red_flag_service.py`'s "Round Number
/// Transactions" detector.
async fn detect_round_numbers(db: &SurrealDbClient, doc_id: &str, text: &str) -> Result<Vec<Anomaly>, AppError> {
    let mut found = Vec::new();

    for m in MONEY_PATTERN.find_iter(text) {
        let Some(amount) = parse_amount(m.as_str()) else { continue };
        if amount >= 1000.0 && amount % 1000.0 == 0.0 {
            found.push(
                Anomaly::record(
                    db,
                    doc_id,
                    AnomalyType::RedFlag,
                    amount,
                    AnomalySeverity::Medium,
                    0.6,
                    format!(
                        "Transaction amount {} is a round number (ends in 000), which may indicate artificial structuring or estimation rather than an actual precise transaction",
                        m.as_str()
                    ),
                    json!({
                        "pattern_type": "round_numbers",
                        "amount": m.as_str(),
                        "numeric_value": amount,
                    }),
                )
                .await?,
            );
        }
    }

    Ok(found)
}

/// Flags 3+ monetary amounts in `[9000, 9999]` within one document as a
/// possible structuring pattern evading the $10,000 reporting threshold.
async fn detect_structuring(db: &SurrealDbClient, doc_id: &str, text: &str) -> Result<Option<Anomaly>, AppError> {
    let amounts: Vec<(String, f64)> = MONEY_PATTERN
        .find_iter(text)
        .filter_map(|m| parse_amount(m.as_str()).map(|amount| (m.as_str().to_string(), amount)))
        .filter(|(_, amount)| *amount >= STRUCTURING_RANGE.0 && *amount <= STRUCTURING_RANGE.1)
        .collect();

    if amounts.len() < STRUCTURING_MIN_COUNT {
        return Ok(None);
    }

    let total: f64 = amounts.iter().map(|(_, amount)| amount).sum();
    let anomaly = Anomaly::record(
        db,
        doc_id,
        AnomalyType::RedFlag,
        amounts.len() as f64,
        AnomalySeverity::Critical,
        0.85,
        format!(
            "Detected {} transactions between $9,000-$9,999, potentially evading the $10,000 reporting threshold. Total: ${total:.2}",
            amounts.len()
        ),
        json!({
            "pattern_type": "structuring",
            "transaction_count": amounts.len(),
            "transactions": amounts.iter().map(|(raw, amount)| json!({"amount": raw, "value": amount})).collect::<Vec<_>>(),
            "total_amount": total,
        }),
    )
    .await?;

    Ok(Some(anomaly))
}
