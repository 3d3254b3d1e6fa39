//! Statistical anomaly detector (§4.13): flags a document whose text-level
//! metrics (char/word/sentence counts, average word/sentence length) sit far
//! from the corpus mean. Grounded in `detect_statistical_anomalies` /
//! `_calculate_text_stats` of the original anomalies shard.

use common::{error::AppError, storage::{db::SurrealDbClient, types::anomaly::{Anomaly, AnomalyType}}};
use serde_json::json;

use crate::{confidence_for_z_score, severity_for_z_score};

/// Mean/standard-deviation pair for one corpus-wide metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Per-metric corpus baseline a document's own stats are compared against.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorpusTextStats {
    pub char_count: Option<MetricStats>,
    pub word_count: Option<MetricStats>,
    pub sentence_count: Option<MetricStats>,
    pub avg_word_length: Option<MetricStats>,
    pub avg_sentence_length: Option<MetricStats>,
}

/// A document's own text metrics, as computed by [`text_stats`].
#[derive(Debug, Clone, Copy)]
pub struct TextStats {
    pub char_count: f64,
    pub word_count: f64,
    pub sentence_count: f64,
    pub avg_word_length: f64,
    pub avg_sentence_length: f64,
}

pub fn text_stats(text: &str) -> TextStats {
    let words: Vec<&str> = text.split_whitespace().collect();
    let sentence_count = text.split('.').count().max(1);

    let avg_word_length = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64
    };

    TextStats {
        char_count: text.chars().count() as f64,
        word_count: words.len() as f64,
        sentence_count: sentence_count as f64,
        avg_word_length,
        avg_sentence_length: words.len() as f64 / sentence_count as f64,
    }
}

/// Walks each metric that has a corpus baseline and records an anomaly for
/// any that clears `threshold` standard deviations from the mean.
pub async fn detect(
    db: &SurrealDbClient,
    doc_id: &str,
    text: &str,
    corpus: &CorpusTextStats,
    threshold: f64,
) -> Result<Vec<Anomaly>, AppError> {
    let stats = text_stats(text);
    let mut found = Vec::new();

    let metrics: [(&str, f64, Option<MetricStats>); 5] = [
        ("char_count", stats.char_count, corpus.char_count),
        ("word_count", stats.word_count, corpus.word_count),
        ("sentence_count", stats.sentence_count, corpus.sentence_count),
        ("avg_word_length", stats.avg_word_length, corpus.avg_word_length),
        ("avg_sentence_length", stats.avg_sentence_length, corpus.avg_sentence_length),
    ];

    for (name, value, baseline) in metrics {
        let Some(baseline) = baseline else { continue };
        if baseline.std_dev <= 0.0 {
            continue;
        }

        let z_score = ((value - baseline.mean) / baseline.std_dev).abs();
        if z_score <= threshold {
            continue;
        }

        let anomaly = Anomaly::record(
            db,
            doc_id,
            AnomalyType::Statistical,
            z_score,
            severity_for_z_score(z_score, threshold),
            confidence_for_z_score(z_score),
            format!("Unusual {name}: {value:.2} (expected: {:.2})", baseline.mean),
            json!({
                "metric": name,
                "value": value,
                "expected_mean": baseline.mean,
                "expected_std": baseline.std_dev,
                "z_score": z_score,
            }),
        )
        .await?;
        found.push(anomaly);
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    #[test]
    fn text_stats_matches_whitespace_and_period_splits() {
        let stats = text_stats("one two three. four five.");
        assert_eq!(stats.word_count, 5.0);
        assert_eq!(stats.sentence_count, 2.0);
    }

    #[tokio::test]
    async fn flags_word_count_far_from_corpus_mean() {
        let db = memory_db().await;
        let corpus = CorpusTextStats {
            word_count: Some(MetricStats { mean: 100.0, std_dev: 10.0 }),
            ..Default::default()
        };

        let long_text = "word ".repeat(400);
        let found = detect(&db, "doc-1", &long_text, &corpus, 3.0)
            .await
            .expect("detect");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].anomaly_type, AnomalyType::Statistical);
    }

    #[tokio::test]
    async fn no_baseline_metric_is_skipped_without_error() {
        let db = memory_db().await;
        let corpus = CorpusTextStats::default();

        let found = detect(&db, "doc-2", "anything at all.", &corpus, 3.0)
            .await
            .expect("detect");
        assert!(found.is_empty());
    }
}
