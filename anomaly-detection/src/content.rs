//! Content/vector anomaly detector (§4.13): flags a document whose embedding
//! sits unusually far (by cosine distance) from the rest of the corpus.
//! Grounded in `detect_content_anomalies` of the original anomalies shard.

use common::{error::AppError, storage::{db::SurrealDbClient, types::anomaly::{Anomaly, AnomalyType}}};
use serde_json::json;

use crate::{confidence_for_z_score, severity_for_z_score};

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot / (norm_a * norm_b)
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

/// Flags `embedding` when its minimum cosine distance to `corpus_embeddings`
/// is a z-score outlier, or exceeds `min_cluster_distance` outright.
pub async fn detect(
    db: &SurrealDbClient,
    doc_id: &str,
    embedding: &[f32],
    corpus_embeddings: &[Vec<f32>],
    z_score_threshold: f64,
    min_cluster_distance: f64,
) -> Result<Option<Anomaly>, AppError> {
    if corpus_embeddings.is_empty() {
        return Ok(None);
    }

    let distances: Vec<f64> = corpus_embeddings.iter().map(|other| cosine_distance(embedding, other)).collect();
    let (mean_dist, std_dist) = mean_and_std(&distances);
    let min_dist = distances.iter().copied().fold(f64::INFINITY, f64::min);

    let z_score = if std_dist > 0.0 { (min_dist - mean_dist) / std_dist } else { 0.0 };

    if z_score <= z_score_threshold && min_dist <= min_cluster_distance {
        return Ok(None);
    }

    let anomaly = Anomaly::record(
        db,
        doc_id,
        AnomalyType::Content,
        z_score,
        severity_for_z_score(z_score, z_score_threshold),
        confidence_for_z_score(z_score),
        format!("Document is semantically distant from corpus (z-score: {z_score:.2})"),
        json!({
            "z_score": z_score,
            "min_distance": min_dist,
            "mean_distance": mean_dist,
            "std_distance": std_dist,
        }),
    )
    .await?;

    Ok(Some(anomaly))
}
