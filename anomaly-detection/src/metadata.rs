//! Metadata anomaly detector (§4.13): flags a document whose file size sits
//! far from the corpus mean. Grounded in `detect_metadata_anomalies` of the
//! original anomalies shard.

use common::{error::AppError, storage::{db::SurrealDbClient, types::anomaly::{Anomaly, AnomalyType}}};
use serde_json::json;

use crate::{confidence_for_z_score, severity_for_z_score};

use crate::statistical::MetricStats;

pub async fn detect(
    db: &SurrealDbClient,
    doc_id: &str,
    file_size: f64,
    corpus_file_size: Option<MetricStats>,
    threshold: f64,
) -> Result<Option<Anomaly>, AppError> {
    let Some(baseline) = corpus_file_size else { return Ok(None) };
    if baseline.std_dev <= 0.0 {
        return Ok(None);
    }

    let z_score = ((file_size - baseline.mean) / baseline.std_dev).abs();
    if z_score <= threshold {
        return Ok(None);
    }

    let anomaly = Anomaly::record(
        db,
        doc_id,
        AnomalyType::Metadata,
        z_score,
        severity_for_z_score(z_score, threshold),
        confidence_for_z_score(z_score),
        format!("Unusual file size: {file_size:.0} bytes (expected: {:.0})", baseline.mean),
        json!({
            "field": "file_size",
            "value": file_size,
            "mean": baseline.mean,
            "std": baseline.std_dev,
            "z_score": z_score,
        }),
    )
    .await?;

    Ok(Some(anomaly))
}
