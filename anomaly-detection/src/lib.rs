//! Anomaly shard (§4.13): independent detectors that each look at one facet of
//! a registered document (red flags, statistical drift, metadata drift,
//! embedding distance, hidden content) and record findings via
//! `common::storage::types::anomaly::Anomaly`. Detectors never talk to each
//! other; the dispatcher/worker that owns a document runs whichever subset
//! applies and lets `Anomaly::record`'s fingerprint dedup handle reruns.

pub mod content;
pub mod hidden_content;
pub mod metadata;
pub mod red_flag;
pub mod statistical;

use common::storage::types::anomaly::AnomalySeverity;

/// Severity ladder shared by every z-score-based detector (§4.13): z >= 2t is
/// `Critical`, z >= 1.5t is `High`, z >= t is `Medium`, else `Low`.
pub(crate) fn severity_for_z_score(z_score: f64, threshold: f64) -> AnomalySeverity {
    if z_score >= threshold * 2.0 {
        AnomalySeverity::Critical
    } else if z_score >= threshold * 1.5 {
        AnomalySeverity::High
    } else if z_score >= threshold {
        AnomalySeverity::Medium
    } else {
        AnomalySeverity::Low
    }
}

/// Confidence scaling shared by the z-score detectors: linear in z, capped at 1.0.
pub(crate) fn confidence_for_z_score(z_score: f64) -> f64 {
    (z_score / 5.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ladder_matches_threshold_multiples() {
        assert_eq!(severity_for_z_score(3.0, 3.0), AnomalySeverity::Medium);
        assert_eq!(severity_for_z_score(4.5, 3.0), AnomalySeverity::High);
        assert_eq!(severity_for_z_score(6.0, 3.0), AnomalySeverity::Critical);
        assert_eq!(severity_for_z_score(1.0, 3.0), AnomalySeverity::Low);
    }
}
