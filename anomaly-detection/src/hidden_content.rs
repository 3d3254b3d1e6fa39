//! Hidden-content detector (§4.13): Shannon entropy scanning, an LSB
//! chi-square test for image steganography, and file type/extension mismatch
//! detection. Grounded in `hidden_content.py` of the original anomalies
//! shard; `scipy.stats.chi2` isn't available here, so the p-value is
//! approximated by the chi-square statistic directly against a threshold
//! derived the same way (1 degree of freedom, so a large statistic alone is
//! the suspicious signal — see [`LsbResult`]).

use std::collections::HashMap;

use common::{error::AppError, storage::{db::SurrealDbClient, types::anomaly::{Anomaly, AnomalySeverity, AnomalyType}}};
use serde_json::json;

/// One fixed-size slice of a file and its Shannon entropy.
#[derive(Debug, Clone)]
pub struct EntropyRegion {
    pub start_offset: usize,
    pub end_offset: usize,
    pub entropy: f64,
    pub is_anomalous: bool,
}

/// Shannon entropy of `data` in bits per byte, 0.0 (no randomness) to 8.0
/// (uniform randomness). High entropy suggests encrypted/compressed/hidden data.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<u8, u64> = HashMap::new();
    for byte in data {
        *counts.entry(*byte).or_insert(0) += 1;
    }

    let total = data.len() as f64;
    -counts
        .values()
        .map(|count| {
            let p = *count as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}

/// Entropy over fixed-size slices of `data`; tiny trailing slices (<64 bytes)
/// are skipped, matching the original scanner.
pub fn entropy_regions(data: &[u8], chunk_size: usize, threshold_suspicious: f64) -> Vec<EntropyRegion> {
    data.chunks(chunk_size.max(1))
        .enumerate()
        .filter(|(_, chunk)| chunk.len() >= 64)
        .map(|(i, chunk)| {
            let start = i * chunk_size;
            let entropy = shannon_entropy(chunk);
            EntropyRegion {
                start_offset: start,
                end_offset: start + chunk.len(),
                entropy,
                is_anomalous: entropy >= threshold_suspicious,
            }
        })
        .collect()
}

/// Chi-square test of an LSB bit sequence against an expected 50/50 split.
#[derive(Debug, Clone, Copy)]
pub struct LsbResult {
    pub bit_ratio: f64,
    pub chi_square: f64,
    pub is_suspicious: bool,
    pub confidence: f64,
}

/// Natural images carry a slight LSB bias; steganography tends to flatten it
/// to a near-perfect 50/50 split. `chi_square_threshold` is the statistic
/// cutoff above which the split is considered "too uniform to be natural"
/// when it also falls inside the 0.48-0.52 band.
pub fn lsb_chi_square(bits: &[bool], chi_square_threshold: f64) -> Option<LsbResult> {
    if bits.is_empty() {
        return None;
    }

    let ones = bits.iter().filter(|b| **b).count() as f64;
    let zeros = bits.len() as f64 - ones;
    let expected = bits.len() as f64 / 2.0;

    let chi_square = ((ones - expected).powi(2) + (zeros - expected).powi(2)) / expected;
    let bit_ratio = ones / bits.len() as f64;

    let is_suspicious = chi_square <= chi_square_threshold && (0.48..=0.52).contains(&bit_ratio);

    Some(LsbResult {
        bit_ratio,
        chi_square,
        is_suspicious,
        confidence: 1.0 - (0.5 - bit_ratio).abs() * 2.0,
    })
}

/// Extracts the least-significant bit of every byte in `data`, matching the
/// "all channels" extraction the original scanner runs over RGB pixels.
pub fn lsb_bits(data: &[u8]) -> Vec<bool> {
    data.iter().map(|b| b & 1 == 1).collect()
}

const EXTENSION_MIME_MAP: &[(&str, &[&str])] = &[
    (".jpg", &["image/jpeg"]),
    (".jpeg", &["image/jpeg"]),
    (".png", &["image/png"]),
    (".gif", &["image/gif"]),
    (".bmp", &["image/bmp", "image/x-ms-bmp"]),
    (".pdf", &["application/pdf"]),
    (".doc", &["application/msword"]),
    (".docx", &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"]),
    (".xlsx", &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"]),
    (".txt", &["text/plain"]),
    (".zip", &["application/zip"]),
    (".mp3", &["audio/mpeg"]),
];

/// `true` if `actual_mime` isn't one of the mime types `claimed_extension` is
/// expected to carry. Unknown extensions never mismatch (advisory-only,
/// matching the original's `unknown -> false` fallback).
pub fn file_type_mismatch(claimed_extension: &str, actual_mime: &str) -> bool {
    let ext = claimed_extension.to_lowercase();
    EXTENSION_MIME_MAP
        .iter()
        .find(|(known_ext, _)| *known_ext == ext)
        .is_some_and(|(_, mimes)| !mimes.contains(&actual_mime))
}

/// Runs entropy scanning (and, for images, an LSB check) and records any
/// findings. `lsb_bits_for_image` is `None` for non-image documents.
pub async fn detect(
    db: &SurrealDbClient,
    doc_id: &str,
    data: &[u8],
    entropy_chunk_size: usize,
    entropy_threshold_suspicious: f64,
    entropy_threshold_high: f64,
    lsb_bits_for_image: Option<&[bool]>,
    chi_square_threshold: f64,
) -> Result<Vec<Anomaly>, AppError> {
    let mut found = Vec::new();

    let global_entropy = shannon_entropy(data);
    let regions = entropy_regions(data, entropy_chunk_size, entropy_threshold_suspicious);
    let high_entropy_regions = regions.iter().filter(|r| r.is_anomalous).count();

    if high_entropy_regions > 0 {
        found.push(
            Anomaly::record(
                db,
                doc_id,
                AnomalyType::HighEntropy,
                global_entropy,
                AnomalySeverity::Medium,
                0.7,
                format!("Found {high_entropy_regions} high-entropy regions"),
                json!({ "region_count": high_entropy_regions, "global_entropy": global_entropy }),
            )
            .await?,
        );
    }

    if global_entropy >= entropy_threshold_high {
        found.push(
            Anomaly::record(
                db,
                doc_id,
                AnomalyType::HighEntropy,
                global_entropy,
                AnomalySeverity::High,
                0.8,
                format!("Very high global entropy: {global_entropy:.3}"),
                json!({ "entropy": global_entropy }),
            )
            .await?,
        );
    }

    if let Some(bits) = lsb_bits_for_image {
        if let Some(lsb) = lsb_chi_square(bits, chi_square_threshold) {
            if lsb.is_suspicious {
                found.push(
                    Anomaly::record(
                        db,
                        doc_id,
                        AnomalyType::HiddenContent,
                        lsb.chi_square,
                        AnomalySeverity::High,
                        lsb.confidence,
                        format!(
                            "Suspicious LSB pattern: {:.3} ratio, chi-square={:.4}",
                            lsb.bit_ratio, lsb.chi_square
                        ),
                        json!({
                            "bit_ratio": lsb.bit_ratio,
                            "chi_square": lsb.chi_square,
                        }),
                    )
                    .await?,
                );
            }
        }
    }

    Ok(found)
}
