//! File type classification and routing (§4.4): decides a file's `category`
//! and the pool route a job walks, ahead of the image quality classifier
//! (§4.5) for the image branch.

use common::{
    storage::types::ingest_job::{FileCategory, ImageClassification, ImageLayout},
    utils::config::OcrMode,
};
use job_queue::pools;

/// How `classify` arrived at a mime type, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    ContentMagic,
    Extension,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub mime_type: String,
    pub confidence: f32,
    pub method: DetectionMethod,
    pub category: FileCategory,
    /// Office container formats (docx/xlsx/jar/odt) are zip-based but are
    /// routed through their document pipeline, not `cpu-archive`.
    pub is_archive: bool,
}

/// Below this confidence (or an `application/octet-stream` result), the file
/// is `Unknown` with an empty route and needs a manual override.
const UNKNOWN_CONFIDENCE_FLOOR: f32 = 0.3;

/// Detects a file's mime type from its content first, falling back to the
/// extension when the magic sniff is inconclusive, then derives `category`
/// and `is_archive` from the routing table.
pub fn classify(bytes: &[u8], file_name: &str) -> Classification {
    let (mime_type, confidence, method) = detect_mime(bytes, file_name);

    if confidence < UNKNOWN_CONFIDENCE_FLOOR || mime_type == "application/octet-stream" {
        return Classification {
            mime_type,
            confidence,
            method,
            category: FileCategory::Unknown,
            is_archive: false,
        };
    }

    let category = category_for_mime(&mime_type);
    let is_archive = is_container_archive(&mime_type, file_name);

    Classification {
        mime_type,
        confidence,
        method,
        category,
        is_archive,
    }
}

fn detect_mime(bytes: &[u8], file_name: &str) -> (String, f32, DetectionMethod) {
    if let Some(kind) = infer::get(bytes) {
        return (kind.mime_type().to_string(), 0.95, DetectionMethod::ContentMagic);
    }

    let guess = mime_guess::from_path(file_name).first();
    match guess {
        Some(mime) => (mime.to_string(), 0.5, DetectionMethod::Extension),
        None => ("application/octet-stream".to_string(), 0.0, DetectionMethod::Extension),
    }
}

/// Office container formats are zip archives at the byte level but carry
/// their own document mime type; only genuine archive mimes count.
fn is_container_archive(mime_type: &str, file_name: &str) -> bool {
    let office_extensions = [".docx", ".xlsx", ".pptx", ".odt", ".jar"];
    if office_extensions.iter().any(|ext| file_name.ends_with(ext)) {
        return true;
    }
    matches!(
        mime_type,
        "application/zip" | "application/x-tar" | "application/gzip" | "application/x-7z-compressed" | "application/vnd.rar"
    )
}

fn category_for_mime(mime_type: &str) -> FileCategory {
    if mime_type.starts_with("image/") {
        return FileCategory::Image;
    }
    if mime_type.starts_with("audio/") {
        return FileCategory::Audio;
    }
    if matches!(
        mime_type,
        "application/zip" | "application/x-tar" | "application/gzip" | "application/x-7z-compressed" | "application/vnd.rar"
    ) {
        return FileCategory::Archive;
    }
    if matches!(
        mime_type,
        "application/pdf"
            | "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/vnd.oasis.opendocument.text"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel"
            | "text/csv"
            | "text/plain"
            | "text/markdown"
            | "application/json"
            | "message/rfc822"
            | "application/vnd.ms-outlook"
    ) {
        return FileCategory::Document;
    }
    FileCategory::Unknown
}

/// The fixed routing table (§4.4): the `worker_route` a category's pipeline
/// walks. The image quality classifier (§4.5) runs inline during intake
/// (its score is already known by the time `worker_route` is computed), so
/// `ROUTE_BY_QUALITY` is resolved immediately via `ocr_route` rather than left
/// as a marker; `RECURSE_ATTACHMENTS` genuinely can't resolve until the
/// archive/email worker enumerates its members, so it stays a marker the
/// dispatcher drops once reached.
pub fn initial_route(classification: &Classification) -> Vec<String> {
    match classification.category {
        FileCategory::Document => {
            if classification.mime_type == "message/rfc822" || classification.mime_type == "application/vnd.ms-outlook" {
                vec![pools::CPU_EXTRACT.to_string(), ROUTE_BY_QUALITY_MARKER_RECURSE.to_string()]
            } else {
                vec![pools::CPU_EXTRACT.to_string()]
            }
        }
        FileCategory::Image => Vec::new(), // replaced by `ocr_route` once the quality score is known
        FileCategory::Audio => vec![pools::GPU_WHISPER.to_string()],
        FileCategory::Archive => vec![pools::CPU_ARCHIVE.to_string(), ROUTE_BY_QUALITY_MARKER_RECURSE.to_string()],
        FileCategory::Unknown => Vec::new(),
    }
}

/// OCR route selection (§4.5), given the `ocr_mode` setting and the quality
/// classifier's output for this image.
pub fn ocr_route(ocr_mode: OcrMode, classification: ImageClassification, layout: ImageLayout) -> Vec<String> {
    match ocr_mode {
        OcrMode::QwenOnly => vec![pools::CPU_IMAGE.to_string(), pools::GPU_QWEN.to_string()],
        OcrMode::PaddleOnly => {
            if classification == ImageClassification::Clean {
                vec![pools::GPU_PADDLE.to_string()]
            } else {
                vec![pools::CPU_IMAGE.to_string(), pools::GPU_PADDLE.to_string()]
            }
        }
        OcrMode::Auto => match classification {
            ImageClassification::Clean => vec![pools::GPU_PADDLE.to_string()],
            ImageClassification::Fixable => vec![pools::CPU_IMAGE.to_string(), pools::GPU_PADDLE.to_string()],
            ImageClassification::Messy if matches!(layout, ImageLayout::Mixed | ImageLayout::Complex) => {
                vec![pools::CPU_IMAGE.to_string(), pools::GPU_QWEN.to_string()]
            }
            ImageClassification::Messy => vec![pools::CPU_IMAGE.to_string(), pools::GPU_PADDLE.to_string()],
        },
    }
}

/// Marker the dispatcher drops once attachment/member extraction enumerates
/// the recursed sub-jobs (archives, email attachments); genuine resolution
/// (submitting those members as new intake jobs) happens outside the
/// dispatcher, driven by the worker's own result payload.
pub const ROUTE_BY_QUALITY_MARKER_RECURSE: &str = "RECURSE_ATTACHMENTS";
