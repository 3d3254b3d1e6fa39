//! Chunker (§4.10): splits document text into contiguous, char-offset-indexed
//! chunks by one of three methods. Grounded in the teacher's `TextChunk`
//! char-offset model (`common::storage::types::text_chunk`) and the original
//! system's sentence/semantic splitters for the `sentence`/`semantic` methods.

/// One chunk of text with its char offsets into the source document.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMethod {
    Fixed,
    Sentence,
    Semantic,
}

/// `(chunk_size, overlap)` parameters for the fixed/sentence methods; `semantic`
/// additionally needs an embedder, passed separately to `chunk_semantic`.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { chunk_size: 1000, overlap: 100 }
    }
}

/// Fixed-window chunking: window `chunk_size`, step `max(1, chunk_size - overlap)`.
/// The `step >= 1` floor prevents an infinite loop when `overlap >= chunk_size`.
pub fn chunk_fixed(text: &str, config: ChunkerConfig) -> Vec<TextSpan> {
    if text.is_empty() || config.chunk_size == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = config.chunk_size.saturating_sub(config.overlap).max(1);

    let mut spans = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        spans.push(TextSpan {
            text: chars[start..end].iter().collect(),
            start_offset: start,
            end_offset: end,
        });
        if end >= chars.len() {
            break;
        }
        start += step;
    }
    spans
}

fn split_sentences_with_offsets(text: &str) -> Vec<TextSpan> {
    let mut spans = Vec::new();
    let mut sentence_start = 0usize;
    let chars: Vec<char> = text.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + 1;
            let raw: String = chars[sentence_start..end].iter().collect();
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                let leading_ws = raw.len() - raw.trim_start().len();
                spans.push(TextSpan {
                    text: trimmed.to_string(),
                    start_offset: sentence_start + leading_ws,
                    end_offset: sentence_start + leading_ws + trimmed.chars().count(),
                });
            }
            sentence_start = end;
        }
    }

    if sentence_start < chars.len() {
        let raw: String = chars[sentence_start..].iter().collect();
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let leading_ws = raw.len() - raw.trim_start().len();
            spans.push(TextSpan {
                text: trimmed.to_string(),
                start_offset: sentence_start + leading_ws,
                end_offset: sentence_start + leading_ws + trimmed.chars().count(),
            });
        }
    }

    spans
}

/// Sentence chunking: greedily accumulates sentences until adding the next one
/// would exceed `chunk_size`, then emits and starts a new chunk.
pub fn chunk_sentence(text: &str, config: ChunkerConfig) -> Vec<TextSpan> {
    let sentences = split_sentences_with_offsets(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut current: Vec<&TextSpan> = Vec::new();
    let mut current_len = 0usize;

    for sentence in &sentences {
        let sentence_len = sentence.text.chars().count();
        if !current.is_empty() && current_len + 1 + sentence_len > config.chunk_size {
            spans.push(merge_spans(&current));
            current.clear();
            current_len = 0;
        }
        current_len += if current.is_empty() { sentence_len } else { sentence_len + 1 };
        current.push(sentence);
    }

    if !current.is_empty() {
        spans.push(merge_spans(&current));
    }

    spans
}

fn merge_spans(spans: &[&TextSpan]) -> TextSpan {
    let start = spans.first().expect("non-empty group").start_offset;
    let end = spans.last().expect("non-empty group").end_offset;
    let text = spans.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
    TextSpan { text, start_offset: start, end_offset: end }
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Semantic chunking: embeds each sentence (via `embed`), slides a window of
/// size 2 over the mean embeddings, and breaks when adjacent-window cosine
/// similarity drops below `mean(sim) - std(sim)` (floored at 0.5). Breakpoints
/// that would yield a chunk smaller than `chunk_size / 3` are suppressed.
/// Falls back to [`chunk_sentence`] when `embed` returns `None` for any sentence.
pub fn chunk_semantic(text: &str, config: ChunkerConfig, embed: impl Fn(&str) -> Option<Vec<f32>>) -> Vec<TextSpan> {
    let sentences = split_sentences_with_offsets(text);
    if sentences.len() < 2 {
        return chunk_sentence(text, config);
    }

    let embeddings: Option<Vec<Vec<f32>>> = sentences.iter().map(|s| embed(&s.text)).collect();
    let Some(embeddings) = embeddings else {
        return chunk_sentence(text, config);
    };

    let window_similarities: Vec<f64> = embeddings
        .windows(2)
        .map(|pair| cosine_similarity(&pair[0], &pair[1]))
        .collect();

    let (mean_sim, std_sim) = mean_and_std(&window_similarities);
    let break_threshold = (mean_sim - std_sim).max(0.5);
    let min_chunk_chars = config.chunk_size / 3;

    let mut spans = Vec::new();
    let mut current: Vec<&TextSpan> = vec![&sentences[0]];
    let mut current_len = sentences[0].text.chars().count();

    for i in 1..sentences.len() {
        let sentence_len = sentences[i].text.chars().count();
        let similarity = window_similarities[i - 1];

        let would_exceed_size = current_len + 1 + sentence_len >= config.chunk_size;
        let similarity_break = similarity < break_threshold;

        if (would_exceed_size || similarity_break) && current_len >= min_chunk_chars {
            spans.push(merge_spans(&current));
            current.clear();
            current_len = 0;
        }

        current_len += if current.is_empty() { sentence_len } else { sentence_len + 1 };
        current.push(&sentences[i]);
    }

    if !current.is_empty() {
        spans.push(merge_spans(&current));
    }

    spans
}

pub fn chunk(text: &str, method: ChunkMethod, config: ChunkerConfig, embed: impl Fn(&str) -> Option<Vec<f32>>) -> Vec<TextSpan> {
    match method {
        ChunkMethod::Fixed => chunk_fixed(text, config),
        ChunkMethod::Sentence => chunk_sentence(text, config),
        ChunkMethod::Semantic => chunk_semantic(text, config, embed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_zero_chunks() {
        assert!(chunk_fixed("", ChunkerConfig::default()).is_empty());
        assert!(chunk_sentence("", ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn fixed_chunking_matches_expected_count_formula() {
        let text = "a".repeat(250);
        let config = ChunkerConfig { chunk_size: 100, overlap: 20 };
        let spans = chunk_fixed(&text, config);
        // ceil((L - O) / (N - O)) = ceil(230/80) = 3
        assert_eq!(spans.len(), 3);
    }

    #[test]
    fn fixed_chunking_of_text_shorter_than_window_yields_one_chunk() {
        let text = "short text";
        let config = ChunkerConfig { chunk_size: 100, overlap: 20 };
        let spans = chunk_fixed(text, config);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, text);
    }

    #[test]
    fn fixed_chunking_overlap_never_produces_zero_step() {
        let text = "b".repeat(500);
        let config = ChunkerConfig { chunk_size: 50, overlap: 50 };
        let spans = chunk_fixed(&text, config);
        assert!(!spans.is_empty());
    }

    #[test]
    fn sentence_chunking_splits_on_terminators() {
        let text = "First sentence here. Second one follows! Is this third?";
        let config = ChunkerConfig { chunk_size: 1000, overlap: 0 };
        let spans = chunk_sentence(text, config);
        assert_eq!(spans.len(), 1);
        assert!(spans[0].text.contains("First sentence"));
    }

    #[test]
    fn sentence_chunking_emits_new_chunk_past_size_limit() {
        let text = "Alpha bravo charlie delta echo. Foxtrot golf hotel india juliett. Kilo lima mike november oscar.";
        let config = ChunkerConfig { chunk_size: 40, overlap: 0 };
        let spans = chunk_sentence(text, config);
        assert!(spans.len() >= 2);
    }

    #[test]
    fn semantic_chunking_falls_back_to_sentence_when_embedder_unavailable() {
        let text = "Alpha bravo charlie delta echo. Foxtrot golf hotel india juliett.";
        let config = ChunkerConfig::default();
        let spans = chunk_semantic(text, config, |_| None);
        let fallback = chunk_sentence(text, config);
        assert_eq!(spans, fallback);
    }

    #[test]
    fn semantic_chunking_breaks_on_low_similarity_window() {
        let text = "Cats are wonderful pets for families. Dogs are also great companions. The stock market crashed overnight unexpectedly.";
        let config = ChunkerConfig { chunk_size: 1000, overlap: 0 };
        let spans = chunk_semantic(text, config, |s| {
            if s.to_lowercase().contains("stock") {
                Some(vec![0.0, 1.0, 0.0])
            } else {
                Some(vec![1.0, 0.0, 0.0])
            }
        });
        assert!(spans.len() >= 2);
    }
}
