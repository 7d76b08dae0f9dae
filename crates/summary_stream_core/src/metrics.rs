//! crates/summary_stream_core/src/metrics.rs
//!
//! Pure functions for the figures shown alongside a summary. Every function
//! here is deterministic and free of side effects.

/// Average adult silent-reading speed used for reading-time estimates.
pub const WORDS_PER_MINUTE: usize = 200;

/// Counts whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Minutes needed to read `word_count` words, rounded up.
/// Zero words read in zero minutes; anything else takes at least one.
pub fn reading_time_minutes(word_count: usize) -> u32 {
    if word_count == 0 {
        return 0;
    }
    let minutes = word_count.div_ceil(WORDS_PER_MINUTE).max(1);
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

/// How much shorter the summary is than the original, as a whole percentage
/// clamped to `[0, 100]`. A summary longer than its original reports 0.
pub fn reduction_percent(original_word_count: usize, summary_word_count: usize) -> u8 {
    if original_word_count == 0 {
        return 0;
    }
    let ratio = summary_word_count as f64 / original_word_count as f64;
    let percent = (100.0 * (1.0 - ratio)).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Mean of per-section confidences, each section weighted equally.
/// Missing values count as 1.0, as does an empty input.
pub fn aggregate_confidence(confidences: &[Option<f32>]) -> f32 {
    if confidences.is_empty() {
        return 1.0;
    }
    let total: f64 = confidences
        .iter()
        .map(|c| f64::from(c.unwrap_or(1.0)))
        .sum();
    (total / confidences.len() as f64) as f32
}
