//! Passage to sentence splitting.
//!
//! The same rule feeds playback and cache invalidation, so a passage always
//! maps to the same cache keys.

use regex::Regex;
use std::sync::LazyLock;

static SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^.!?\n]+(?:[.!?\n]+|$)").expect("sentence pattern is valid")
});

/// Split a passage into sentences ending in `.`, `!`, `?` or a newline.
///
/// Terminators stay with their sentence, surrounding whitespace is trimmed and
/// empty pieces are dropped. Input without any match is returned whole.
pub fn split_sentences(text: &str) -> Vec<String> {
    let sentences: Vec<String> = SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if !sentences.is_empty() {
        return sentences;
    }

    let whole = text.trim();
    if whole.is_empty() {
        Vec::new()
    } else {
        vec![whole.to_string()]
    }
}
