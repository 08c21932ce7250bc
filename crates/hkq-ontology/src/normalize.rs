//! Surface text normalization for label matching
//!
//! Labels and slot texts are compared in a folded form:
//! - Unicode canonical decomposition with combining marks removed
//! - Lowercase conversion
//! - Punctuation replaced by spaces
//! - Whitespace collapsed

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold text for matching: "  Hôpital  de Ndosho! " → "hopital de ndosho"
pub fn normalize_label(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Number of characters in normalized text
pub(crate) fn char_len(normalized: &str) -> usize {
    normalized.chars().count()
}
