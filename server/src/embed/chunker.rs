//! Sentence splitting for email bodies

use lazy_static::lazy_static;
use regex::Regex;

use crate::util::truncate_chars;

lazy_static! {
    // Match sentence-ending punctuation followed by whitespace
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]\s+").unwrap();
}

/// Check if text has meaningful content (not just punctuation/whitespace)
pub fn has_content(text: &str) -> bool {
    text.chars().any(|c| c.is_alphanumeric())
}

#[derive(Debug, Clone)]
pub struct Sentence {
    pub index: usize,
    pub text: String,
}

fn push_sentence(sentences: &mut Vec<Sentence>, raw: &str, max_chars: usize) {
    let sentence = raw.trim();
    if has_content(sentence) {
        sentences.push(Sentence {
            index: sentences.len(),
            text: truncate_chars(sentence, max_chars).to_string(),
        });
    }
}

/// Split text into sentences.
///
/// Rules:
/// 1. Split on sentence boundaries (. ! ?) followed by whitespace
/// 2. Truncate sentences longer than `max_chars` characters
/// 3. Drop fragments without alphanumeric content
pub fn split_sentences(text: &str, max_chars: usize) -> Vec<Sentence> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut sentences = Vec::new();
    let mut last_end = 0;

    for mat in SENTENCE_END.find_iter(text) {
        // Include the punctuation (but not the whitespace) in the sentence
        let sentence_end = mat.start() + 1;
        push_sentence(&mut sentences, &text[last_end..sentence_end], max_chars);
        last_end = mat.end();
    }

    // Last sentence has no trailing whitespace
    push_sentence(&mut sentences, &text[last_end..], max_chars);

    sentences
}

/// Join the first `n` sentences of `text`, capped at `max_chars` characters.
pub fn leading_sentences(text: &str, n: usize, max_chars: usize) -> String {
    let joined = split_sentences(text, max_chars)
        .into_iter()
        .take(n)
        .map(|s| s.text)
        .collect::<Vec<_>>()
        .join(" ");

    truncate_chars(&joined, max_chars).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 600;

    #[test]
    fn test_basic_splitting() {
        let text = "Hello world. This is a test! How are you?";
        let sentences = split_sentences(text, MAX);
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0].text, "Hello world.");
        assert_eq!(sentences[0].index, 0);
        assert_eq!(sentences[1].text, "This is a test!");
        assert_eq!(sentences[1].index, 1);
        assert_eq!(sentences[2].text, "How are you?");
        assert_eq!(sentences[2].index, 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(split_sentences("", MAX).is_empty());
        assert!(split_sentences("   ", MAX).is_empty());
    }

    #[test]
    fn test_truncation_on_multibyte_text() {
        let long_sentence = "é".repeat(MAX + 100);
        let sentences = split_sentences(&long_sentence, MAX);
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].text.chars().count(), MAX);
    }

    #[test]
    fn test_filters_empty_sentences() {
        let text = "First.  . Second.";
        let sentences = split_sentences(text, MAX);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].text, "First.");
        assert_eq!(sentences[1].text, "Second.");
        assert_eq!(sentences[1].index, 1);
    }

    #[test]
    fn test_leading_sentences() {
        let text = "One. Two! Three? Four.";
        assert_eq!(leading_sentences(text, 3, MAX), "One. Two! Three?");
        assert_eq!(leading_sentences(text, 10, MAX), "One. Two! Three? Four.");
        assert_eq!(leading_sentences(text, 3, 6), "One. T");
    }
}
